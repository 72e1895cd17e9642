//! Configuration loading and parsing.
//!
//! Parses `glyphgrid.toml` (or an override path provided by the binary).
//! Every field has a default so a missing file, a missing section or a parse
//! error all yield a usable configuration. Unknown fields are ignored to
//! allow forward evolution.
//!
//! ```toml
//! [undo]
//! idle_commit_ms = 2000   # quiet period after which typing becomes one undo batch
//! history_max = 200
//!
//! [sync]
//! overscan_cells = 1      # margin requested around the visible window, clamped to 0..=8
//! offline_after_ms = 10000
//!
//! [render]
//! glyph_width_px = 10
//! glyph_height_px = 18
//!
//! [server]
//! max_batch = 256
//! ```

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Upper limit for the overscan margin; wider windows cost more per pan than
/// the round trips they save.
pub const MAX_OVERSCAN_CELLS: i32 = 8;

#[derive(Debug, Deserialize, Clone)]
pub struct UndoConfig {
    #[serde(default = "UndoConfig::default_idle_commit_ms")]
    pub idle_commit_ms: u64,
    #[serde(default = "UndoConfig::default_history_max")]
    pub history_max: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            idle_commit_ms: Self::default_idle_commit_ms(),
            history_max: Self::default_history_max(),
        }
    }
}

impl UndoConfig {
    const fn default_idle_commit_ms() -> u64 {
        2000
    }
    const fn default_history_max() -> usize {
        200
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "SyncConfig::default_overscan_cells")]
    pub overscan_cells: i32,
    #[serde(default = "SyncConfig::default_offline_after_ms")]
    pub offline_after_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            overscan_cells: Self::default_overscan_cells(),
            offline_after_ms: Self::default_offline_after_ms(),
        }
    }
}

impl SyncConfig {
    const fn default_overscan_cells() -> i32 {
        1
    }
    const fn default_offline_after_ms() -> u64 {
        10_000
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "RenderConfig::default_glyph_width")]
    pub glyph_width_px: i32,
    #[serde(default = "RenderConfig::default_glyph_height")]
    pub glyph_height_px: i32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            glyph_width_px: Self::default_glyph_width(),
            glyph_height_px: Self::default_glyph_height(),
        }
    }
}

impl RenderConfig {
    const fn default_glyph_width() -> i32 {
        10
    }
    const fn default_glyph_height() -> i32 {
        18
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_max_batch")]
    pub max_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_batch: Self::default_max_batch(),
        }
    }
}

impl ServerConfig {
    const fn default_max_batch() -> usize {
        256
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub undo: UndoConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub raw: Option<String>,         // original file string (optional)
    pub file: ConfigFile,            // parsed (or default) data
    pub effective_overscan: i32,     // clamped to 0..=MAX_OVERSCAN_CELLS
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(None, ConfigFile::default())
    }
}

/// Best-effort config path: working directory first, then the platform
/// config dir (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("glyphgrid.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("glyphgrid").join("glyphgrid.toml");
    }
    PathBuf::from("glyphgrid.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let Ok(content) = fs::read_to_string(&path) else {
        return Ok(Config::default());
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => {
            info!(target: "config", path = %path.display(), "config_loaded");
            Ok(Config::from_file(Some(content), file))
        }
        Err(e) => {
            // On parse error fall back to defaults rather than refusing to start.
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed");
            Ok(Config::default())
        }
    }
}

impl Config {
    fn from_file(raw: Option<String>, file: ConfigFile) -> Self {
        let mut cfg = Self {
            raw,
            file,
            effective_overscan: 0,
        };
        cfg.clamp_overscan();
        cfg
    }

    /// Clamp the configured overscan into `0..=MAX_OVERSCAN_CELLS`, logging
    /// when the file asked for something outside it.
    fn clamp_overscan(&mut self) -> i32 {
        let raw = self.file.sync.overscan_cells;
        let clamped = raw.clamp(0, MAX_OVERSCAN_CELLS);
        if clamped != raw {
            info!(
                target: "config",
                raw,
                clamped,
                max = MAX_OVERSCAN_CELLS,
                "overscan_cells_clamped"
            );
        }
        self.effective_overscan = clamped;
        clamped
    }

    pub fn idle_commit(&self) -> Duration {
        Duration::from_millis(self.file.undo.idle_commit_ms)
    }

    pub fn offline_after(&self) -> Duration {
        Duration::from_millis(self.file.sync.offline_after_ms)
    }

    /// Glyph footprint in pixels; non-positive values fall back to defaults.
    pub fn glyph_px(&self) -> (i32, i32) {
        let r = &self.file.render;
        let w = if r.glyph_width_px > 0 {
            r.glyph_width_px
        } else {
            RenderConfig::default_glyph_width()
        };
        let h = if r.glyph_height_px > 0 {
            r.glyph_height_px
        } else {
            RenderConfig::default_glyph_height()
        };
        (w, h)
    }
}
