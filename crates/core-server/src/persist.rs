//! On-disk shape of the server state.
//!
//! Connections are transient and never persisted; everything a reconnecting
//! session needs (its user, history and hidden set) is. Files are written to
//! a sibling temp file first and renamed into place.

use super::{ServerSettings, ServerState, UserRecord};
use anyhow::{Context, Result};
use core_events::UserData;
use core_grid::{Grid, UndoEngine, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedUser {
    pub user: UserId,
    pub session: String,
    pub data: UserData,
    pub undo: UndoEngine,
    pub hidden: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub grid: Grid,
    pub users: Vec<PersistedUser>,
    pub next_user: u32,
}

impl ServerState {
    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            grid: self.grid.clone(),
            users: self
                .users
                .iter()
                .map(|(user, rec)| PersistedUser {
                    user: *user,
                    session: rec.session.clone(),
                    data: rec.data,
                    undo: rec.undo.clone(),
                    hidden: rec.hidden.clone(),
                })
                .collect(),
            next_user: self.next_user,
        }
    }

    /// Rebuild a server with no live connections.
    pub fn from_persisted(state: PersistedState, settings: ServerSettings) -> Self {
        let users: BTreeMap<UserId, UserRecord> = state
            .users
            .into_iter()
            .map(|u| {
                (
                    u.user,
                    UserRecord {
                        session: u.session,
                        data: u.data,
                        undo: u.undo,
                        hidden: u.hidden,
                    },
                )
            })
            .collect();
        let floor = users.keys().map(|u| u.0 + 1).max().unwrap_or(1);
        Self {
            grid: state.grid,
            users,
            connections: BTreeMap::new(),
            next_user: state.next_user.max(floor),
            settings,
        }
    }
}

pub fn save_state(path: &Path, state: &PersistedState) -> Result<()> {
    let json = serde_json::to_string(state).context("serializing server state")?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    info!(target: "server.persist", path = %path.display(), users = state.users.len(), cells = state.grid.len(), "state_saved");
    Ok(())
}

pub fn load_state(path: &Path) -> Result<PersistedState> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let state: PersistedState =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
    info!(target: "server.persist", path = %path.display(), users = state.users.len(), cells = state.grid.len(), "state_loaded");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientId;
    use core_events::{LocalChange, NonEmpty, ToServer};
    use core_geom::{CellBounds, CellCoord, GlyphCoord};
    use core_grid::Glyph;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_survives_save_and_load() {
        let mut server = ServerState::default();
        server.connect(ClientId(1), "alpha");
        server
            .handle(
                ClientId(1),
                ToServer::RequestFullBounds(CellBounds::point(CellCoord::new(0, 0))),
            )
            .unwrap();
        let (cell, local) = GlyphCoord::new(4, 4).split();
        server
            .handle(
                ClientId(1),
                ToServer::SubmitEdits(NonEmpty {
                    head: LocalChange::Edit {
                        cell,
                        local,
                        glyph: Glyph('k'),
                    },
                    tail: vec![LocalChange::AddUndoBatch, LocalChange::ToggleUserVisibility(UserId(7))],
                }),
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let saved = server.to_persisted();
        save_state(&path, &saved).unwrap();
        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded, saved);

        let mut restored = ServerState::from_persisted(loaded, ServerSettings::default());
        assert_eq!(restored.connection_count(), 0);
        let (user, _) = restored.connect(ClientId(5), "alpha");
        assert_eq!(user, UserId(1));
        assert_eq!(restored.undo_of(user).map(|u| u.undo_depth()), Some(1));
        let (fresh, _) = restored.connect(ClientId(6), "beta");
        assert_eq!(fresh, UserId(2));
    }

    #[test]
    fn missing_file_is_an_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = load_state(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.json"));
    }
}
