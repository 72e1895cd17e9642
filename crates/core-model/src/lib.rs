//! Client-side model: optimistic replication of the canvas state.
//!
//! [`LocalModel`] is the generic engine (authoritative value + pending
//! queue). [`ClientModel`] is the facade a client event loop drives: it turns
//! user intents into local changes, keeps an ordered outbox for the
//! transport, reconciles server batches, commits undo batches after an idle
//! period, keeps the resident viewport window in sync and tracks which cells
//! the renderer has to refresh.
//!
//! Outbox ordering matters: the server answers messages in arrival order and
//! the local model only ever matches the head of its queue, so `take_outbox`
//! must be sent as returned. Consecutive edits coalesce into one
//! `SubmitEdits` of at most `max_batch` changes (the server rejects longer
//! batches outright); a viewport request in between starts a new batch.

mod dirty;
mod local;
mod viewport;

pub use dirty::{Damage, DirtyCellsTracker};
pub use local::{LocalModel, Reconciled, Replica};
pub use viewport::ViewportSync;

use core_config::Config;
use core_events::{
    Change, ClientChange, LoadSnapshot, LocalChange, NonEmpty, Timestamp, ToClient, ToServer,
    UserAction,
};
use core_geom::{CellCoord, GlyphBounds, GlyphCoord, GlyphSize, PixelCoord};
use core_grid::{FlatGlyph, Glyph, GlyphError, UserId, edits_for_text};
use core_state::ClientState;
use std::time::Duration;
use tracing::{debug, info, warn};

impl Replica for ClientState {
    type Msg = Change;

    fn apply(&mut self, time: Timestamp, msg: &Change) {
        self.update(time, msg);
    }

    fn acknowledges(pending: &Change, incoming: &Change) -> bool {
        pending.matches_echo(incoming)
    }
}

/// Client tunables, usually derived from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Quiet period after the last edit before the batch is committed.
    pub idle_commit: Duration,
    /// Age of the oldest unacknowledged message that counts as offline.
    pub offline_after: Duration,
    pub overscan: i32,
    pub glyph_size: GlyphSize,
    /// Largest `SubmitEdits` the server accepts.
    pub max_batch: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ClientSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let (w, h) = cfg.glyph_px();
        Self {
            idle_commit: cfg.idle_commit(),
            offline_after: cfg.offline_after(),
            overscan: cfg.effective_overscan,
            glyph_size: GlyphSize::new(w, h),
            max_batch: cfg.file.server.max_batch.max(1),
        }
    }
}

pub struct ClientModel {
    model: LocalModel<ClientState>,
    outbox: Vec<ToServer>,
    viewport: ViewportSync,
    dirty: DirtyCellsTracker,
    last_edit: Option<Timestamp>,
    settings: ClientSettings,
}

impl ClientModel {
    /// First message of a session: ask for everything around `visible`.
    pub fn handshake(visible: GlyphBounds, settings: &ClientSettings) -> ToServer {
        ToServer::RequestFullBounds(visible.to_cell_bounds().expand(settings.overscan.max(0)))
    }

    pub fn new(snapshot: LoadSnapshot, settings: ClientSettings) -> Self {
        let viewport = ViewportSync::with_requested(settings.overscan, snapshot.bounds);
        let mut dirty = DirtyCellsTracker::new();
        dirty.mark_full();
        info!(target: "model.client", user = %snapshot.user, cells = snapshot.grid.len(), "session_loaded");
        Self {
            model: LocalModel::new(ClientState::from_snapshot(snapshot)),
            outbox: Vec::new(),
            viewport,
            dirty,
            last_edit: None,
            settings,
        }
    }

    /// Reconnect: the snapshot replaces the authoritative state wholesale.
    /// Pending messages and unsent outbox entries are dropped; whatever the
    /// server did accept is already part of the snapshot.
    pub fn reload(&mut self, snapshot: LoadSnapshot) {
        info!(
            target: "model.client",
            user = %snapshot.user,
            dropped_pending = self.model.pending_len(),
            dropped_outbox = self.outbox.len(),
            "session_reloaded"
        );
        self.viewport = ViewportSync::with_requested(self.settings.overscan, snapshot.bounds);
        self.model.reset(ClientState::from_snapshot(snapshot));
        self.outbox.clear();
        self.last_edit = None;
        self.dirty.mark_full();
    }

    pub fn user(&self) -> UserId {
        self.projection().user
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn push_local(&mut self, now: Timestamp, change: LocalChange) {
        self.model.apply_local(now, Change::Local(change.clone()));
        let limit = self.settings.max_batch;
        match self.outbox.last_mut() {
            Some(ToServer::SubmitEdits(batch)) if batch.len() < limit => batch.push(change),
            _ => self
                .outbox
                .push(ToServer::SubmitEdits(NonEmpty::new(change))),
        }
    }

    /// Write one glyph at `at`.
    pub fn edit(&mut self, now: Timestamp, at: GlyphCoord, c: char) -> Result<(), GlyphError> {
        let glyph = Glyph::checked(c)?;
        self.push_edit(now, at, glyph);
        Ok(())
    }

    fn push_edit(&mut self, now: Timestamp, at: GlyphCoord, glyph: Glyph) {
        let (cell, local) = at.split();
        self.push_local(now, LocalChange::Edit { cell, local, glyph });
        self.dirty.mark(cell);
        self.last_edit = Some(now);
    }

    /// Type `text` starting at `origin`; returns the number of glyphs written.
    /// Nothing is written when any character is unplaceable.
    pub fn type_text(&mut self, now: Timestamp, origin: GlyphCoord, text: &str) -> Result<usize, GlyphError> {
        let edits = edits_for_text(origin, text)?;
        for (at, glyph) in &edits {
            self.push_edit(now, *at, *glyph);
        }
        Ok(edits.len())
    }

    /// Undo this user's newest batch. Returns false when there is nothing to undo.
    pub fn undo(&mut self, now: Timestamp) -> bool {
        let Some(deltas) = self.projection().undo.peek_undo().cloned() else {
            return false;
        };
        self.dirty.mark_all(deltas.cells());
        self.push_local(now, LocalChange::Undo);
        self.last_edit = None;
        true
    }

    pub fn redo(&mut self, now: Timestamp) -> bool {
        let Some(deltas) = self.projection().undo.peek_redo().cloned() else {
            return false;
        };
        self.dirty.mark_all(deltas.cells());
        self.push_local(now, LocalChange::Redo);
        true
    }

    /// Close the in-progress undo batch. No-op when nothing was written.
    pub fn commit_batch(&mut self, now: Timestamp) -> bool {
        if !self.projection().undo.has_uncommitted() {
            return false;
        }
        self.push_local(now, LocalChange::AddUndoBatch);
        self.last_edit = None;
        true
    }

    /// Show or hide `user`'s writes on this client. Hiding yourself is refused.
    pub fn toggle_user_visibility(&mut self, now: Timestamp, user: UserId) -> bool {
        if user == self.user() {
            return false;
        }
        let grid = &self.projection().grid;
        let touched: Vec<CellCoord> = grid
            .coords()
            .filter(|c| grid.has_changes_by(user, *c))
            .collect();
        self.dirty.mark_all(touched);
        self.push_local(now, LocalChange::ToggleUserVisibility(user));
        true
    }

    /// Report the visible glyph rectangle. When it leaves the requested
    /// window, the cached cells for the new window are applied locally right
    /// away and a request for the overscanned window is queued.
    pub fn set_visible(&mut self, now: Timestamp, visible: GlyphBounds) -> bool {
        let Some(bounds) = self.viewport.on_visible(visible.to_cell_bounds()) else {
            return false;
        };
        let cells = self.projection().grid.cells_in(&bounds);
        debug!(target: "sync.viewport", ?bounds, cached = cells.len(), "view_bounds_changed");
        self.model.apply_local(
            now,
            Change::Client(ClientChange::ViewBoundsChanged { bounds, cells }),
        );
        self.outbox.push(ToServer::ChangeViewBounds(bounds));
        self.dirty.mark_full();
        true
    }

    /// Pixel-space variant of [`Self::set_visible`].
    pub fn set_visible_px(&mut self, now: Timestamp, a: PixelCoord, b: PixelCoord) -> bool {
        let size = self.settings.glyph_size;
        self.set_visible(now, GlyphBounds::new(a.to_glyph(size), b.to_glyph(size)))
    }

    /// Dispatch a decoded user intent.
    pub fn handle_action(&mut self, now: Timestamp, action: UserAction) -> Result<(), GlyphError> {
        match action {
            UserAction::Type { at, text } => {
                self.type_text(now, at, &text)?;
            }
            UserAction::Undo => {
                self.undo(now);
            }
            UserAction::Redo => {
                self.redo(now);
            }
            UserAction::CommitBatch => {
                self.commit_batch(now);
            }
            UserAction::Pan(visible) => {
                self.set_visible(now, visible);
            }
            UserAction::ToggleUser(user) => {
                self.toggle_user_visibility(now, user);
            }
        }
        Ok(())
    }

    /// Consume a message from the server.
    pub fn receive(&mut self, now: Timestamp, msg: ToClient) {
        match msg {
            ToClient::LoadSnapshot(snapshot) => self.reload(*snapshot),
            ToClient::BroadcastChange(changes) => {
                let hints: Vec<Option<Vec<CellCoord>>> = changes.iter().map(Change::touched_cells).collect();
                let moves_window = changes.iter().any(|c| matches!(c, Change::Client(_)));
                let own: Vec<Option<&'static str>> = changes
                    .iter()
                    .map(|c| matches!(c, Change::Local(_)).then(|| c.kind()))
                    .collect();
                let report = self.model.apply_from_server(now, changes);
                for i in report.foreign {
                    if let Some(Some(kind)) = own.get(i) {
                        warn!(target: "model.client", kind, "unmatched_echo");
                    }
                    match hints.get(i) {
                        Some(Some(cells)) => self.dirty.mark_all(cells.iter().copied()),
                        _ => self.dirty.mark_full(),
                    }
                }
                if moves_window {
                    self.dirty.mark_full();
                }
            }
        }
    }

    /// Commit the in-progress batch once edits have been quiet for
    /// `idle_commit`. Returns true when a batch was committed.
    pub fn tick(&mut self, now: Timestamp) -> bool {
        match self.last_edit {
            Some(last) if now.since(last) >= self.settings.idle_commit => {
                self.last_edit = None;
                self.commit_batch(now)
            }
            _ => false,
        }
    }

    /// Messages to send, in order.
    pub fn take_outbox(&mut self) -> Vec<ToServer> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// True once the oldest unacknowledged message is older than `offline_after`.
    pub fn is_offline(&self, now: Timestamp) -> bool {
        self.model
            .oldest_pending()
            .is_some_and(|sent| now.since(sent) > self.settings.offline_after)
    }

    pub fn projection(&self) -> &ClientState {
        self.model.projection()
    }

    pub fn authoritative(&self) -> &ClientState {
        self.model.authoritative()
    }

    pub fn local_model(&self) -> &LocalModel<ClientState> {
        &self.model
    }

    pub fn pending_len(&self) -> usize {
        self.model.pending_len()
    }

    pub fn viewport(&self) -> &ViewportSync {
        &self.viewport
    }

    /// Visible glyphs of `cell` under this client's hidden-user set.
    pub fn flatten(&self, cell: CellCoord) -> Vec<FlatGlyph> {
        self.projection().flatten(cell)
    }

    /// Cells the renderer must refresh since the last call.
    pub fn take_damage(&mut self) -> Damage {
        let bounds = self.projection().view_bounds;
        self.dirty.take_in_bounds(&bounds)
    }
}
