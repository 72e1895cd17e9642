//! Client-side canvas state and the deterministic update function.
//!
//! `ClientState` is the value a client's local model replicates: the resident
//! window of the grid, this user's undo history, the user registry and the
//! set of users whose writes are hidden from view. [`ClientState::update`]
//! is the single place a [`Change`] mutates it. The same function serves both
//! the authoritative copy (changes the server confirmed) and the optimistic
//! projection (authoritative copy plus still-pending local changes), so it
//! must stay a pure function of `(state, change)`: no clocks, no randomness,
//! no IO.
//!
//! Invariants (hold after every `update`):
//! * Every resident cell lies inside `view_bounds`. Edits outside it, local
//!   or remote, are not applied; a local one still counts toward the undo
//!   batch so this user's history matches the server's.
//! * `hidden` never contains `user` (hiding yourself is ignored).

use core_events::{Change, ClientChange, LoadSnapshot, LocalChange, ServerChange, Timestamp, UserData};
use core_geom::{CellBounds, CellCoord, GlyphBounds, GlyphCoord};
use core_grid::{FlatGlyph, Grid, UndoEngine, UserId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientState {
    pub user: UserId,
    pub grid: Grid,
    pub undo: UndoEngine,
    pub users: BTreeMap<UserId, UserData>,
    pub hidden: BTreeSet<UserId>,
    pub view_bounds: CellBounds,
}

impl ClientState {
    pub fn from_snapshot(snapshot: LoadSnapshot) -> Self {
        let mut hidden = snapshot.hidden;
        hidden.remove(&snapshot.user);
        Self {
            user: snapshot.user,
            grid: snapshot.grid,
            undo: snapshot.undo,
            users: snapshot.users.into_iter().collect(),
            hidden,
            view_bounds: snapshot.bounds,
        }
    }

    /// Apply one change in place.
    pub fn update(&mut self, time: Timestamp, change: &Change) {
        trace!(target: "state.update", time = time.as_millis(), kind = change.kind(), "update");
        match change {
            Change::Local(local) => self.update_local(local),
            Change::Server(server) => self.update_server(server),
            Change::Client(ClientChange::ViewBoundsChanged { bounds, cells }) => {
                self.grid.retain_within(bounds);
                for (coord, cell) in cells {
                    if bounds.contains(*coord) {
                        self.grid.insert_cell(*coord, cell.clone());
                    }
                }
                self.view_bounds = *bounds;
            }
        }
    }

    fn update_local(&mut self, change: &LocalChange) {
        match change {
            LocalChange::Edit { cell, local, glyph } => {
                if self.view_bounds.contains(*cell) {
                    self.grid.add_change(self.user, *cell, *local, *glyph);
                }
                self.undo.note_write(*cell);
            }
            LocalChange::Undo => {
                if let Some(deltas) = self.undo.undo() {
                    self.grid.move_undo_point(self.user, &deltas);
                }
            }
            LocalChange::Redo => {
                if let Some(deltas) = self.undo.redo() {
                    self.grid.move_undo_point(self.user, &deltas);
                }
            }
            LocalChange::AddUndoBatch => {
                self.undo.add_batch();
            }
            LocalChange::ToggleUserVisibility(other) => {
                if *other == self.user {
                    return;
                }
                if !self.hidden.remove(other) {
                    self.hidden.insert(*other);
                }
            }
        }
    }

    fn update_server(&mut self, change: &ServerChange) {
        match change {
            ServerChange::Edit {
                cell,
                local,
                glyph,
                author,
            } => {
                // Cells outside the resident window are not tracked; the
                // server streams their full contents when the window moves.
                if self.view_bounds.contains(*cell) {
                    self.grid.add_change(*author, *cell, *local, *glyph);
                }
            }
            ServerChange::UndoPoint { user, deltas } => {
                self.grid.move_undo_point(*user, deltas);
            }
            ServerChange::UserJoined { user, data } => {
                self.users.insert(*user, *data);
            }
        }
    }

    pub fn flatten(&self, cell: CellCoord) -> Vec<FlatGlyph> {
        self.grid.flatten(&self.hidden, cell)
    }

    pub fn glyph_at(&self, at: GlyphCoord) -> FlatGlyph {
        self.grid.glyph_at(&self.hidden, at)
    }

    pub fn user_data(&self, user: UserId) -> Option<&UserData> {
        self.users.get(&user)
    }

    /// Visible text of `area`, one string per row with trailing blanks trimmed.
    pub fn render_rows(&self, area: &GlyphBounds) -> Vec<String> {
        if area.is_empty() {
            return Vec::new();
        }
        (area.min.y..=area.max.y)
            .map(|y| {
                let row: String = (area.min.x..=area.max.x)
                    .map(|x| self.glyph_at(GlyphCoord::new(x, y)).glyph.0)
                    .collect();
                row.trim_end().to_string()
            })
            .collect()
    }
}
