//! Authoritative server state.
//!
//! The server owns the full grid, every user's undo history and hidden set,
//! and the list of live connections with the window each one has resident.
//! It is transport agnostic: [`ServerState::handle`] takes one decoded
//! message and returns the messages to deliver, which keeps the ordering
//! contract easy to see. For any single connection, replies are produced in
//! the order its requests arrive, and the echo of a `SubmitEdits` is a single
//! `BroadcastChange` listing the accepted local changes in submission order.
//!
//! Other connections never see a client's local changes verbatim; they get
//! the derived [`ServerChange`] form (`Edit` with the author filled in,
//! `UndoPoint` with the depth deltas the undo produced). Edits are only
//! forwarded to connections whose resident window contains the cell.

mod persist;

pub use persist::{PersistedState, PersistedUser, load_state, save_state};

use core_config::Config;
use core_events::{
    Change, ClientChange, LoadSnapshot, LocalChange, NonEmpty, ServerChange, ToClient, ToServer,
    UserData,
};
use core_geom::{CellBounds, CellCoord};
use core_grid::{CellDeltas, Glyph, GlyphError, Grid, UNDO_HISTORY_MAX, UndoEngine, UserId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Transport-level connection handle. A user may reconnect under a new one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A message addressed to one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub to: ClientId,
    pub msg: ToClient,
}

/// Why a message (or one change inside it) was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("connection {0} is not known")]
    UnknownClient(ClientId),
    #[error("connection {0} submitted changes before requesting its bounds")]
    NoHandshake(ClientId),
    #[error("batch of {len} changes exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error(transparent)]
    InvalidGlyph(#[from] GlyphError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub max_batch: usize,
    pub history_max: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_batch: 256,
            history_max: UNDO_HISTORY_MAX,
        }
    }
}

impl ServerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_batch: cfg.file.server.max_batch.max(1),
            history_max: cfg.file.undo.history_max,
        }
    }
}

#[derive(Debug, Clone)]
struct UserRecord {
    session: String,
    data: UserData,
    undo: UndoEngine,
    hidden: BTreeSet<UserId>,
}

#[derive(Debug, Clone, Copy)]
struct Connection {
    user: UserId,
    bounds: Option<CellBounds>,
}

#[derive(Debug)]
pub struct ServerState {
    grid: Grid,
    users: BTreeMap<UserId, UserRecord>,
    connections: BTreeMap<ClientId, Connection>,
    next_user: u32,
    settings: ServerSettings,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(ServerSettings::default())
    }
}

/// Per-connection accumulator for derived changes.
#[derive(Default)]
struct Fanout {
    batches: BTreeMap<ClientId, Vec<Change>>,
}

impl Fanout {
    fn push(&mut self, to: ClientId, change: Change) {
        self.batches.entry(to).or_default().push(change);
    }

    fn finish(self, out: &mut Vec<Outbound>) {
        for (to, changes) in self.batches {
            if let Some(batch) = NonEmpty::from_vec(changes) {
                out.push(Outbound {
                    to,
                    msg: ToClient::BroadcastChange(batch),
                });
            }
        }
    }
}

impl ServerState {
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            grid: Grid::new(),
            users: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_user: 1,
            settings,
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn user_of(&self, client: ClientId) -> Option<UserId> {
        self.connections.get(&client).map(|c| c.user)
    }

    pub fn users(&self) -> impl Iterator<Item = (UserId, &UserData)> {
        self.users.iter().map(|(id, rec)| (*id, &rec.data))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn undo_of(&self, user: UserId) -> Option<&UndoEngine> {
        self.users.get(&user).map(|rec| &rec.undo)
    }

    /// Register a connection. A known `session` resumes its user; anything
    /// else creates a user and announces it to every other connection.
    pub fn connect(&mut self, client: ClientId, session: &str) -> (UserId, Vec<Outbound>) {
        let known = self
            .users
            .iter()
            .find(|(_, rec)| rec.session == session)
            .map(|(id, _)| *id);
        let mut out = Vec::new();
        let user = match known {
            Some(user) => {
                info!(target: "server", %client, %user, "session_resumed");
                user
            }
            None => {
                let user = UserId(self.next_user);
                self.next_user += 1;
                let data = UserData::for_user(user);
                self.users.insert(
                    user,
                    UserRecord {
                        session: session.to_string(),
                        data,
                        undo: UndoEngine::with_history_max(self.settings.history_max),
                        hidden: BTreeSet::new(),
                    },
                );
                info!(target: "server", %client, %user, "user_joined");
                let joined = Change::Server(ServerChange::UserJoined { user, data });
                for other in self.connections.keys() {
                    out.push(Outbound {
                        to: *other,
                        msg: ToClient::BroadcastChange(NonEmpty::new(joined.clone())),
                    });
                }
                user
            }
        };
        self.connections.insert(client, Connection { user, bounds: None });
        (user, out)
    }

    /// Forget a connection. The user, their history and writes stay.
    pub fn disconnect(&mut self, client: ClientId) {
        if let Some(conn) = self.connections.remove(&client) {
            info!(target: "server", %client, user = %conn.user, "disconnected");
        }
    }

    /// Process one message from `client`.
    ///
    /// Whole-message problems are returned as errors and nothing is applied.
    /// Individual invalid changes inside an otherwise valid batch are dropped
    /// and logged; they are neither applied nor echoed.
    pub fn handle(&mut self, client: ClientId, msg: ToServer) -> Result<Vec<Outbound>, RejectReason> {
        let conn = *self
            .connections
            .get(&client)
            .ok_or(RejectReason::UnknownClient(client))?;
        match msg {
            ToServer::RequestFullBounds(bounds) => Ok(vec![self.load_snapshot(client, conn.user, bounds)]),
            ToServer::ChangeViewBounds(bounds) => {
                self.set_bounds(client, bounds);
                let cells = self.grid.cells_in(&bounds);
                debug!(target: "server", %client, ?bounds, cells = cells.len(), "view_bounds_changed");
                Ok(vec![Outbound {
                    to: client,
                    msg: ToClient::BroadcastChange(NonEmpty::new(Change::Client(
                        ClientChange::ViewBoundsChanged { bounds, cells },
                    ))),
                }])
            }
            ToServer::SubmitEdits(batch) => {
                if conn.bounds.is_none() {
                    return Err(RejectReason::NoHandshake(client));
                }
                if batch.len() > self.settings.max_batch {
                    return Err(RejectReason::BatchTooLarge {
                        len: batch.len(),
                        max: self.settings.max_batch,
                    });
                }
                Ok(self.submit(client, conn.user, batch))
            }
        }
    }

    fn set_bounds(&mut self, client: ClientId, bounds: CellBounds) {
        if let Some(conn) = self.connections.get_mut(&client) {
            conn.bounds = Some(bounds);
        }
    }

    fn load_snapshot(&mut self, client: ClientId, user: UserId, bounds: CellBounds) -> Outbound {
        self.set_bounds(client, bounds);
        let grid = Grid::from(self.grid.cells_in(&bounds));
        let (undo, hidden) = match self.users.get(&user) {
            Some(rec) => (rec.undo.clone(), rec.hidden.clone()),
            None => (UndoEngine::with_history_max(self.settings.history_max), BTreeSet::new()),
        };
        info!(target: "server", %client, %user, ?bounds, cells = grid.len(), "load_snapshot");
        Outbound {
            to: client,
            msg: ToClient::LoadSnapshot(Box::new(LoadSnapshot {
                grid,
                user,
                users: self.users().map(|(id, data)| (id, *data)).collect(),
                hidden,
                undo,
                bounds,
            })),
        }
    }

    fn submit(&mut self, client: ClientId, user: UserId, batch: NonEmpty<LocalChange>) -> Vec<Outbound> {
        let mut echo = Vec::with_capacity(batch.len());
        let mut fanout = Fanout::default();
        for change in batch {
            match self.apply_local(user, &change) {
                Ok(derived) => {
                    if let Some(derived) = derived {
                        self.route(client, derived, &mut fanout);
                    }
                    echo.push(Change::Local(change));
                }
                Err(reason) => {
                    warn!(target: "server", %client, %user, %reason, "change_rejected");
                }
            }
        }
        let mut out = Vec::new();
        if let Some(batch) = NonEmpty::from_vec(echo) {
            debug!(target: "server", %client, %user, accepted = batch.len(), "echo");
            out.push(Outbound {
                to: client,
                msg: ToClient::BroadcastChange(batch),
            });
        }
        fanout.finish(&mut out);
        out
    }

    /// Apply one local change authoritatively, returning what other
    /// connections should see.
    fn apply_local(&mut self, user: UserId, change: &LocalChange) -> Result<Option<ServerChange>, RejectReason> {
        let Some(rec) = self.users.get_mut(&user) else {
            return Ok(None);
        };
        let derived = match change {
            LocalChange::Edit { cell, local, glyph } => {
                let glyph = Glyph::checked(glyph.0)?;
                self.grid.add_change(user, *cell, *local, glyph);
                rec.undo.note_write(*cell);
                Some(ServerChange::Edit {
                    cell: *cell,
                    local: *local,
                    glyph,
                    author: user,
                })
            }
            LocalChange::Undo => rec.undo.undo().map(|deltas| {
                self.grid.move_undo_point(user, &deltas);
                ServerChange::UndoPoint { user, deltas }
            }),
            LocalChange::Redo => rec.undo.redo().map(|deltas| {
                self.grid.move_undo_point(user, &deltas);
                ServerChange::UndoPoint { user, deltas }
            }),
            LocalChange::AddUndoBatch => {
                rec.undo.add_batch();
                None
            }
            LocalChange::ToggleUserVisibility(other) => {
                if *other != user && !rec.hidden.remove(other) {
                    rec.hidden.insert(*other);
                }
                None
            }
        };
        Ok(derived)
    }

    /// Queue `change` for every other connection that can see it.
    fn route(&self, from: ClientId, change: ServerChange, fanout: &mut Fanout) {
        for (id, conn) in &self.connections {
            if *id == from {
                continue;
            }
            let Some(bounds) = conn.bounds else {
                continue;
            };
            match &change {
                ServerChange::Edit { cell, .. } => {
                    if bounds.contains(*cell) {
                        fanout.push(*id, Change::Server(change.clone()));
                    }
                }
                ServerChange::UndoPoint { user, deltas } => {
                    let visible: CellDeltas = deltas.within(&bounds);
                    if !visible.is_empty() {
                        fanout.push(
                            *id,
                            Change::Server(ServerChange::UndoPoint {
                                user: *user,
                                deltas: visible,
                            }),
                        );
                    }
                }
                ServerChange::UserJoined { .. } => fanout.push(*id, Change::Server(change.clone())),
            }
        }
    }

    /// Cells currently stored, for diagnostics.
    pub fn cell_coords(&self) -> Vec<CellCoord> {
        let mut coords: Vec<CellCoord> = self.grid.coords().collect();
        coords.sort_unstable();
        coords
    }
}
