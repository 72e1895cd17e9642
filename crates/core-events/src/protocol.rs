//! Messages exchanged between a client's local model and the server.
//!
//! The closed [`Change`] set is what the update function consumes. Local
//! changes originate in a client and are echoed back to it verbatim once the
//! server accepts them; server changes are the derived form other clients
//! receive; client changes are bookkeeping the client and server agree on
//! (the resident viewport window).

use core_geom::{CellBounds, CellCoord, LocalCoord};
use core_grid::{Cell, CellDeltas, Glyph, Grid, UndoEngine, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds on a monotonic-enough wall clock. Only differences matter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

/// A list with at least one element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonEmpty<T> {
    pub head: T,
    pub tail: Vec<T>,
}

impl<T> NonEmpty<T> {
    pub fn new(head: T) -> Self {
        Self {
            head,
            tail: Vec::new(),
        }
    }

    pub fn from_vec(mut items: Vec<T>) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let head = items.remove(0);
        Some(Self { head, tail: items })
    }

    pub fn push(&mut self, item: T) {
        self.tail.push(item);
    }

    pub fn len(&self) -> usize {
        1 + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first(&self) -> &T {
        &self.head
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        std::iter::once(&self.head).chain(self.tail.iter())
    }

    pub fn into_vec(self) -> Vec<T> {
        let mut out = Vec::with_capacity(1 + self.tail.len());
        out.push(self.head);
        out.extend(self.tail);
        out
    }
}

impl<T> IntoIterator for NonEmpty<T> {
    type Item = T;
    type IntoIter = std::iter::Chain<std::iter::Once<T>, std::vec::IntoIter<T>>;

    fn into_iter(self) -> Self::IntoIter {
        std::iter::once(self.head).chain(self.tail)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Per-user presentation data, looked up by id and never stored in writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub color: Rgb,
}

const PALETTE: [Rgb; 8] = [
    Rgb { r: 0xe6, g: 0x19, b: 0x4b },
    Rgb { r: 0x3c, g: 0xb4, b: 0x4b },
    Rgb { r: 0x43, g: 0x63, b: 0xd8 },
    Rgb { r: 0xf5, g: 0x82, b: 0x31 },
    Rgb { r: 0x91, g: 0x1e, b: 0xb4 },
    Rgb { r: 0x42, g: 0xd4, b: 0xf4 },
    Rgb { r: 0xf0, g: 0x32, b: 0xe6 },
    Rgb { r: 0x80, g: 0x80, b: 0x00 },
];

impl UserData {
    /// Deterministic palette color for a freshly registered user.
    pub fn for_user(user: UserId) -> Self {
        Self {
            color: PALETTE[user.0 as usize % PALETTE.len()],
        }
    }
}

/// Edits a client makes to its own copy and submits to the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalChange {
    Edit {
        cell: CellCoord,
        local: LocalCoord,
        glyph: Glyph,
    },
    Undo,
    Redo,
    AddUndoBatch,
    ToggleUserVisibility(UserId),
}

/// Changes derived by the server from other clients' activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerChange {
    Edit {
        cell: CellCoord,
        local: LocalCoord,
        glyph: Glyph,
        author: UserId,
    },
    UndoPoint {
        user: UserId,
        deltas: CellDeltas,
    },
    UserJoined {
        user: UserId,
        data: UserData,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientChange {
    /// The resident window moved to `bounds`; `cells` are the cell contents
    /// known for it (cached ones when predicted locally, authoritative ones
    /// when sent by the server).
    ViewBoundsChanged {
        bounds: CellBounds,
        cells: Vec<(CellCoord, Cell)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    Local(LocalChange),
    Server(ServerChange),
    Client(ClientChange),
}

impl Change {
    /// Whether `incoming` from the server acknowledges `self`, a message this
    /// client queued earlier.
    ///
    /// Local changes are echoed verbatim and compare structurally. Viewport
    /// changes compare by bounds only: the server's reply carries
    /// authoritative cells where the prediction carried cached ones.
    pub fn matches_echo(&self, incoming: &Change) -> bool {
        match (self, incoming) {
            (Change::Local(sent), Change::Local(echo)) => sent == echo,
            (
                Change::Client(ClientChange::ViewBoundsChanged { bounds: sent, .. }),
                Change::Client(ClientChange::ViewBoundsChanged { bounds: echo, .. }),
            ) => sent == echo,
            _ => false,
        }
    }

    /// Cells whose flattened output this change can alter on a client that
    /// did not originate it. `None` means the whole resident window.
    pub fn touched_cells(&self) -> Option<Vec<CellCoord>> {
        match self {
            Change::Server(ServerChange::Edit { cell, .. })
            | Change::Local(LocalChange::Edit { cell, .. }) => Some(vec![*cell]),
            Change::Server(ServerChange::UndoPoint { deltas, .. }) => Some(deltas.cells().collect()),
            Change::Server(ServerChange::UserJoined { .. })
            | Change::Local(LocalChange::AddUndoBatch) => Some(Vec::new()),
            Change::Local(LocalChange::Undo | LocalChange::Redo | LocalChange::ToggleUserVisibility(_))
            | Change::Client(_) => None,
        }
    }

    /// Short discriminant for logs; never includes payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Local(LocalChange::Edit { .. }) => "local_edit",
            Change::Local(LocalChange::Undo) => "local_undo",
            Change::Local(LocalChange::Redo) => "local_redo",
            Change::Local(LocalChange::AddUndoBatch) => "local_add_undo_batch",
            Change::Local(LocalChange::ToggleUserVisibility(_)) => "local_toggle_user",
            Change::Server(ServerChange::Edit { .. }) => "server_edit",
            Change::Server(ServerChange::UndoPoint { .. }) => "server_undo_point",
            Change::Server(ServerChange::UserJoined { .. }) => "server_user_joined",
            Change::Client(ClientChange::ViewBoundsChanged { .. }) => "client_view_bounds",
        }
    }
}

impl From<LocalChange> for Change {
    fn from(change: LocalChange) -> Self {
        Change::Local(change)
    }
}

impl From<ServerChange> for Change {
    fn from(change: ServerChange) -> Self {
        Change::Server(change)
    }
}

impl From<ClientChange> for Change {
    fn from(change: ClientChange) -> Self {
        Change::Client(change)
    }
}

/// Everything a client needs to start (or restart) a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub grid: Grid,
    pub user: UserId,
    pub users: Vec<(UserId, UserData)>,
    pub hidden: BTreeSet<UserId>,
    pub undo: UndoEngine,
    pub bounds: CellBounds,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToServer {
    /// Handshake: stream everything inside `bounds` as a `LoadSnapshot`.
    RequestFullBounds(CellBounds),
    SubmitEdits(NonEmpty<LocalChange>),
    ChangeViewBounds(CellBounds),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToClient {
    LoadSnapshot(Box<LoadSnapshot>),
    BroadcastChange(NonEmpty<Change>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geom::CellCoord;
    use pretty_assertions::assert_eq;

    fn vb(x: i32, cells: Vec<(CellCoord, Cell)>) -> Change {
        Change::Client(ClientChange::ViewBoundsChanged {
            bounds: CellBounds::new(CellCoord::new(0, 0), CellCoord::new(x, x)),
            cells,
        })
    }

    #[test]
    fn touched_cells_of_undo_point_follow_deltas() {
        let mut deltas = CellDeltas::new();
        deltas.add(CellCoord::new(2, 0), -1);
        deltas.add(CellCoord::new(-1, 4), -3);
        let change = Change::Server(ServerChange::UndoPoint {
            user: UserId(3),
            deltas,
        });
        assert_eq!(
            change.touched_cells(),
            Some(vec![CellCoord::new(-1, 4), CellCoord::new(2, 0)])
        );
        assert_eq!(Change::Local(LocalChange::Undo).touched_cells(), None);
    }

    #[test]
    fn view_bounds_echo_ignores_cell_payload() {
        let predicted = vb(2, Vec::new());
        let reply = vb(2, vec![(CellCoord::new(1, 1), Cell::new())]);
        assert!(predicted.matches_echo(&reply));
        assert!(!predicted.matches_echo(&vb(3, Vec::new())));
    }

    #[test]
    fn local_echo_is_structural() {
        let edit = |c| {
            Change::Local(LocalChange::Edit {
                cell: CellCoord::new(0, 0),
                local: LocalCoord::new(1, 1),
                glyph: Glyph(c),
            })
        };
        assert!(edit('a').matches_echo(&edit('a')));
        assert!(!edit('a').matches_echo(&edit('b')));
        assert!(!Change::Local(LocalChange::Undo).matches_echo(&Change::Local(LocalChange::Redo)));
    }

    #[test]
    fn server_changes_never_acknowledge() {
        let foreign = Change::Server(ServerChange::Edit {
            cell: CellCoord::new(0, 0),
            local: LocalCoord::new(1, 1),
            glyph: Glyph('a'),
            author: UserId(2),
        });
        let mine = Change::Local(LocalChange::Edit {
            cell: CellCoord::new(0, 0),
            local: LocalCoord::new(1, 1),
            glyph: Glyph('a'),
        });
        assert!(!mine.matches_echo(&foreign));
    }

    #[test]
    fn non_empty_from_vec() {
        assert!(NonEmpty::<u8>::from_vec(Vec::new()).is_none());
        let ne = NonEmpty::from_vec(vec![1, 2, 3]).unwrap();
        assert_eq!(ne.len(), 3);
        assert_eq!(*ne.first(), 1);
        assert_eq!(ne.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn timestamp_since_saturates() {
        let a = Timestamp::from_millis(100);
        let b = a + Duration::from_millis(50);
        assert_eq!(b.since(a), Duration::from_millis(50));
        assert_eq!(a.since(b), Duration::ZERO);
    }

    #[test]
    fn broadcast_survives_json_transport() {
        let mut cell = Cell::new();
        cell.add_change(UserId(2), LocalCoord::new(3, 0), Glyph('w'));
        let mut deltas = CellDeltas::new();
        deltas.add(CellCoord::new(1, 1), -2);
        let msg = ToClient::BroadcastChange(NonEmpty {
            head: Change::Local(LocalChange::Edit {
                cell: CellCoord::new(-1, 0),
                local: LocalCoord::new(15, 15),
                glyph: Glyph('a'),
            }),
            tail: vec![
                Change::Server(ServerChange::UndoPoint {
                    user: UserId(2),
                    deltas,
                }),
                vb(1, vec![(CellCoord::new(0, 0), cell)]),
            ],
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: ToClient = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        let ToClient::BroadcastChange(changes) = back else {
            panic!("decoded into a different message");
        };
        assert_eq!(
            changes.iter().map(Change::kind).collect::<Vec<_>>(),
            vec!["local_edit", "server_undo_point", "client_view_bounds"]
        );
    }

    #[test]
    fn empty_batch_is_not_a_broadcast() {
        let err = serde_json::from_str::<NonEmpty<Change>>(r#"{"tail":[]}"#).unwrap_err();
        assert!(err.to_string().contains("head"), "{err}");
    }
}
