//! End-to-end runs of several client models against one server, with the
//! transport simulated as in-order delivery.

use core_events::{ToClient, ToServer, Timestamp};
use core_geom::{GlyphBounds, GlyphCoord};
use core_grid::UserId;
use core_model::{ClientModel, ClientSettings};
use core_server::{ClientId, Outbound, ServerState};
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};

struct Net {
    server: ServerState,
    clients: BTreeMap<ClientId, ClientModel>,
    now: u64,
}

impl Net {
    fn new() -> Self {
        Self {
            server: ServerState::default(),
            clients: BTreeMap::new(),
            now: 0,
        }
    }

    fn now(&mut self) -> Timestamp {
        self.now += 1;
        Timestamp::from_millis(self.now)
    }

    fn join(&mut self, id: u64, session: &str, visible: GlyphBounds) -> UserId {
        let client = ClientId(id);
        let (user, announced) = self.server.connect(client, session);
        self.deliver(announced);
        let hello = ClientModel::handshake(visible, &ClientSettings::default());
        let mut replies = self.server.handle(client, hello).unwrap();
        assert_eq!(replies.len(), 1);
        let ToClient::LoadSnapshot(snapshot) = replies.remove(0).msg else {
            panic!("handshake must be answered with a snapshot");
        };
        let model = match self.clients.remove(&client) {
            Some(mut existing) => {
                let now = self.now();
                existing.receive(now, ToClient::LoadSnapshot(snapshot));
                existing
            }
            None => ClientModel::new(*snapshot, ClientSettings::default()),
        };
        self.clients.insert(client, model);
        user
    }

    fn client(&mut self, id: u64) -> &mut ClientModel {
        match self.clients.get_mut(&ClientId(id)) {
            Some(c) => c,
            None => panic!("no client {id}"),
        }
    }

    fn deliver(&mut self, out: Vec<Outbound>) {
        for Outbound { to, msg } in out {
            let now = self.now();
            if let Some(c) = self.clients.get_mut(&to) {
                c.receive(now, msg);
            }
        }
    }

    /// Send every outbox, then deliver replies, until everything is quiet.
    fn settle(&mut self) {
        loop {
            let mut sent: Vec<(ClientId, ToServer)> = Vec::new();
            for (id, c) in self.clients.iter_mut() {
                sent.extend(c.take_outbox().into_iter().map(|m| (*id, m)));
            }
            if sent.is_empty() {
                break;
            }
            for (id, msg) in sent {
                let out = self.server.handle(id, msg).unwrap();
                self.deliver(out);
            }
        }
    }

    fn rows(&self, id: u64, area: &GlyphBounds) -> Vec<String> {
        self.clients[&ClientId(id)].projection().render_rows(area)
    }

    fn server_rows(&self, area: &GlyphBounds) -> Vec<String> {
        let hidden = BTreeSet::new();
        (area.min.y..=area.max.y)
            .map(|y| {
                let row: String = (area.min.x..=area.max.x)
                    .map(|x| self.server.grid().glyph_at(&hidden, GlyphCoord::new(x, y)).glyph.0)
                    .collect();
                row.trim_end().to_string()
            })
            .collect()
    }
}

fn area() -> GlyphBounds {
    GlyphBounds::new(GlyphCoord::new(0, 0), GlyphCoord::new(31, 7))
}

#[test]
fn concurrent_clients_converge() {
    let mut net = Net::new();
    for (id, session) in [(1, "ann"), (2, "bo"), (3, "cy")] {
        net.join(id, session, area());
    }

    let t = net.now();
    net.client(1).type_text(t, GlyphCoord::new(0, 0), "hello").unwrap();
    net.client(2).type_text(t, GlyphCoord::new(0, 0), "HE").unwrap();
    net.client(3).type_text(t, GlyphCoord::new(0, 2), "third\nline").unwrap();
    net.settle();

    let t = net.now();
    net.client(2).commit_batch(t);
    net.client(2).undo(t);
    net.client(1).edit(t, GlyphCoord::new(10, 1), '#').unwrap();
    net.settle();

    let expected = net.server_rows(&area());
    assert_eq!(expected[0], "hello");
    assert_eq!(expected[1], "          #");
    assert_eq!(expected[2], "third");
    assert_eq!(expected[3], "line");
    for id in 1..=3 {
        assert_eq!(net.rows(id, &area()), expected, "client {id}");
        assert_eq!(net.client(id).pending_len(), 0);
        let c = net.client(id);
        assert_eq!(c.projection(), c.authoritative());
    }
}

#[test]
fn undo_only_retracts_own_writes() {
    let mut net = Net::new();
    net.join(1, "ann", area());
    net.join(2, "bo", area());

    let t = net.now();
    net.client(1).edit(t, GlyphCoord::new(0, 0), 'a').unwrap();
    net.client(1).commit_batch(t);
    net.settle();
    let t = net.now();
    net.client(2).edit(t, GlyphCoord::new(0, 0), 'b').unwrap();
    net.client(2).commit_batch(t);
    net.settle();

    let t = net.now();
    assert!(net.client(1).undo(t));
    net.settle();

    assert_eq!(net.rows(1, &area())[0], "b");
    assert_eq!(net.rows(2, &area())[0], "b");

    let t = net.now();
    assert!(net.client(2).undo(t));
    net.settle();
    assert_eq!(net.rows(1, &area())[0], "");
    assert_eq!(net.server_rows(&area())[0], "");
}

#[test]
fn panning_streams_cells_written_out_of_view() {
    let mut net = Net::new();
    net.join(1, "ann", area());
    net.join(2, "bo", area());

    let far = GlyphBounds::new(GlyphCoord::new(320, 320), GlyphCoord::new(351, 327));
    let t = net.now();
    net.client(1).set_visible(t, far);
    net.settle();
    let t = net.now();
    net.client(1).type_text(t, GlyphCoord::new(320, 320), "far").unwrap();
    net.settle();
    assert_eq!(net.rows(2, &far)[0], "");

    let t = net.now();
    assert!(net.client(2).set_visible(t, far));
    net.settle();
    assert_eq!(net.rows(2, &far)[0], "far");
    assert_eq!(net.client(2).pending_len(), 0);
}

#[test]
fn hidden_user_disappears_for_one_client_only() {
    let mut net = Net::new();
    let ann = net.join(1, "ann", area());
    net.join(2, "bo", area());
    let t = net.now();
    net.client(1).edit(t, GlyphCoord::new(1, 1), 'x').unwrap();
    net.settle();

    let t = net.now();
    assert!(net.client(2).toggle_user_visibility(t, ann));
    net.settle();
    assert_eq!(net.rows(2, &area())[1], "");
    assert_eq!(net.rows(1, &area())[1], " x");
}

#[test]
fn reconnect_replaces_lost_pending_work() {
    let mut net = Net::new();
    let ann = net.join(1, "ann", area());
    let t = net.now();
    net.client(1).edit(t, GlyphCoord::new(0, 0), 'k').unwrap();
    net.settle();

    let t = net.now();
    net.client(1).edit(t, GlyphCoord::new(1, 0), 'z').unwrap();
    // Connection drops: the outbox never reaches the server.
    let lost = net.client(1).take_outbox();
    assert_eq!(lost.len(), 1);
    net.server.disconnect(ClientId(1));

    let again = net.join(1, "ann", area());
    assert_eq!(again, ann);
    let c = net.client(1);
    assert_eq!(c.pending_len(), 0);
    assert_eq!(net.rows(1, &area())[0], "k");
}

#[test]
fn paste_longer_than_max_batch_converges() {
    let wide = GlyphBounds::new(GlyphCoord::new(0, 0), GlyphCoord::new(319, 1));
    let mut net = Net::new();
    net.join(1, "ann", wide);
    net.join(2, "bo", wide);
    let limit = net.server.settings().max_batch;
    let paste = "x".repeat(limit + 44);

    let t = net.now();
    assert_eq!(net.client(1).type_text(t, GlyphCoord::new(0, 0), &paste).unwrap(), limit + 44);
    net.settle();
    assert_eq!(net.client(1).pending_len(), 0);

    let t = net.now();
    net.client(1).edit(t, GlyphCoord::new(0, 1), 'y').unwrap();
    net.settle();

    let expected = net.server_rows(&wide);
    assert_eq!(expected, vec![paste.clone(), "y".to_string()]);
    for id in 1..=2 {
        assert_eq!(net.rows(id, &wide), expected, "client {id}");
        let c = net.client(id);
        assert_eq!(c.pending_len(), 0);
        assert_eq!(c.projection(), c.authoritative());
    }
}
