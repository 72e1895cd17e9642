//! glyphgrid entrypoint.
//!
//! Runs one authoritative server and a handful of scripted clients as tokio
//! tasks connected by bounded channels, waits until every client has played
//! its script and drained its pending queue, then prints what each client
//! sees and whether they all agree with the server.
use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use core_config::{Config, load_from};
use core_events::{
    CHANNEL_SEND_FAILURES, EVENT_CHANNEL_CAP, Event, EventSourceRegistry, ScriptedActionSource,
    TICKS_EMITTED, TickEventSource, ToClient, ToServer, Timestamp, UserAction,
};
use core_geom::{GlyphBounds, GlyphCoord};
use core_grid::{Grid, UserId};
use core_model::{ClientModel, ClientSettings, Damage};
use core_server::{
    ClientId, Outbound, PersistedState, ServerSettings, ServerState, load_state, save_state,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;

const TICK_INTERVAL: Duration = Duration::from_millis(50);
const SCRIPT_PACE: Duration = Duration::from_millis(5);

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "glyphgrid", version, about = "Collaborative glyph canvas simulation")]
struct Args {
    /// Number of simulated clients.
    #[arg(long = "clients", default_value_t = 3)]
    pub clients: usize,
    /// Optional configuration file path (overrides discovery of `glyphgrid.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Server state file: loaded at startup when present, written on exit.
    #[arg(long = "state")]
    pub state: Option<PathBuf>,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("glyphgrid.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "glyphgrid.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        if tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
            .is_ok()
        {
            self.log_guard = Some(guard);
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Requests a client task makes of the server task.
enum ServerRequest {
    Connect {
        client: ClientId,
        session: String,
        events: mpsc::Sender<Event>,
        hello: ToServer,
    },
    Message {
        client: ClientId,
        msg: ToServer,
    },
    Disconnect(ClientId),
    /// Tell every client to stop, then hand back the final state.
    Shutdown {
        reply: oneshot::Sender<PersistedState>,
    },
}

async fn deliver(routes: &BTreeMap<ClientId, mpsc::Sender<Event>>, out: Vec<Outbound>) {
    for Outbound { to, msg } in out {
        let Some(tx) = routes.get(&to) else {
            continue;
        };
        if tx.send(Event::Inbound(msg)).await.is_err() {
            CHANNEL_SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
            debug!(target: "runtime", client = %to, "client_channel_closed");
        }
    }
}

async fn run_server(mut state: ServerState, mut rx: mpsc::Receiver<ServerRequest>) {
    let mut routes: BTreeMap<ClientId, mpsc::Sender<Event>> = BTreeMap::new();
    while let Some(req) = rx.recv().await {
        match req {
            ServerRequest::Connect {
                client,
                session,
                events,
                hello,
            } => {
                routes.insert(client, events);
                let (_, announced) = state.connect(client, &session);
                deliver(&routes, announced).await;
                match state.handle(client, hello) {
                    Ok(out) => deliver(&routes, out).await,
                    Err(reason) => warn!(target: "server", %client, %reason, "handshake_rejected"),
                }
            }
            ServerRequest::Message { client, msg } => match state.handle(client, msg) {
                Ok(out) => deliver(&routes, out).await,
                Err(reason) => warn!(target: "server", %client, %reason, "message_rejected"),
            },
            ServerRequest::Disconnect(client) => {
                state.disconnect(client);
                routes.remove(&client);
            }
            ServerRequest::Shutdown { reply } => {
                for tx in routes.values() {
                    let _ = tx.send(Event::Shutdown).await;
                }
                let _ = reply.send(state.to_persisted());
                break;
            }
        }
    }
    info!(target: "server", "server_stopped");
}

/// The shared canvas area every simulated client looks at.
fn view() -> GlyphBounds {
    GlyphBounds::new(GlyphCoord::new(0, 0), GlyphCoord::new(47, 11))
}

fn script_for(index: usize) -> Vec<UserAction> {
    let row = 2 * index as i32;
    vec![
        UserAction::Pan(view()),
        UserAction::Type {
            at: GlyphCoord::new(0, row),
            text: format!("hello from client {index}"),
        },
        UserAction::CommitBatch,
        UserAction::Type {
            at: GlyphCoord::new(0, row + 1),
            text: "scratch".to_string(),
        },
        UserAction::CommitBatch,
        UserAction::Undo,
        UserAction::Redo,
        UserAction::Undo,
        UserAction::Type {
            at: GlyphCoord::new(40, 0),
            text: index.to_string(),
        },
        UserAction::CommitBatch,
    ]
}

#[derive(Debug)]
struct ClientReport {
    client: ClientId,
    user: UserId,
    rows: Vec<String>,
}

async fn run_client(
    client: ClientId,
    script: Vec<UserAction>,
    settings: ClientSettings,
    server: mpsc::Sender<ServerRequest>,
    idle: mpsc::Sender<ClientId>,
) -> Result<ClientReport> {
    let (tx, mut rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    server
        .send(ServerRequest::Connect {
            client,
            session: format!("session-{}", client.0),
            events: tx.clone(),
            hello: ClientModel::handshake(view(), &settings),
        })
        .await
        .context("server task is gone")?;

    let mut model = loop {
        match rx.recv().await {
            Some(Event::Inbound(ToClient::LoadSnapshot(snapshot))) => {
                break ClientModel::new(*snapshot, settings);
            }
            Some(Event::Shutdown) | None => bail!("{client} stopped before its snapshot arrived"),
            Some(other) => trace!(target: "runtime", %client, ?other, "event_before_snapshot"),
        }
    };

    let script_len = script.len();
    let mut registry = EventSourceRegistry::new();
    registry.register(ScriptedActionSource::new(script, SCRIPT_PACE));
    registry.register(TickEventSource::new(TICK_INTERVAL));
    let handles = registry.spawn_all(&tx);
    drop(tx);

    let mut played = 0usize;
    let mut reported = false;
    while let Some(event) = rx.recv().await {
        let now = Timestamp::now();
        match event {
            Event::Inbound(msg) => model.receive(now, msg),
            Event::Action(action) => {
                played += 1;
                if let Err(e) = model.handle_action(now, action) {
                    warn!(target: "runtime", %client, error = %e, "action_rejected");
                }
            }
            Event::Tick => {
                model.tick(now);
                if model.is_offline(now) {
                    warn!(target: "runtime", %client, pending = model.pending_len(), "offline");
                }
            }
            Event::Shutdown => break,
        }
        for msg in model.take_outbox() {
            server
                .send(ServerRequest::Message { client, msg })
                .await
                .context("server task is gone")?;
        }
        match model.take_damage() {
            Damage::None => {}
            Damage::Cells(cells) => trace!(target: "runtime", %client, cells = cells.len(), "repaint"),
            Damage::Full => trace!(target: "runtime", %client, "repaint_full"),
        }
        let quiet = model.pending_len() == 0 && !model.projection().undo.has_uncommitted();
        if !reported && played == script_len && quiet {
            reported = true;
            idle.send(client).await.context("orchestrator is gone")?;
        }
    }

    for handle in handles {
        handle.abort();
    }
    let _ = server.send(ServerRequest::Disconnect(client)).await;
    Ok(ClientReport {
        client,
        user: model.user(),
        rows: model.projection().render_rows(&view()),
    })
}

/// Visible text of `area` with nobody hidden.
fn render_grid(grid: &Grid, area: &GlyphBounds) -> Vec<String> {
    let hidden = BTreeSet::new();
    (area.min.y..=area.max.y)
        .map(|y| {
            let row: String = (area.min.x..=area.max.x)
                .map(|x| grid.glyph_at(&hidden, GlyphCoord::new(x, y)).glyph.0)
                .collect();
            row.trim_end().to_string()
        })
        .collect()
}

struct SessionReport {
    clients: Vec<ClientReport>,
    server_rows: Vec<String>,
    state: PersistedState,
}

impl SessionReport {
    fn converged(&self) -> bool {
        self.clients.iter().all(|c| c.rows == self.server_rows)
    }
}

async fn run_session(clients: usize, config: &Config, server: ServerState) -> Result<SessionReport> {
    let settings = ClientSettings::from_config(config);
    let (server_tx, server_rx) = mpsc::channel::<ServerRequest>(EVENT_CHANNEL_CAP);
    let (idle_tx, mut idle_rx) = mpsc::channel::<ClientId>(clients.max(1));
    let server_task = tokio::spawn(run_server(server, server_rx));

    let mut tasks = Vec::with_capacity(clients);
    for index in 0..clients {
        let client = ClientId(index as u64);
        tasks.push(tokio::spawn(run_client(
            client,
            script_for(index),
            settings,
            server_tx.clone(),
            idle_tx.clone(),
        )));
    }
    drop(idle_tx);

    let mut quiet = 0;
    while quiet < clients {
        match idle_rx.recv().await {
            Some(client) => {
                quiet += 1;
                debug!(target: "runtime", %client, quiet, "client_quiet");
            }
            None => bail!("a client stopped before finishing its script"),
        }
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    server_tx
        .send(ServerRequest::Shutdown { reply: reply_tx })
        .await
        .context("server task is gone")?;
    let state = reply_rx.await.context("server dropped its final state")?;

    let mut reports = Vec::with_capacity(clients);
    for task in tasks {
        reports.push(task.await.context("client task panicked")??);
    }
    drop(server_tx);
    server_task.await.context("server task panicked")?;

    Ok(SessionReport {
        clients: reports,
        server_rows: render_grid(&state.grid, &view()),
        state,
    })
}

fn load_server(path: Option<&Path>, settings: ServerSettings) -> Result<ServerState> {
    match path {
        Some(path) if path.exists() => {
            let state = load_state(path)?;
            Ok(ServerState::from_persisted(state, settings))
        }
        _ => Ok(ServerState::new(settings)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let args = Args::parse();
    let config = load_from(args.config.clone())?;
    let server = load_server(args.state.as_deref(), ServerSettings::from_config(&config))?;
    info!(
        target: "runtime",
        clients = args.clients,
        config_override = args.config.is_some(),
        overscan = config.effective_overscan,
        "bootstrap_complete"
    );

    let report = run_session(args.clients, &config, server).await?;

    for client in &report.clients {
        println!("== {} ({})", client.client, client.user);
        for row in &client.rows {
            println!("{row}");
        }
    }
    let converged = report.converged();
    println!("converged: {}", if converged { "yes" } else { "no" });

    if let Some(path) = args.state.as_deref() {
        save_state(path, &report.state)?;
    }
    info!(
        target: "runtime",
        converged,
        ticks = TICKS_EMITTED.load(Ordering::Relaxed),
        send_failures = CHANNEL_SEND_FAILURES.load(Ordering::Relaxed),
        "shutdown"
    );
    ensure!(converged, "clients diverged from the server");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scripted_session_converges() {
        let report = run_session(3, &Config::default(), ServerState::default())
            .await
            .unwrap();
        assert_eq!(report.clients.len(), 3);
        assert!(report.converged(), "{:?} vs {:?}", report.clients, report.server_rows);
        assert_eq!(report.server_rows[0].trim_end().len(), 41);
        assert!(report.server_rows[2].starts_with("hello from client 1"));
        assert_eq!(report.server_rows[3], "");
    }

    #[tokio::test]
    async fn persisted_state_resumes_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let first = run_session(1, &Config::default(), ServerState::default())
            .await
            .unwrap();
        save_state(&path, &first.state).unwrap();

        let server = load_server(Some(&path), ServerSettings::default()).unwrap();
        let second = run_session(1, &Config::default(), server).await.unwrap();
        assert_eq!(second.clients[0].user, first.clients[0].user);
        assert!(second.converged());
    }
}
