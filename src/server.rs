//! Control-channel server: a `GET /ws` axum route upgrading to a JSON-framed
//! bidirectional channel, plus a `GET /` placeholder page. The server is the
//! only place that routes external requests to engines — engines never
//! reach into each other.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

use crate::grbl::{
    self, check_collisions, list_ports, xy_check, Command, FixtureRegistry, MacroEngine,
    NullTransport, ProtocolEngine, RealtimeCommand, SerialLink, Streamer,
};
use crate::hub::{Hub, HubEvent};

const PLACEHOLDER_PAGE: &str = "<!doctype html><html><head><title>grbl-core</title></head>\
<body><p>Control channel is served at <code>/ws</code>.</p></body></html>";

pub struct AppState {
    pub engine: Arc<ProtocolEngine>,
    pub streamer: Arc<Streamer>,
    pub macros: Arc<MacroEngine>,
    pub hub: Hub,
    pub fixtures: Mutex<FixtureRegistry>,
    pub macro_handle: StdMutex<Option<grbl::MacroHandle>>,
}

impl AppState {
    pub fn new(engine: Arc<ProtocolEngine>, streamer: Arc<Streamer>, macros: Arc<MacroEngine>, hub: Hub) -> Self {
        AppState {
            engine,
            streamer,
            macros,
            hub,
            fixtures: Mutex::new(FixtureRegistry::new()),
            macro_handle: StdMutex::new(None),
        }
    }
}

/// Listens for fixtures discovered by the probe_fixture macro and folds
/// them into the shared registry, then re-broadcasts the full list. Run
/// once at startup alongside the router.
pub fn spawn_fixture_sync(state: Arc<AppState>) {
    let mut rx = state.hub.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(HubEvent::FixtureDiscovered(fixture)) => {
                    let mut fixtures = state.fixtures.lock().await;
                    fixtures.add(fixture);
                    state.hub.publish(HubEvent::Fixtures(fixtures.list().to_vec()));
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    Html(PLACEHOLDER_PAGE)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Connect { port: String },
    Disconnect,
    ListPorts,
    Gcode { line: String, nowait: Option<bool> },
    Realtime { byte: u8 },
    Unlock,
    Reset,
    FeedHold,
    CycleStart,
    Settings,
    FileUpload { filename: String, content: String },
    FileStart { from_line: Option<usize>, skip_position_check: Option<bool> },
    FilePause,
    FileResume,
    FileStop,
    MacroRun { name: String, tool_diameter: Option<f64>, edge_sign: Option<f64> },
    MacroContinue,
    MacroCancel,
    MacroList,
    MacroLoad { name: String },
    MacroSave { name: String, code: String },
    FixtureList,
    FixtureRemove { index: usize },
    FixtureClear,
    CheckCollisions,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut rx = state.hub.subscribe();

    let snapshot = state.engine.snapshot().await;
    if let Ok(text) = serde_json::to_string(&HubEvent::Status(snapshot)) {
        let _ = sink.send(Message::Text(text.into())).await;
    }

    let forward = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(text) = serde_json::to_string(&event) {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<Inbound>(&text) {
                Ok(inbound) => handle_inbound(inbound, &state).await,
                Err(e) => {
                    state.hub.publish(HubEvent::Response {
                        to: "unknown".into(),
                        result: format!("malformed message: {e}"),
                    });
                }
            }
        }
    }

    forward.abort();
}

async fn handle_inbound(msg: Inbound, state: &Arc<AppState>) {
    match msg {
        Inbound::Connect { port } => {
            match SerialLink::open(&port) {
                Ok(link) => {
                    state.engine.set_transport(Box::new(link));
                    state.engine.connect(&port).await;
                }
                Err(e) => {
                    state.hub.publish(HubEvent::Response { to: "connect".into(), result: e.to_string() });
                }
            }
        }
        Inbound::Disconnect => {
            state.engine.disconnect().await;
            state.engine.set_transport(Box::new(NullTransport));
        }
        Inbound::ListPorts => match list_ports() {
            Ok(ports) => {
                state.hub.publish(HubEvent::Ports(ports));
            }
            Err(e) => {
                state.hub.publish(HubEvent::Response { to: "list_ports".into(), result: e.to_string() });
            }
        },
        Inbound::Gcode { line, nowait } => {
            if nowait.unwrap_or(false) {
                let result = state.engine.send_fire_and_forget(&line).await;
                if let Err(e) = result {
                    state.hub.publish(HubEvent::Response { to: "gcode".into(), result: e.to_string() });
                }
            } else {
                let result = state
                    .engine
                    .send_command(&line, crate::config::DEFAULT_COMMAND_TIMEOUT)
                    .await;
                state.hub.publish(HubEvent::Response { to: "gcode".into(), result: format!("{result:?}") });
            }
        }
        Inbound::Realtime { byte } => state.engine.send_realtime(byte).await,
        Inbound::Unlock => {
            let _ = state
                .engine
                .send_command(&Command::Unlock.to_string(), crate::config::DEFAULT_COMMAND_TIMEOUT)
                .await;
        }
        Inbound::Reset => state.engine.send_realtime(RealtimeCommand::SoftReset.as_byte()).await,
        Inbound::FeedHold => state.engine.send_realtime(RealtimeCommand::FeedHold.as_byte()).await,
        Inbound::CycleStart => state.engine.send_realtime(RealtimeCommand::CycleStart.as_byte()).await,
        Inbound::Settings => {
            let _ = state
                .engine
                .send_command(&Command::SettingsRequest.to_string(), crate::config::DEFAULT_COMMAND_TIMEOUT)
                .await;
            let status = state.engine.snapshot().await;
            state.hub.publish(HubEvent::Settings(status.settings));
        }
        Inbound::FileUpload { filename, content } => {
            state.streamer.load(&filename, &content).await;
        }
        Inbound::FileStart { from_line, skip_position_check } => {
            let streamer = Arc::clone(&state.streamer);
            let from_line = from_line.unwrap_or(0);
            let skip = skip_position_check.unwrap_or(false);
            tokio::spawn(async move {
                if let Err(e) = streamer.start(from_line, skip).await {
                    tracing::warn!("file_start: {}", e);
                }
            });
        }
        Inbound::FilePause => state.streamer.pause(),
        Inbound::FileResume => state.streamer.resume(),
        Inbound::FileStop => state.streamer.stop(),
        Inbound::MacroRun { name, tool_diameter, edge_sign } => {
            let diameter = tool_diameter.unwrap_or(crate::config::DEFAULT_TOOL_DIAMETER_MM);
            let sign = edge_sign.unwrap_or(1.0);
            match state.macros.spawn(&name, diameter, sign) {
                Some((handle, _join)) => {
                    *state.macro_handle.lock().unwrap() = Some(handle);
                }
                None => {
                    state.hub.publish(HubEvent::Response {
                        to: "macro_run".into(),
                        result: format!("unknown macro: {name}"),
                    });
                }
            }
        }
        Inbound::MacroContinue => {
            if let Some(handle) = state.macro_handle.lock().unwrap().as_ref() {
                handle.continue_macro();
            }
        }
        Inbound::MacroCancel => {
            if let Some(handle) = state.macro_handle.lock().unwrap().take() {
                handle.cancel();
            }
        }
        Inbound::MacroList => {
            let names = grbl::macros::names();
            state.hub.publish(HubEvent::Response { to: "macro_list".into(), result: names.join(",") });
        }
        Inbound::MacroLoad { name } => {
            state.hub.publish(HubEvent::Response {
                to: "macro_load".into(),
                result: format!("macros are statically linked; {name} cannot be loaded as text"),
            });
        }
        Inbound::MacroSave { name, .. } => {
            state.hub.publish(HubEvent::Response {
                to: "macro_save".into(),
                result: format!("macros are statically linked; {name} cannot be saved as text"),
            });
        }
        Inbound::FixtureList => {
            let fixtures = state.fixtures.lock().await;
            state.hub.publish(HubEvent::Fixtures(fixtures.list().to_vec()));
        }
        Inbound::FixtureRemove { index } => {
            let mut fixtures = state.fixtures.lock().await;
            fixtures.remove(index);
            state.hub.publish(HubEvent::Fixtures(fixtures.list().to_vec()));
        }
        Inbound::FixtureClear => {
            let mut fixtures = state.fixtures.lock().await;
            fixtures.clear();
            state.hub.publish(HubEvent::Fixtures(fixtures.list().to_vec()));
        }
        Inbound::CheckCollisions => {
            let lines = state.streamer.loaded_lines().await.unwrap_or_default();
            let fixtures = state.fixtures.lock().await;
            let status = state.engine.snapshot().await;
            let (_hull, mut collisions) = xy_check(&lines, fixtures.list(), status.wco);
            collisions.extend(check_collisions(&lines, fixtures.list(), status.wco));
            let count = collisions.len();
            state.hub.publish(HubEvent::CollisionCheck { collisions, count });
        }
    }
}
