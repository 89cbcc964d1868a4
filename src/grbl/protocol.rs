//! Protocol engine: owns the serial link and frame parser, maintains the
//! live `MachineStatus`, matches commands to their terminating ok/error, and
//! fans asynchronous lines out to the broadcast hub.

use super::commands::Command;
use super::link::{LinkError, SerialTransport};
use super::parser::{self, Line};
use super::state::MachineStatus;
use crate::hub::{Hub, HubEvent};
use crate::log::{Direction, SerialLog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of a `send_command` call.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandResult {
    Ok,
    Error(String),
    Timeout,
    NotConnected,
}

/// Accumulates raw bytes into newline-terminated lines.
#[derive(Default)]
struct LineAccumulator {
    buf: Vec<u8>,
}

impl LineAccumulator {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.buf).trim_end_matches('\r').to_string();
                lines.push(line);
                self.buf.clear();
            } else {
                self.buf.push(byte);
            }
        }
        lines
    }
}

struct ConnectionTasks {
    read_loop: JoinHandle<()>,
    poller: JoinHandle<()>,
}

/// Owns the serial transport, classifies every inbound line, and serializes
/// outbound command/response matching.
pub struct ProtocolEngine {
    transport: Arc<std::sync::Mutex<Box<dyn SerialTransport>>>,
    status: Arc<RwLock<MachineStatus>>,
    hub: Hub,
    serial_log: Arc<std::sync::Mutex<Option<SerialLog>>>,
    /// Serializes callers so at most one `send_command` is outstanding.
    send_lock: Mutex<()>,
    /// Filled while a command awaits its terminator; taken by the read loop.
    slot: Arc<Mutex<Option<oneshot::Sender<CommandResult>>>>,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Option<ConnectionTasks>>,
}

impl ProtocolEngine {
    pub fn new(transport: Box<dyn SerialTransport>, hub: Hub) -> Self {
        ProtocolEngine {
            transport: Arc::new(std::sync::Mutex::new(transport)),
            status: Arc::new(RwLock::new(MachineStatus::idle())),
            hub,
            serial_log: Arc::new(std::sync::Mutex::new(None)),
            send_lock: Mutex::new(()),
            slot: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(None),
        }
    }

    pub fn set_serial_log(&self, log: SerialLog) {
        *self.serial_log.lock().unwrap() = Some(log);
    }

    /// Swaps the underlying transport. Used by `connect` to install a real
    /// `SerialLink` over a placeholder transport installed at construction.
    pub fn set_transport(&self, transport: Box<dyn SerialTransport>) {
        *self.transport.lock().unwrap() = transport;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn status_handle(&self) -> Arc<RwLock<MachineStatus>> {
        Arc::clone(&self.status)
    }

    pub async fn snapshot(&self) -> MachineStatus {
        self.status.read().await.clone()
    }

    /// Starts the read loop and status poller, then primes state by
    /// requesting settings and stored positions. The transport must already
    /// be installed via `new`/`set_transport`.
    pub async fn connect(self: &Arc<Self>, port: &str) {
        self.connected.store(true, Ordering::SeqCst);

        let read_loop = {
            let engine = Arc::clone(self);
            tokio::spawn(async move { engine.run_read_loop().await })
        };
        let poller = {
            let engine = Arc::clone(self);
            tokio::spawn(async move { crate::grbl::poller::run(engine).await })
        };
        *self.tasks.lock().await = Some(ConnectionTasks { read_loop, poller });

        let _ = self.send_command(&Command::SettingsRequest.to_string(), Duration::from_secs(5)).await;
        let _ = self.send_command(&Command::StoredPositionsRequest.to_string(), Duration::from_secs(5)).await;
        self.hub.publish(HubEvent::Connected { port: port.to_string() });
    }

    /// Cancels the read loop and poller, wakes any in-flight waiter with
    /// `NotConnected`.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.read_loop.abort();
            tasks.poller.abort();
        }
        if let Some(tx) = self.slot.lock().await.take() {
            let _ = tx.send(CommandResult::NotConnected);
        }
        self.hub.publish(HubEvent::Disconnected);
    }

    /// Submits a line, appends the newline, and suspends until the next
    /// ok/error (or the deadline). Only one command may be outstanding.
    pub async fn send_command(&self, line: &str, timeout: Duration) -> CommandResult {
        if !self.is_connected() {
            return CommandResult::NotConnected;
        }
        let _guard = self.send_lock.lock().await;

        // Defensive: a prior cancelled caller may have left a stale sender.
        *self.slot.lock().await = None;

        let (tx, rx) = oneshot::channel();
        *self.slot.lock().await = Some(tx);

        if let Err(e) = self.write_line(line).await {
            warn!("send_command: write failed: {}", e);
            self.slot.lock().await.take();
            return CommandResult::NotConnected;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => CommandResult::NotConnected,
            Err(_) => {
                self.slot.lock().await.take();
                CommandResult::Timeout
            }
        }
    }

    /// Writes a single real-time byte. Never queued, never suspends, no
    /// terminator expected.
    pub async fn send_realtime(&self, byte: u8) {
        self.write_realtime_byte(byte).await;
        self.log_line(Direction::OutboundRealtime, &format!("0x{:02X}", byte));
    }

    /// Same as `send_realtime` but skips the serial log — used by the
    /// status poller, whose 5 Hz query would otherwise flood the log.
    pub async fn send_realtime_unlogged(&self, byte: u8) {
        self.write_realtime_byte(byte).await;
    }

    async fn write_realtime_byte(&self, byte: u8) {
        if !self.is_connected() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || {
            let mut t = transport.lock().unwrap();
            t.write_bytes(&[byte])
        })
        .await;
        if !matches!(result, Ok(Ok(()))) {
            warn!("send_realtime: write failed");
        }
    }

    /// Writes a full line without reserving the response slot. Used by
    /// flow-control schemes (e.g. jog streaming) that track their own
    /// responses out of band.
    pub async fn send_fire_and_forget(&self, line: &str) -> Result<(), LinkError> {
        self.write_line(line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), LinkError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        let transport = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || {
            let mut t = transport.lock().unwrap();
            t.write_bytes(&bytes)
        })
        .await
        .expect("write task panicked");
        self.log_line(Direction::OutboundLine, line);
        self.hub.publish(HubEvent::SerialWrite(line.to_string()));
        result
    }

    fn log_line(&self, direction: Direction, text: &str) {
        if let Some(log) = self.serial_log.lock().unwrap().as_mut() {
            let _ = log.write_line(direction, text);
        }
    }

    async fn run_read_loop(&self) {
        let mut acc = LineAccumulator::default();
        loop {
            if !self.is_connected() {
                return;
            }
            let transport = Arc::clone(&self.transport);
            let chunk = tokio::task::spawn_blocking(move || {
                let mut t = transport.lock().unwrap();
                t.read_chunk()
            })
            .await
            .expect("read task panicked");

            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    warn!("read loop: {}", e);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
            };

            if chunk.is_empty() {
                continue;
            }

            for line in acc.push(&chunk) {
                if line.is_empty() {
                    continue;
                }
                self.hub.publish(HubEvent::SerialRead(line.clone()));
                self.log_line(Direction::Inbound, &line);
                self.absorb_line(&line).await;
            }
        }
    }

    async fn absorb_line(&self, raw: &str) {
        let classified = match parser::classify(raw) {
            Ok(l) => l,
            Err(e) => {
                debug!("parse error on {:?}: {}", raw, e);
                return;
            }
        };

        match classified {
            Line::Ok => self.complete_pending(CommandResult::Ok).await,
            Line::Error(code) => self.complete_pending(CommandResult::Error(code)).await,
            Line::Status(report) => {
                let mut status = self.status.write().await;
                parser::absorb_status(&mut status, &report);
                let snapshot = status.clone();
                drop(status);
                self.hub.publish(HubEvent::Status(snapshot));
            }
            Line::Alarm(code) => {
                {
                    let mut status = self.status.write().await;
                    status.state = super::state::MachineState::Alarm(code);
                }
                self.hub.publish(HubEvent::Alarm { code: format!("{:?}", code) });
            }
            Line::Probe(report) => {
                {
                    let mut status = self.status.write().await;
                    status.last_probe = Some(super::state::ProbeResult {
                        success: report.success,
                        pos: report.pos,
                    });
                }
                self.hub.publish(HubEvent::Probe {
                    success: report.success,
                    x: report.pos.x,
                    y: report.pos.y,
                    z: report.pos.z,
                    a: report.pos.a,
                });
            }
            Line::StoredPosition(pos) => {
                let mut status = self.status.write().await;
                status.g28_position = pos;
            }
            Line::Setting { key, value } => {
                let mut status = self.status.write().await;
                status.settings.insert(key, value);
            }
            Line::Banner(_) | Line::Other(_) => {}
        }
    }

    async fn complete_pending(&self, result: CommandResult) {
        if let Some(tx) = self.slot.lock().await.take() {
            let _ = tx.send(result);
        }
        // Else: a terminator with nobody waiting is a stray (e.g. delayed
        // reply racing a cancellation) and is dropped.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grbl::link::FakeTransport;

    fn new_engine() -> Arc<ProtocolEngine> {
        let transport: Box<dyn SerialTransport> = Box::new(FakeTransport::new());
        Arc::new(ProtocolEngine::new(transport, Hub::new()))
    }

    /// Drives the matching logic directly through `absorb_line`, bypassing
    /// the real read loop/transport — what arrives over the wire is exactly
    /// this sequence of classified lines.
    #[tokio::test]
    async fn send_and_match_returns_ok_and_updates_wpos() {
        let engine = new_engine();
        engine.connected.store(true, Ordering::SeqCst);

        let engine2 = Arc::clone(&engine);
        let call = tokio::spawn(async move {
            engine2.send_command("G0 X0", Duration::from_secs(1)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        engine
            .absorb_line("<Idle|MPos:1.000,2.000,3.000,0.000|WCO:1.000,2.000,3.000,0.000>")
            .await;
        engine.absorb_line("ok").await;

        let result = call.await.unwrap();
        assert_eq!(result, CommandResult::Ok);
        let status = engine.snapshot().await;
        assert_eq!(status.wpos, crate::grbl::Axes::default());
    }

    #[tokio::test]
    async fn interleaved_status_does_not_complete_the_command() {
        let engine = new_engine();
        engine.connected.store(true, Ordering::SeqCst);

        let engine2 = Arc::clone(&engine);
        let call = tokio::spawn(async move {
            engine2.send_command("G1 Z-5 F100", Duration::from_secs(1)).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.absorb_line("<Run|MPos:0,0,-1,0|WCO:0,0,0,0>").await;
        engine.absorb_line("<Run|MPos:0,0,-2,0|WCO:0,0,0,0>").await;
        assert!(!call.is_finished());
        engine.absorb_line("ok").await;

        assert_eq!(call.await.unwrap(), CommandResult::Ok);
    }

    #[tokio::test]
    async fn timeout_when_no_terminator_arrives() {
        let engine = new_engine();
        engine.connected.store(true, Ordering::SeqCst);
        let result = engine.send_command("G0 X0", Duration::from_millis(30)).await;
        assert_eq!(result, CommandResult::Timeout);
    }

    #[tokio::test]
    async fn not_connected_when_disconnected() {
        let engine = new_engine();
        let result = engine.send_command("G0 X0", Duration::from_secs(1)).await;
        assert_eq!(result, CommandResult::NotConnected);
    }

    #[test]
    fn line_accumulator_splits_on_newline() {
        let mut acc = LineAccumulator::default();
        let lines = acc.push(b"ok\nok\npartial");
        assert_eq!(lines, vec!["ok".to_string(), "ok".to_string()]);
        let rest = acc.push(b" line\n");
        assert_eq!(rest, vec!["partial line".to_string()]);
    }
}
