//! Macro engine: a cooperative procedural runtime for multi-step probe and
//! tool-change sequences. Macros are statically linked async functions
//! registered by name, not an embedded scripting language — parameters
//! like `tool_diameter`/`edge_sign` are passed through `MacroContext`.

mod collision_check;
mod probe_fixture;
mod probe_xyz;
mod rotary_chuck_find;
mod set_z;
mod tool_change;

use super::protocol::ProtocolEngine;
use super::state::Axes;
use crate::config::{WAIT_IDLE_START_TIMEOUT, WAIT_IDLE_TIMEOUT};
use crate::hub::{Hub, HubEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MacroError {
    #[error("cancelled")]
    Cancelled,
    #[error("wait-idle: motion never started")]
    MotionNeverStarted,
    #[error("wait-idle: machine never returned to idle")]
    NeverIdle,
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("precondition not met: {0}")]
    Precondition(String),
    #[error("not connected")]
    NotConnected,
}

/// State that outlives any single macro invocation: the Tool Change macro
/// depends on a `probe_work_z` recorded by a prior SetZ run.
#[derive(Default)]
struct MacroShared {
    probe_work_z: RwLock<Option<f64>>,
    set_z_complete: AtomicBool,
}

/// Per-invocation handle threaded through a macro body: suspension
/// primitives, logging, and parameters.
pub struct MacroContext {
    pub name: String,
    pub tool_diameter: f64,
    pub edge_sign: f64,
    engine: Arc<ProtocolEngine>,
    hub: Hub,
    shared: Arc<MacroShared>,
    cancel_flag: Arc<AtomicBool>,
    continue_event: Arc<Notify>,
    continue_flag: Arc<AtomicBool>,
    step: std::sync::atomic::AtomicUsize,
}

impl MacroContext {
    fn new(
        name: &str,
        engine: Arc<ProtocolEngine>,
        hub: Hub,
        shared: Arc<MacroShared>,
        tool_diameter: f64,
        edge_sign: f64,
    ) -> Self {
        MacroContext {
            name: name.to_string(),
            tool_diameter,
            edge_sign,
            engine,
            hub,
            shared,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            continue_event: Arc::new(Notify::new()),
            continue_flag: Arc::new(AtomicBool::new(false)),
            step: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub async fn probe_work_z(&self) -> Option<f64> {
        *self.shared.probe_work_z.read().await
    }

    pub async fn set_probe_work_z(&self, z: f64) {
        *self.shared.probe_work_z.write().await = Some(z);
    }

    pub fn is_set_z_complete(&self) -> bool {
        self.shared.set_z_complete.load(Ordering::SeqCst)
    }

    pub fn mark_set_z_complete(&self) {
        self.shared.set_z_complete.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> Result<(), MacroError> {
        if self.cancel_flag.load(Ordering::SeqCst) {
            Err(MacroError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sends a line and waits for its terminator; maps the result to
    /// `MacroError` for `?`-propagation through macro bodies.
    pub async fn send(&self, line: &str) -> Result<(), MacroError> {
        self.check_cancelled()?;
        use super::protocol::CommandResult;
        match self.engine.send_command(line, Duration::from_secs(30)).await {
            CommandResult::Ok => Ok(()),
            CommandResult::Error(msg) => Err(MacroError::CommandFailed(msg)),
            CommandResult::Timeout => Err(MacroError::CommandFailed("timeout".into())),
            CommandResult::NotConnected => Err(MacroError::NotConnected),
        }
    }

    /// Writes a line without reserving the response slot, for moves whose
    /// completion is detected by watching machine state instead (e.g. a
    /// hard-limit alarm trip, which the controller never answers with `ok`).
    pub async fn send_fire_and_forget(&self, line: &str) -> Result<(), MacroError> {
        self.check_cancelled()?;
        self.engine.send_fire_and_forget(line).await.map_err(|e| MacroError::CommandFailed(e.to_string()))
    }

    pub async fn mpos(&self) -> Axes {
        self.engine.snapshot().await.mpos
    }

    pub async fn wpos(&self) -> Axes {
        self.engine.snapshot().await.wpos
    }

    pub async fn g28_position(&self) -> Axes {
        self.engine.snapshot().await.g28_position
    }

    pub fn log(&self, message: &str) {
        self.hub.publish(HubEvent::MacroLog { name: self.name.clone(), message: message.to_string() });
    }

    pub fn report_status(&self, description: &str, command: &str, waiting: bool) {
        let step = self.step.fetch_add(1, Ordering::SeqCst);
        self.hub.publish(HubEvent::MacroStatus {
            name: self.name.clone(),
            step,
            total: 0,
            description: description.to_string(),
            command: command.to_string(),
            waiting,
        });
    }

    /// Waits up to `WAIT_IDLE_START_TIMEOUT` for the machine to leave Idle
    /// (proving motion started), then up to `WAIT_IDLE_TIMEOUT` for it to
    /// return. Rechecks cancellation on every poll.
    pub async fn wait_idle(&self) -> Result<(), MacroError> {
        let left = self.wait_for(|s| !s.is_idle(), WAIT_IDLE_START_TIMEOUT).await;
        if !left {
            return Err(MacroError::MotionNeverStarted);
        }
        let idle = self.wait_for(|s| s.is_idle(), WAIT_IDLE_TIMEOUT).await;
        if !idle {
            return Err(MacroError::NeverIdle);
        }
        Ok(())
    }

    async fn wait_for(&self, predicate: impl Fn(&super::state::MachineState) -> bool, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.check_cancelled().is_err() {
                return false;
            }
            let status = self.engine.snapshot().await;
            if predicate(&status.state) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Signals subscribers that user action is required, then suspends
    /// until `continue_macro()` is called or the macro is cancelled.
    pub async fn wait_continue(&self) -> Result<(), MacroError> {
        self.continue_flag.store(false, Ordering::SeqCst);
        self.report_status("waiting for operator", "", true);
        loop {
            self.check_cancelled()?;
            if self.continue_flag.load(Ordering::SeqCst) {
                return Ok(());
            }
            tokio::select! {
                _ = self.continue_event.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }
}

type MacroFn = for<'a> fn(
    &'a MacroContext,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), MacroError>> + Send + 'a>>;

/// A live macro run: the handle returned to callers so they can signal
/// continue/cancel.
pub struct MacroHandle {
    cancel_flag: Arc<AtomicBool>,
    continue_event: Arc<Notify>,
    continue_flag: Arc<AtomicBool>,
}

impl MacroHandle {
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        self.continue_event.notify_waiters();
    }

    pub fn continue_macro(&self) {
        self.continue_flag.store(true, Ordering::SeqCst);
        self.continue_event.notify_waiters();
    }
}

/// Name -> procedure registry. Composition (one macro calling another)
/// happens by calling the sub-procedure's function directly with the same
/// `MacroContext`, not by re-entering the registry.
fn registry() -> HashMap<&'static str, MacroFn> {
    let mut map: HashMap<&'static str, MacroFn> = HashMap::new();
    map.insert("probe_z", |ctx| Box::pin(probe_xyz::probe_z(ctx)));
    map.insert("probe_x", |ctx| Box::pin(probe_xyz::probe_x(ctx)));
    map.insert("probe_y", |ctx| Box::pin(probe_xyz::probe_y(ctx)));
    map.insert("probe_xy", |ctx| Box::pin(probe_xyz::probe_xy(ctx)));
    map.insert("probe_xyz", |ctx| Box::pin(probe_xyz::probe_xyz(ctx)));
    map.insert("set_z", |ctx| Box::pin(set_z::set_z(ctx)));
    map.insert("tool_change", |ctx| Box::pin(tool_change::tool_change(ctx)));
    map.insert("rotary_chuck_find", |ctx| Box::pin(rotary_chuck_find::rotary_chuck_find(ctx)));
    map.insert("probe_fixture", |ctx| Box::pin(probe_fixture::probe_fixture(ctx)));
    map.insert("collision_check", |ctx| Box::pin(collision_check::collision_check(ctx)));
    map
}

/// Owns the state that persists across macro invocations (currently just
/// the SetZ/Tool Change handoff) and dispatches named macros against a
/// shared protocol engine and hub.
pub struct MacroEngine {
    engine: Arc<ProtocolEngine>,
    hub: Hub,
    shared: Arc<MacroShared>,
}

impl MacroEngine {
    pub fn new(engine: Arc<ProtocolEngine>, hub: Hub) -> Self {
        MacroEngine { engine, hub, shared: Arc::new(MacroShared::default()) }
    }

    /// Runs a registered macro to completion on a spawned task, broadcasting
    /// `macro_done`/`macro_error` when it finishes. Returns a handle so the
    /// caller can cancel or unblock a `wait_continue`.
    pub fn spawn(
        &self,
        name: &str,
        tool_diameter: f64,
        edge_sign: f64,
    ) -> Option<(MacroHandle, tokio::task::JoinHandle<Result<(), MacroError>>)> {
        let procedures = registry();
        let procedure = *procedures.get(name)?;
        let ctx = MacroContext::new(
            name,
            Arc::clone(&self.engine),
            self.hub.clone(),
            Arc::clone(&self.shared),
            tool_diameter,
            edge_sign,
        );

        let handle = MacroHandle {
            cancel_flag: Arc::clone(&ctx.cancel_flag),
            continue_event: Arc::clone(&ctx.continue_event),
            continue_flag: Arc::clone(&ctx.continue_flag),
        };

        let macro_name = name.to_string();
        let hub = self.hub.clone();
        let join = tokio::spawn(async move {
            let result = procedure(&ctx).await;
            match &result {
                Ok(()) => hub.publish(HubEvent::MacroDone { name: macro_name.clone() }),
                Err(MacroError::Cancelled) => hub.publish(HubEvent::MacroDone { name: macro_name.clone() }),
                Err(e) => hub.publish(HubEvent::MacroError { name: macro_name.clone(), message: e.to_string() }),
            };
            result
        });

        Some((handle, join))
    }
}

pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grbl::link::FakeTransport;

    fn new_ctx() -> MacroContext {
        let transport: Box<dyn super::super::link::SerialTransport> = Box::new(FakeTransport::new());
        let hub = Hub::new();
        let engine = Arc::new(ProtocolEngine::new(transport, hub.clone()));
        MacroContext::new("test", engine, hub, Arc::new(MacroShared::default()), 6.35, 1.0)
    }

    #[test]
    fn registry_contains_all_concrete_macros() {
        let names = names();
        for expected in [
            "probe_z", "probe_x", "probe_y", "probe_xy", "probe_xyz", "set_z", "tool_change",
            "rotary_chuck_find", "probe_fixture", "collision_check",
        ] {
            assert!(names.contains(&expected), "missing macro: {expected}");
        }
    }

    #[tokio::test]
    async fn wait_idle_fails_fast_when_cancelled() {
        let ctx = new_ctx();
        ctx.cancel_flag.store(true, Ordering::SeqCst);
        assert_eq!(ctx.wait_idle().await, Err(MacroError::MotionNeverStarted));
    }

    #[tokio::test]
    async fn wait_continue_returns_once_signalled() {
        let ctx = new_ctx();
        let flag = Arc::clone(&ctx.continue_flag);
        let notify = Arc::clone(&ctx.continue_event);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
            notify.notify_waiters();
        });
        assert_eq!(ctx.wait_continue().await, Ok(()));
    }

    #[tokio::test]
    async fn send_reports_not_connected_when_disconnected() {
        let ctx = new_ctx();
        assert_eq!(ctx.send("G0 X0").await, Err(MacroError::NotConnected));
    }

    #[test]
    fn engine_spawn_returns_none_for_unknown_macro() {
        let transport: Box<dyn super::super::link::SerialTransport> = Box::new(FakeTransport::new());
        let hub = Hub::new();
        let engine = Arc::new(ProtocolEngine::new(transport, hub.clone()));
        let macros = MacroEngine::new(engine, hub);
        assert!(macros.spawn("does_not_exist", 6.35, 1.0).is_none());
    }

    #[tokio::test]
    async fn probe_work_z_round_trips_through_shared_state() {
        let ctx = new_ctx();
        assert_eq!(ctx.probe_work_z().await, None);
        ctx.set_probe_work_z(-12.5).await;
        assert_eq!(ctx.probe_work_z().await, Some(-12.5));
    }
}
