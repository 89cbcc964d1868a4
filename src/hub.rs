//! Broadcast hub: the single logical fan-out point connecting the status
//! poller, protocol engine, streamer, and macro engine to any number of
//! control clients.
//!
//! A typed `tokio::sync::broadcast` channel underneath. A subscriber that
//! falls behind the bounded queue simply misses older messages
//! (`RecvError::Lagged`) on its own receive call rather than blocking the
//! hub or other subscribers.

use crate::grbl::{AnalyzerReport, Axes, Fixture, MachineStatus};
use serde::Serialize;

/// Channel capacity per subscriber before the oldest unread message is
/// dropped for that subscriber.
pub const HUB_CAPACITY: usize = 256;

/// Every message kind the hub fans out to control clients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    Status(MachineStatus),
    Connected { port: String },
    Disconnected,
    Ports(Vec<crate::grbl::PortInfo>),
    SerialRead(String),
    SerialWrite(String),
    Response { to: String, result: String },
    Alarm { code: String },
    Probe { success: bool, x: f64, y: f64, z: f64, a: f64 },
    Settings(std::collections::HashMap<String, String>),
    FileStatus {
        filename: String,
        current: usize,
        total: usize,
        percent: f64,
        current_gcode: String,
        analysis: Option<AnalyzerReport>,
    },
    FileError { message: String },
    FileStartError { expected: Axes, observed: Axes },
    FileDone,
    MacroStatus {
        name: String,
        step: usize,
        total: usize,
        description: String,
        command: String,
        waiting: bool,
    },
    MacroLog { name: String, message: String },
    MacroDone { name: String },
    MacroError { name: String, message: String },
    Fixtures(Vec<Fixture>),
    FixtureDiscovered(Fixture),
    CollisionCheck { collisions: Vec<crate::grbl::Collision>, count: usize },
}

/// The hub itself: a thin wrapper over a broadcast sender so callers never
/// reach for `tokio::sync::broadcast` directly.
#[derive(Clone)]
pub struct Hub {
    tx: tokio::sync::broadcast::Sender<HubEvent>,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(HUB_CAPACITY);
        Hub { tx }
    }

    /// Subscribes a new client. Each subscriber owns an independent bounded
    /// queue; a slow subscriber never blocks others or the publisher.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Returns the number of live subscribers, or 0 if
    /// none (not an error — publishers run regardless of whether anyone is
    /// listening).
    pub fn publish(&self, event: HubEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = Hub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        hub.publish(HubEvent::Disconnected);
        assert!(matches!(rx1.recv().await.unwrap(), HubEvent::Disconnected));
        assert!(matches!(rx2.recv().await.unwrap(), HubEvent::Disconnected));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let hub = Hub::new();
        assert_eq!(hub.publish(HubEvent::FileDone), 0);
    }
}
