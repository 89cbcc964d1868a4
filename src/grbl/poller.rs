//! Status poller: emits a status real-time byte at a fixed cadence while
//! connected. The poller only fires the byte; the protocol engine's read
//! loop absorbs whatever status line comes back asynchronously.
//!
//! Status bytes are intentionally excluded from the serial log — `run`
//! calls the unlogged realtime path so the 5 Hz poll doesn't flood it.

use super::protocol::ProtocolEngine;
use crate::config::STATUS_POLL_INTERVAL;
use std::sync::Arc;

/// Runs until the engine disconnects. Cancellation is immediate: the
/// caller aborts this task's `JoinHandle` on disconnect rather than relying
/// on a cooperative flag, so there is no unbounded wait to cancel.
pub async fn run(engine: Arc<ProtocolEngine>) {
    let mut ticker = tokio::time::interval(STATUS_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !engine.is_connected() {
            return;
        }
        engine.send_realtime_unlogged(b'?').await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_200ms() {
        assert_eq!(STATUS_POLL_INTERVAL, std::time::Duration::from_millis(200));
    }
}
