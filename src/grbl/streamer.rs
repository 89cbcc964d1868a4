//! Streaming engine: loads a g-code program and drives it line by line with
//! buffer-based flow control, pre-run start-corner gating, progress
//! broadcasts, crash-safe recovery checkpoints, and a completion homing
//! sequence.

use super::analyzer::{self, AnalyzerReport};
use super::protocol::{CommandResult, ProtocolEngine};
use super::state::Axes;
use crate::config::{
    RECOVERY_CHECKPOINT_INTERVAL, START_CORNER_MARGIN_MM, START_CORNER_TOLERANCE_MM,
    Y_TRAVEL_SETTING_KEY,
};
use crate::hub::{Hub, HubEvent};
use crate::recovery::{self, RecoveryRecord};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Running,
    Paused,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StreamCommand {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no program loaded")]
    NoProgram,
    #[error("start position outside tolerance: expected {expected:?}, observed {observed:?}")]
    StartPositionMismatch { expected: Axes, observed: Axes },
    #[error("recovery write failed: {0}")]
    Recovery(#[from] crate::recovery::RecoveryError),
}

struct LoadedProgram {
    filename: String,
    lines: Vec<String>,
    analysis: AnalyzerReport,
}

/// Filters raw file content to the lines the controller actually sees:
/// non-empty, not a `;`-prefixed comment.
fn load_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with(';'))
        .collect()
}

pub struct Streamer {
    engine: Arc<ProtocolEngine>,
    hub: Hub,
    recovery_path: PathBuf,
    program: RwLock<Option<LoadedProgram>>,
    cursor: AtomicUsize,
    state: RwLock<StreamState>,
    stop_flag: Arc<AtomicBool>,
    pause_flag: Arc<AtomicBool>,
}

impl Streamer {
    pub fn new(engine: Arc<ProtocolEngine>, hub: Hub, recovery_path: PathBuf) -> Self {
        Streamer {
            engine,
            hub,
            recovery_path,
            program: RwLock::new(None),
            cursor: AtomicUsize::new(0),
            state: RwLock::new(StreamState::Idle),
            stop_flag: Arc::new(AtomicBool::new(false)),
            pause_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn load(&self, filename: &str, content: &str) {
        let lines = load_lines(content);
        let analysis = analyzer::analyze(&lines);
        *self.program.write().await = Some(LoadedProgram {
            filename: filename.to_string(),
            lines,
            analysis,
        });
        self.cursor.store(0, Ordering::SeqCst);
        *self.state.write().await = StreamState::Idle;
    }

    pub async fn state(&self) -> StreamState {
        *self.state.read().await
    }

    /// The lines of the currently loaded program, if any — used by the
    /// collision check, which needs the same text the streamer will send.
    pub async fn loaded_lines(&self) -> Option<Vec<String>> {
        self.program.read().await.as_ref().map(|p| p.lines.clone())
    }

    pub fn pause(&self) {
        self.pause_flag.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause_flag.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Computes the expected start corner from the controller's cached
    /// `$131` (Y travel) setting: `(-margin, -(travel_y - margin), -margin)`.
    async fn start_corner(&self) -> Option<Axes> {
        let status = self.engine.snapshot().await;
        let travel_y: f64 = status.settings.get(Y_TRAVEL_SETTING_KEY)?.parse().ok()?;
        Some(Axes {
            x: -START_CORNER_MARGIN_MM,
            y: -(travel_y - START_CORNER_MARGIN_MM),
            z: -START_CORNER_MARGIN_MM,
            a: 0.0,
        })
    }

    fn within_tolerance(observed: Axes, expected: Axes) -> bool {
        (observed.x - expected.x).abs() <= START_CORNER_TOLERANCE_MM
            && (observed.y - expected.y).abs() <= START_CORNER_TOLERANCE_MM
            && (observed.z - expected.z).abs() <= START_CORNER_TOLERANCE_MM
    }

    /// Starts streaming from `from_line`. Gating against the start corner
    /// only applies when `from_line == 0`; resuming from recovery (`> 0`)
    /// or an explicit skip bypasses it.
    pub async fn start(&self, from_line: usize, skip_position_check: bool) -> Result<(), StreamError> {
        let (filename, total) = {
            let guard = self.program.read().await;
            let program = guard.as_ref().ok_or(StreamError::NoProgram)?;
            (program.filename.clone(), program.lines.len())
        };

        if from_line == 0 && !skip_position_check {
            if let Some(expected) = self.start_corner().await {
                let observed = self.engine.snapshot().await.mpos;
                if !Self::within_tolerance(observed, expected) {
                    self.hub.publish(HubEvent::FileStartError { expected, observed });
                    return Err(StreamError::StartPositionMismatch { expected, observed });
                }
            }
        }

        self.cursor.store(from_line, Ordering::SeqCst);
        self.stop_flag.store(false, Ordering::SeqCst);
        self.pause_flag.store(false, Ordering::SeqCst);
        *self.state.write().await = StreamState::Running;

        self.run_loop(filename, total).await
    }

    async fn run_loop(&self, filename: String, total: usize) -> Result<(), StreamError> {
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                *self.state.write().await = StreamState::Stopping;
                self.flush_recovery(&filename, total).await?;
                *self.state.write().await = StreamState::Idle;
                return Ok(());
            }
            if self.pause_flag.load(Ordering::SeqCst) {
                *self.state.write().await = StreamState::Paused;
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
            *self.state.write().await = StreamState::Running;

            let cursor = self.cursor.load(Ordering::SeqCst);
            if cursor >= total {
                break;
            }

            let line = {
                let guard = self.program.read().await;
                guard.as_ref().unwrap().lines[cursor].clone()
            };

            let result = self.engine.send_command(&line, Duration::from_secs(30)).await;
            if let CommandResult::Error(message) = result {
                self.hub.publish(HubEvent::FileError { message });
            }

            if cursor % RECOVERY_CHECKPOINT_INTERVAL == 0 {
                self.flush_recovery(&filename, total).await?;
            }

            let next = cursor + 1;
            self.cursor.store(next, Ordering::SeqCst);
            self.hub.publish(HubEvent::FileStatus {
                filename: filename.clone(),
                current: next,
                total,
                percent: if total == 0 { 100.0 } else { (next as f64 / total as f64) * 100.0 },
                current_gcode: line,
                analysis: None,
            });
        }

        self.flush_recovery(&filename, total).await?;
        self.run_completion_homing().await;
        self.hub.publish(HubEvent::FileDone);
        *self.state.write().await = StreamState::Idle;
        Ok(())
    }

    async fn flush_recovery(&self, filename: &str, total: usize) -> Result<(), StreamError> {
        let cursor = self.cursor.load(Ordering::SeqCst);
        let mpos_z = self.engine.snapshot().await.mpos.z;
        let record = RecoveryRecord::now(filename, total, cursor, mpos_z);
        recovery::write_atomic(&self.recovery_path, &record).await?;
        Ok(())
    }

    /// M5 (spindle off), then Z then X/Y rapid back to the start corner,
    /// waiting for Idle between each move.
    async fn run_completion_homing(&self) {
        let _ = self.engine.send_command("M5", Duration::from_secs(5)).await;

        let Some(corner) = self.start_corner().await else {
            warn!("completion homing: no travel setting cached, skipping");
            return;
        };

        let z_move = format!("G90 G0 Z{:.3}", corner.z);
        if self.engine.send_command(&z_move, Duration::from_secs(30)).await == CommandResult::Timeout {
            warn!("completion homing: Z move timed out");
            return;
        }
        self.wait_for_idle().await;

        let xy_move = format!("G90 G0 X{:.3} Y{:.3}", corner.x, corner.y);
        if self.engine.send_command(&xy_move, Duration::from_secs(30)).await == CommandResult::Timeout {
            warn!("completion homing: XY move timed out");
            return;
        }
        self.wait_for_idle().await;
    }

    async fn wait_for_idle(&self) {
        for _ in 0..300 {
            if self.engine.snapshot().await.state.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grbl::link::FakeTransport;
    use crate::grbl::protocol::ProtocolEngine;

    fn new_streamer() -> (Arc<ProtocolEngine>, Streamer) {
        let transport: Box<dyn super::super::link::SerialTransport> = Box::new(FakeTransport::new());
        let hub = Hub::new();
        let engine = Arc::new(ProtocolEngine::new(transport, hub.clone()));
        let path = std::env::temp_dir().join(format!("grbl_stream_test_{}.txt", std::process::id()));
        let streamer = Streamer::new(Arc::clone(&engine), hub, path);
        (engine, streamer)
    }

    #[test]
    fn load_lines_drops_blank_and_comment_lines() {
        let content = "G0 X0\n\n; a comment\nG1 X1 F100\n";
        let lines = load_lines(content);
        assert_eq!(lines, vec!["G0 X0".to_string(), "G1 X1 F100".to_string()]);
    }

    #[tokio::test]
    async fn load_populates_program_and_resets_cursor() {
        let (_engine, streamer) = new_streamer();
        streamer.load("prog.nc", "G0 X0\nG1 X1 F100\n").await;
        assert_eq!(streamer.cursor.load(Ordering::SeqCst), 0);
        assert_eq!(streamer.state().await, StreamState::Idle);
    }

    #[tokio::test]
    async fn start_without_program_is_an_error() {
        let (_engine, streamer) = new_streamer();
        let result = streamer.start(0, true).await;
        assert!(matches!(result, Err(StreamError::NoProgram)));
    }

    #[test]
    fn start_corner_tolerance_check() {
        let expected = Axes { x: -2.0, y: -416.0, z: -2.0, a: 0.0 };
        let close = Axes { x: -1.0, y: -414.0, z: -3.0, a: 0.0 };
        let far = Axes { x: 50.0, y: -416.0, z: -2.0, a: 0.0 };
        assert!(Streamer::within_tolerance(close, expected));
        assert!(!Streamer::within_tolerance(far, expected));
    }
}
