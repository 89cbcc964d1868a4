//! Build-time configuration constants: feeds, fixture/tool geometry, and
//! tolerances used across the protocol engine, streamer, and macros.
//! Loaded once at startup; there is no runtime config file.

use std::time::Duration;

/// Status poll cadence.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default timeout for a queued `send_command`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// wait-idle: max time to prove motion started, and max time to return to Idle.
pub const WAIT_IDLE_START_TIMEOUT: Duration = Duration::from_secs(2);
pub const WAIT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Write a recovery checkpoint every N streamed lines.
pub const RECOVERY_CHECKPOINT_INTERVAL: usize = 100;

/// Start-corner gating: margin from travel limits and per-axis tolerance.
pub const START_CORNER_MARGIN_MM: f64 = 2.0;
pub const START_CORNER_TOLERANCE_MM: f64 = 5.0;
/// Setting holding total Y travel, used to derive the start corner.
pub const Y_TRAVEL_SETTING_KEY: &str = "$131";

/// Probe feeds (mm/min), fast then slow, per the Z/X/Y probe macros.
pub const PROBE_FEED_FAST: f64 = 50.0;
pub const PROBE_FEED_SLOW: f64 = 10.0;

/// Z probe macro distances (mm).
pub const Z_PROBE_DISTANCE_1: f64 = 11.0;
pub const Z_PROBE_RETRACT_1: f64 = 2.5;
pub const Z_PROBE_DISTANCE_2: f64 = 3.0;
pub const Z_PROBE_PLATE_THICKNESS: f64 = 22.0;
/// Z never exceeds this machine coordinate after a Z probe retract.
pub const Z_SAFE_MACHINE_LIMIT: f64 = -1.0;

/// X/Y edge probe clearance and refine distances (mm).
pub const EDGE_PROBE_CLEARANCE_BASE: f64 = 6.0;
pub const EDGE_PROBE_SPURIOUS_CHECK_Z: f64 = -6.0;
pub const EDGE_PROBE_BACK_DISTANCE: f64 = 1.0;
pub const EDGE_PROBE_FINAL_OFFSET_BASE: f64 = 7.0;

/// Default tool diameter (mm) when a macro invocation omits one.
pub const DEFAULT_TOOL_DIAMETER_MM: f64 = 6.35;

/// Tool change location (machine coordinates) and safe Z.
pub const TOOL_CHANGE_X_MM: f64 = -2.0;
pub const TOOL_CHANGE_Y_MM: f64 = -418.0;
pub const SAFE_Z_MACHINE_MM: f64 = -1.0;

/// Rotary chuck find offsets (mm).
pub const ROTARY_X_OFFSET_MM: f64 = -50.0;
pub const ROTARY_Y_OFFSET_MM: f64 = -20.0;
pub const ROTARY_Z_OFFSET_MM: f64 = 26.0;

/// Fixture probe (cylinder finder) parameters.
pub const FIXTURE_PROBE_FEED: f64 = 10.0;
pub const FIXTURE_PROBE_DISTANCE_MM: f64 = 50.0;
pub const FIXTURE_PROBE_BACKOFF_MM: f64 = 5.0;
/// `$21` is the controller's hard-limit enable setting.
pub const HARD_LIMITS_SETTING_KEY: &str = "$21";
/// Work offset used to zero the fixture-relative coordinate frame (P6 = G59).
pub const FIXTURE_WCS_SLOT: u8 = 6;

/// Rolling serial log retention, in days.
pub const SERIAL_LOG_RETENTION_DAYS: u64 = 7;

/// Default on-disk locations, relative to the working directory the process
/// is started from.
pub const DEFAULT_LOG_DIR: &str = "grbl-logs";
pub const DEFAULT_RECOVERY_PATH: &str = "grbl-recovery.txt";
