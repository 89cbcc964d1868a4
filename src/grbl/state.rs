//! Machine state types for the controller link.
//!
//! Types only — no logic. Used by the parser and by every engine that
//! holds or broadcasts machine status.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position/offset in four axes. Rotary axis `a` defaults to zero when a
/// status line omits it, per the controller's "missing axes default to
/// zero" convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
}

impl Axes {
    pub fn sub(&self, other: &Axes) -> Axes {
        Axes {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
            a: self.a - other.a,
        }
    }

    /// Euclidean distance in X/Y/Z. A is excluded: time estimation treats
    /// moves as straight-line XYZ distance and ignores rotary travel.
    pub fn distance_xyz(&self, other: &Axes) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Reason for a `Hold` state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    FeedHold,
    SafetyDoor,
    Other(String),
}

/// Alarm code reported by the controller. Unknown codes map to `Unknown(n)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmCode {
    HardLimit,
    SoftLimit,
    AbortCycle,
    ProbeFailInitial,
    ProbeFailContact,
    HomingFailReset,
    HomingFailDoor,
    FailPulloff,
    HomingFailApproach,
    EStop,
    HomingRequired,
    LimitsEngaged,
    ProbeProtect,
    Spindle,
    HomingFailAutoSquaringApproach,
    SelftestFailed,
    MotorFault,
    HomingFail,
    ModbusException,
    ExpanderException,
    NvsFailed,
    Unknown(u8),
}

impl From<u8> for AlarmCode {
    fn from(n: u8) -> Self {
        match n {
            1 => AlarmCode::HardLimit,
            2 => AlarmCode::SoftLimit,
            3 => AlarmCode::AbortCycle,
            4 => AlarmCode::ProbeFailInitial,
            5 => AlarmCode::ProbeFailContact,
            6 => AlarmCode::HomingFailReset,
            7 => AlarmCode::HomingFailDoor,
            8 => AlarmCode::FailPulloff,
            9 => AlarmCode::HomingFailApproach,
            10 => AlarmCode::EStop,
            11 => AlarmCode::HomingRequired,
            12 => AlarmCode::LimitsEngaged,
            13 => AlarmCode::ProbeProtect,
            14 => AlarmCode::Spindle,
            15 => AlarmCode::HomingFailAutoSquaringApproach,
            16 => AlarmCode::SelftestFailed,
            17 => AlarmCode::MotorFault,
            18 => AlarmCode::HomingFail,
            19 => AlarmCode::ModbusException,
            20 => AlarmCode::ExpanderException,
            21 => AlarmCode::NvsFailed,
            _ => AlarmCode::Unknown(n),
        }
    }
}

/// High-level machine state from a status report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MachineState {
    Idle,
    Run,
    Hold(HoldReason),
    Jog,
    Alarm(AlarmCode),
    Door,
    Check,
    Home,
    Sleep,
    Unknown(String),
}

impl MachineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, MachineState::Idle)
    }
}

/// Result of the most recent probe cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub pos: Axes,
}

/// Live snapshot of controller state, mutated only by the protocol engine
/// as it absorbs classified lines. `wpos` is always kept equal to
/// `mpos - wco`, recomputed whenever either changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MachineStatus {
    pub state: MachineState,
    pub mpos: Axes,
    pub wpos: Axes,
    pub wco: Axes,
    pub feed_override: u32,
    pub spindle_override: u32,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    pub g28_position: Axes,
    pub settings: HashMap<String, String>,
    pub last_probe: Option<ProbeResult>,
}

impl Default for MachineStatus {
    fn default() -> Self {
        Self::idle()
    }
}

impl MachineStatus {
    /// Initial status before any line has been absorbed.
    pub fn idle() -> Self {
        Self {
            state: MachineState::Idle,
            mpos: Axes::default(),
            wpos: Axes::default(),
            wco: Axes::default(),
            feed_override: 100,
            spindle_override: 100,
            feed_rate: 0.0,
            spindle_speed: 0.0,
            g28_position: Axes::default(),
            settings: HashMap::new(),
            last_probe: None,
        }
    }

    /// Recomputes `wpos` from `mpos` and `wco`. Called after either changes.
    pub fn recompute_wpos(&mut self) {
        self.wpos = self.mpos.sub(&self.wco);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wpos_is_mpos_minus_wco() {
        let mut status = MachineStatus::idle();
        status.mpos = Axes { x: 1.0, y: 2.0, z: 3.0, a: 0.0 };
        status.wco = Axes { x: 1.0, y: 2.0, z: 3.0, a: 0.0 };
        status.recompute_wpos();
        assert_eq!(status.wpos, Axes::default());
    }

    #[test]
    fn alarm_code_roundtrip() {
        assert_eq!(AlarmCode::from(1u8), AlarmCode::HardLimit);
        assert_eq!(AlarmCode::from(99u8), AlarmCode::Unknown(99));
    }

    #[test]
    fn is_idle() {
        assert!(MachineState::Idle.is_idle());
        assert!(!MachineState::Run.is_idle());
    }
}
