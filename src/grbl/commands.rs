//! Typed controller commands.
//!
//! Line-based commands implement `Display` to produce the exact string sent
//! over serial (the link adds the newline). Real-time commands are single
//! bytes with no newline.

use std::fmt;

/// Line-based command. Format with `Display` to get the wire string.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    SettingsRequest,
    StoredPositionsRequest,
    Unlock,
    SetWcsZero { p: u8, x: Option<f64>, y: Option<f64>, z: Option<f64> },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SettingsRequest => write!(f, "$$"),
            Command::StoredPositionsRequest => write!(f, "$#"),
            Command::Unlock => write!(f, "$X"),
            Command::SetWcsZero { p, x, y, z } => {
                write!(f, "G10 L20 P{}", p)?;
                if let Some(x) = x {
                    write!(f, " X{:.3}", x)?;
                }
                if let Some(y) = y {
                    write!(f, " Y{:.3}", y)?;
                }
                if let Some(z) = z {
                    write!(f, " Z{:.3}", z)?;
                }
                Ok(())
            }
        }
    }
}

/// Real-time single-byte command. Sent without a newline; never queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RealtimeCommand {
    StatusQuery,
    FeedHold,
    CycleStart,
    SoftReset,
    FeedOverride100,
    FeedOverridePlus10,
    FeedOverrideMinus10,
    SpindleOverride100,
    SpindleOverridePlus10,
    SpindleOverrideMinus10,
}

impl RealtimeCommand {
    pub fn as_byte(self) -> u8 {
        match self {
            RealtimeCommand::StatusQuery => b'?',
            RealtimeCommand::FeedHold => b'!',
            RealtimeCommand::CycleStart => b'~',
            RealtimeCommand::SoftReset => 0x18,
            RealtimeCommand::FeedOverride100 => 0x90,
            RealtimeCommand::FeedOverridePlus10 => 0x91,
            RealtimeCommand::FeedOverrideMinus10 => 0x92,
            RealtimeCommand::SpindleOverride100 => 0x99,
            RealtimeCommand::SpindleOverridePlus10 => 0x9A,
            RealtimeCommand::SpindleOverrideMinus10 => 0x9B,
        }
    }
}

impl fmt::Display for RealtimeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.as_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_request_display() {
        assert_eq!(Command::SettingsRequest.to_string(), "$$");
    }

    #[test]
    fn stored_positions_request_display() {
        assert_eq!(Command::StoredPositionsRequest.to_string(), "$#");
    }

    #[test]
    fn unlock_display() {
        assert_eq!(Command::Unlock.to_string(), "$X");
    }

    #[test]
    fn set_wcs_zero_partial_axes() {
        assert_eq!(
            Command::SetWcsZero { p: 1, x: None, y: None, z: Some(22.0) }.to_string(),
            "G10 L20 P1 Z22.000"
        );
    }

    #[test]
    fn set_wcs_zero_all_axes() {
        assert_eq!(
            Command::SetWcsZero { p: 0, x: Some(1.0), y: Some(2.0), z: Some(3.0) }.to_string(),
            "G10 L20 P0 X1.000 Y2.000 Z3.000"
        );
    }

    #[test]
    fn realtime_bytes() {
        assert_eq!(RealtimeCommand::StatusQuery.as_byte(), b'?');
        assert_eq!(RealtimeCommand::FeedHold.as_byte(), b'!');
        assert_eq!(RealtimeCommand::CycleStart.as_byte(), b'~');
        assert_eq!(RealtimeCommand::SoftReset.as_byte(), 0x18);
    }
}
