//! Frame parser: classifies controller response lines and absorbs them
//! into a `MachineStatus`.
//!
//! Pure parsing and state-absorption — no I/O. Used by the protocol engine's
//! read loop.

use super::state::*;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid status line: {0}")]
    InvalidStatus(String),
    #[error("invalid position: {0}")]
    InvalidPosition(String),
    #[error("invalid probe line: {0}")]
    InvalidProbe(String),
    #[error("invalid stored-position line: {0}")]
    InvalidG28(String),
    #[error("invalid alarm message: {0}")]
    InvalidAlarm(String),
}

/// A classified controller line, keyed off its leading character(s).
#[derive(Clone, Debug, PartialEq)]
pub enum Line {
    Status(StatusReport),
    Ok,
    Error(String),
    Alarm(AlarmCode),
    Probe(ProbeReport),
    StoredPosition(Axes),
    Setting { key: String, value: String },
    Banner(String),
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    pub state: MachineState,
    pub mpos: Option<Axes>,
    pub wco: Option<Axes>,
    pub overrides: Option<(u32, u32, u32)>,
    pub feed: Option<f64>,
    pub spindle: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProbeReport {
    pub pos: Axes,
    pub success: bool,
}

/// Classifies a single raw line (already split on newline, trimmed by the
/// caller or here).
pub fn classify(raw: &str) -> Result<Line, ParseError> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(Line::Other(String::new()));
    }
    if line.starts_with('<') {
        return Ok(Line::Status(parse_status_report(line)?));
    }
    if line.eq_ignore_ascii_case("ok") {
        return Ok(Line::Ok);
    }
    if let Some(code) = line.strip_prefix("error:") {
        return Ok(Line::Error(code.trim().to_string()));
    }
    if let Some(rest) = line.strip_prefix("ALARM:") {
        let n: u8 = rest
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidAlarm(line.to_string()))?;
        return Ok(Line::Alarm(AlarmCode::from(n)));
    }
    if let Some(rest) = line.strip_prefix("[PRB:") {
        return Ok(Line::Probe(parse_probe(rest)?));
    }
    if let Some(rest) = line.strip_prefix("[G28:") {
        return Ok(Line::StoredPosition(parse_g28(rest)?));
    }
    if let Some(rest) = line.strip_prefix('$') {
        if let Some((key, value)) = rest.split_once('=') {
            return Ok(Line::Setting {
                key: format!("${}", key.trim()),
                value: value.trim().to_string(),
            });
        }
    }
    if line.contains("Grbl") {
        return Ok(Line::Banner(line.to_string()));
    }
    Ok(Line::Other(line.to_string()))
}

fn parse_status_report(line: &str) -> Result<StatusReport, ParseError> {
    let s = line
        .strip_prefix('<')
        .unwrap_or(line)
        .strip_suffix('>')
        .unwrap_or(line);
    let parts: Vec<&str> = s.split('|').collect();
    let state_token = parts.first().map(|p| p.trim()).unwrap_or("");
    if state_token.is_empty() {
        return Err(ParseError::InvalidStatus("empty status".into()));
    }
    let state = parse_state(state_token);

    let mut mpos = None;
    let mut wco = None;
    let mut overrides = None;
    let mut feed = None;
    let mut spindle = None;

    for part in parts.iter().skip(1) {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("MPos:") {
            mpos = Some(parse_position(rest)?);
        } else if let Some(rest) = part.strip_prefix("WCO:") {
            wco = Some(parse_position(rest)?);
        } else if let Some(rest) = part.strip_prefix("Ov:") {
            overrides = Some(parse_overrides(rest)?);
        } else if let Some(rest) = part.strip_prefix("FS:") {
            let (f, s) = parse_fs(rest)?;
            feed = Some(f);
            spindle = Some(s);
        } else if let Some(rest) = part.strip_prefix("F:") {
            feed = Some(rest.trim().parse().map_err(|_| {
                ParseError::InvalidStatus(format!("invalid F: {}", rest))
            })?);
        }
    }

    Ok(StatusReport {
        state,
        mpos,
        wco,
        overrides,
        feed,
        spindle,
    })
}

fn parse_state(s: &str) -> MachineState {
    let (base, rest) = match s.find(':') {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    match base.trim() {
        "Idle" => MachineState::Idle,
        "Run" => MachineState::Run,
        "Hold" => {
            let reason = match rest.and_then(|r| r.trim().parse::<u8>().ok()) {
                Some(1) => HoldReason::SafetyDoor,
                _ => HoldReason::FeedHold,
            };
            MachineState::Hold(reason)
        }
        "Jog" => MachineState::Jog,
        "Alarm" => {
            let code = rest
                .and_then(|r| r.trim().parse::<u8>().ok())
                .map(AlarmCode::from)
                .unwrap_or(AlarmCode::Unknown(0));
            MachineState::Alarm(code)
        }
        "Door" => MachineState::Door,
        "Check" => MachineState::Check,
        "Home" => MachineState::Home,
        "Sleep" => MachineState::Sleep,
        other => MachineState::Unknown(other.to_string()),
    }
}

/// Parses "x,y,z" or "x,y,z,a[,...]". Missing axes default to zero; axes
/// past the fourth are ignored.
fn parse_position(s: &str) -> Result<Axes, ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(ParseError::InvalidPosition(format!(
            "expected at least x,y,z, got: {}",
            s
        )));
    }
    let x: f64 = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidPosition(format!("invalid x: {}", parts[0])))?;
    let y: f64 = parts[1]
        .parse()
        .map_err(|_| ParseError::InvalidPosition(format!("invalid y: {}", parts[1])))?;
    let z: f64 = parts[2]
        .parse()
        .map_err(|_| ParseError::InvalidPosition(format!("invalid z: {}", parts[2])))?;
    let a: f64 = parts.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    Ok(Axes { x, y, z, a })
}

fn parse_fs(s: &str) -> Result<(f64, f64), ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err(ParseError::InvalidStatus(format!(
            "FS expected feed,spindle: {}",
            s
        )));
    }
    let feed: f64 = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid feed: {}", parts[0])))?;
    let spindle: f64 = parts[1]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid spindle: {}", parts[1])))?;
    Ok((feed, spindle))
}

fn parse_overrides(s: &str) -> Result<(u32, u32, u32), ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(ParseError::InvalidStatus(format!("Ov expected 3 fields: {}", s)));
    }
    let a = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid override: {}", parts[0])))?;
    let b = parts[1]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid override: {}", parts[1])))?;
    let c = parts[2]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid override: {}", parts[2])))?;
    Ok((a, b, c))
}

/// Parses a `[PRB:x,y,z,a:flag]` probe report (brackets already stripped of
/// the leading `[PRB:` by the caller).
fn parse_probe(rest: &str) -> Result<ProbeReport, ParseError> {
    let rest = rest.strip_suffix(']').unwrap_or(rest);
    let (pos_str, flag_str) = rest
        .rsplit_once(':')
        .ok_or_else(|| ParseError::InvalidProbe(rest.to_string()))?;
    let pos = parse_position(pos_str).map_err(|_| ParseError::InvalidProbe(rest.to_string()))?;
    let success = flag_str.trim() == "1";
    Ok(ProbeReport { pos, success })
}

/// Parses a `[G28:x,y,z,a]` stored-position report.
fn parse_g28(rest: &str) -> Result<Axes, ParseError> {
    let rest = rest.strip_suffix(']').unwrap_or(rest);
    parse_position(rest).map_err(|_| ParseError::InvalidG28(rest.to_string()))
}

/// Parses the lines of a `$$` settings dump into a key/value map.
/// Malformed lines are skipped rather than erroring — the dump is advisory.
pub fn parse_settings(lines: &str) -> HashMap<String, String> {
    let mut raw = HashMap::new();
    for line in lines.lines() {
        if let Ok(Line::Setting { key, value }) = classify(line) {
            raw.insert(key, value);
        }
    }
    raw
}

/// Absorbs a classified status report into a live `MachineStatus`,
/// recomputing `wpos` afterward. Non-status lines that carry state
/// (alarm, probe, stored-position, setting) are absorbed by their own
/// dedicated functions below.
pub fn absorb_status(status: &mut MachineStatus, report: &StatusReport) {
    status.state = report.state.clone();
    if let Some(mpos) = report.mpos {
        status.mpos = mpos;
    }
    if let Some(wco) = report.wco {
        status.wco = wco;
    }
    if let Some((feed_ov, spindle_ov, _rapid_ov)) = report.overrides {
        status.feed_override = feed_ov;
        status.spindle_override = spindle_ov;
    }
    if let Some(feed) = report.feed {
        status.feed_rate = feed;
    }
    if let Some(spindle) = report.spindle {
        status.spindle_speed = spindle;
    }
    status.recompute_wpos();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_match_example() {
        let mut status = MachineStatus::idle();
        let line = classify("<Idle|MPos:1.000,2.000,3.000,0.000|WCO:1.000,2.000,3.000,0.000>").unwrap();
        match line {
            Line::Status(report) => absorb_status(&mut status, &report),
            _ => panic!("expected status"),
        }
        assert_eq!(status.wpos, Axes::default());
    }

    #[test]
    fn ok_and_error_terminators() {
        assert_eq!(classify("ok").unwrap(), Line::Ok);
        assert_eq!(classify("error:9").unwrap(), Line::Error("9".into()));
    }

    #[test]
    fn alarm_line() {
        assert_eq!(classify("ALARM:1").unwrap(), Line::Alarm(AlarmCode::HardLimit));
    }

    #[test]
    fn probe_line() {
        let line = classify("[PRB:1.000,2.000,-5.500,0.000:1]").unwrap();
        assert_eq!(
            line,
            Line::Probe(ProbeReport {
                pos: Axes { x: 1.0, y: 2.0, z: -5.5, a: 0.0 },
                success: true,
            })
        );
    }

    #[test]
    fn stored_position_line() {
        let line = classify("[G28:0.000,0.000,-1.000,0.000]").unwrap();
        assert_eq!(line, Line::StoredPosition(Axes { x: 0.0, y: 0.0, z: -1.0, a: 0.0 }));
    }

    #[test]
    fn setting_line() {
        let line = classify("$131=400.000").unwrap();
        assert_eq!(
            line,
            Line::Setting { key: "$131".into(), value: "400.000".into() }
        );
    }

    #[test]
    fn banner_line() {
        assert_eq!(
            classify("Grbl 1.1f ['$' for help]").unwrap(),
            Line::Banner("Grbl 1.1f ['$' for help]".into())
        );
    }

    #[test]
    fn opaque_other_line() {
        assert_eq!(classify("[MSG:Reset to continue]").unwrap(), Line::Other("[MSG:Reset to continue]".into()));
    }

    #[test]
    fn status_missing_mpos_leaves_positions_unchanged() {
        let mut status = MachineStatus::idle();
        status.mpos = Axes { x: 5.0, y: 5.0, z: 5.0, a: 0.0 };
        status.recompute_wpos();
        let before = status.clone();
        let report = match classify("<Run|FS:100,0>").unwrap() {
            Line::Status(r) => r,
            _ => panic!(),
        };
        absorb_status(&mut status, &report);
        assert_eq!(status.mpos, before.mpos);
        assert_eq!(status.wpos, before.wpos);
        assert_eq!(status.feed_rate, 100.0);
    }

    #[test]
    fn trailing_axes_past_four_ignored() {
        let pos = parse_position("1,2,3,4,5,6").unwrap();
        assert_eq!(pos, Axes { x: 1.0, y: 2.0, z: 3.0, a: 4.0 });
    }

    #[test]
    fn f_only_variant_updates_feed_only() {
        let report = match classify("<Run|F:250>").unwrap() {
            Line::Status(r) => r,
            _ => panic!(),
        };
        assert_eq!(report.feed, Some(250.0));
        assert_eq!(report.spindle, None);
    }

    #[test]
    fn settings_dump_parses_multiple_lines() {
        let settings = parse_settings("$0=10\n$131=400\nok\n");
        assert_eq!(settings.get("$0"), Some(&"10".to_string()));
        assert_eq!(settings.get("$131"), Some(&"400".to_string()));
    }
}
