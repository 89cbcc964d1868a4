//! G-code analyzer: a single forward pass over a loaded program computing
//! bounds, peak feeds, spindle range, per-line cumulative time, and
//! tool-change line indices.
//!
//! Tracks modal G90/G91 state and cursor position the same way a controller
//! would while streaming, so the reported bounds and timing reflect what
//! will actually happen on the machine rather than the raw text.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerReport {
    pub max_feed: f64,
    pub max_plunge: f64,
    pub min_spindle: f64,
    pub max_spindle: f64,
    pub tool_change_line_indices: Vec<usize>,
    pub per_line_cumulative_minutes: Vec<f64>,
    pub per_line_minutes_to_next_tool_change: Vec<f64>,
    pub total_minutes: f64,
    pub bounds_xyz: Bounds,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Modality {
    Rapid,
    Cut,
}

struct Cursor {
    x: f64,
    y: f64,
    z: f64,
    absolute: bool,
    modality: Modality,
    feed: f64,
    has_position: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            absolute: true,
            modality: Modality::Rapid,
            feed: 0.0,
            has_position: false,
        }
    }
}

fn extract_axis(line: &str, letter: char) -> Option<f64> {
    let upper = letter.to_ascii_uppercase();
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].to_ascii_uppercase() == upper as u8 {
            let rest = &line[i + 1..];
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .unwrap_or(rest.len());
            if let Ok(v) = rest[..end].parse::<f64>() {
                return Some(v);
            }
        }
        i += 1;
    }
    None
}

fn has_word(line: &str, word: &str) -> bool {
    line.split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
        .any(|tok| tok.eq_ignore_ascii_case(word))
}

/// Analyzes a loaded program's lines into an `AnalyzerReport`. Lines are
/// assumed already filtered to non-empty, non-comment source (as the
/// streaming engine stores them).
pub fn analyze(lines: &[String]) -> AnalyzerReport {
    let mut cursor = Cursor::default();
    let mut report = AnalyzerReport {
        min_spindle: f64::INFINITY,
        max_spindle: f64::NEG_INFINITY,
        ..AnalyzerReport::default()
    };
    let mut bounds = Bounds {
        x_min: f64::INFINITY,
        x_max: f64::NEG_INFINITY,
        y_min: f64::INFINITY,
        y_max: f64::NEG_INFINITY,
        z_min: f64::INFINITY,
        z_max: f64::NEG_INFINITY,
    };
    let mut cumulative = 0.0;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        let upper = line.to_ascii_uppercase();

        if has_word(&upper, "G90") {
            cursor.absolute = true;
        }
        if has_word(&upper, "G91") {
            cursor.absolute = false;
        }
        if word_is_motion(&upper, "G0") || word_is_motion(&upper, "G00") {
            cursor.modality = Modality::Rapid;
        }
        for g in ["G1", "G01", "G2", "G02", "G3", "G03"] {
            if word_is_motion(&upper, g) {
                cursor.modality = Modality::Cut;
            }
        }
        if upper.contains("M6") || upper.contains("M06") {
            report.tool_change_line_indices.push(idx);
        }
        if let Some(f) = extract_axis(&upper, 'F') {
            cursor.feed = f;
        }
        if let Some(s) = extract_axis(&upper, 'S') {
            if s > 0.0 {
                report.min_spindle = report.min_spindle.min(s);
                report.max_spindle = report.max_spindle.max(s);
            }
        }

        let new_x = extract_axis(&upper, 'X');
        let new_y = extract_axis(&upper, 'Y');
        let new_z = extract_axis(&upper, 'Z');
        let has_move = new_x.is_some() || new_y.is_some() || new_z.is_some();

        let (old_x, old_y, old_z) = (cursor.x, cursor.y, cursor.z);
        if let Some(v) = new_x {
            cursor.x = if cursor.absolute { v } else { cursor.x + v };
        }
        if let Some(v) = new_y {
            cursor.y = if cursor.absolute { v } else { cursor.y + v };
        }
        if let Some(v) = new_z {
            cursor.z = if cursor.absolute { v } else { cursor.z + v };
        }

        if has_move {
            cursor.has_position = true;
            bounds.x_min = bounds.x_min.min(cursor.x);
            bounds.x_max = bounds.x_max.max(cursor.x);
            bounds.y_min = bounds.y_min.min(cursor.y);
            bounds.y_max = bounds.y_max.max(cursor.y);
            bounds.z_min = bounds.z_min.min(cursor.z);
            bounds.z_max = bounds.z_max.max(cursor.z);

            if cursor.modality == Modality::Cut {
                let dist = ((cursor.x - old_x).powi(2)
                    + (cursor.y - old_y).powi(2)
                    + (cursor.z - old_z).powi(2))
                .sqrt();
                if cursor.feed > 0.0 {
                    let minutes = dist / cursor.feed;
                    cumulative += minutes;
                    let descending_plunge = new_z.is_some() && cursor.z < old_z;
                    if descending_plunge {
                        report.max_plunge = report.max_plunge.max(cursor.feed);
                    } else {
                        report.max_feed = report.max_feed.max(cursor.feed);
                    }
                }
            }
        }

        report.per_line_cumulative_minutes.push(cumulative);
    }

    report.total_minutes = cumulative;
    report.per_line_minutes_to_next_tool_change =
        minutes_to_next_tool_change(&report.per_line_cumulative_minutes, &report.tool_change_line_indices);

    if !cursor.has_position {
        bounds = Bounds::default();
    }
    report.bounds_xyz = bounds;
    if report.min_spindle.is_infinite() {
        report.min_spindle = 0.0;
    }
    if report.max_spindle.is_infinite() {
        report.max_spindle = 0.0;
    }
    report
}

/// True if `line` contains `word` as a motion command token: at the start
/// of the trimmed line or preceded by whitespace, and not immediately
/// followed by a decimal continuation (so "G0" doesn't match inside "G01").
fn word_is_motion(line: &str, word: &str) -> bool {
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find(word) {
        let abs = search_from + pos;
        let before_ok = abs == 0 || !line.as_bytes()[abs - 1].is_ascii_alphanumeric();
        let after = abs + word.len();
        let after_ok = after >= line.len() || !line.as_bytes()[after].is_ascii_digit();
        if before_ok && after_ok {
            return true;
        }
        search_from = abs + word.len();
    }
    false
}

fn minutes_to_next_tool_change(cumulative: &[f64], tool_change_indices: &[usize]) -> Vec<f64> {
    let total = cumulative.len();
    let mut result = vec![0.0; total];
    if total == 0 {
        return result;
    }
    let end_minutes = cumulative[total - 1];
    let mut next_markers: Vec<f64> = tool_change_indices
        .iter()
        .map(|&i| cumulative[i])
        .collect();
    next_markers.push(end_minutes);

    let mut marker_idx = 0;
    for i in 0..total {
        while marker_idx < tool_change_indices.len() && tool_change_indices[marker_idx] < i {
            marker_idx += 1;
        }
        let target = if marker_idx < next_markers.len() {
            next_markers[marker_idx]
        } else {
            end_minutes
        };
        result[i] = (target - cumulative[i]).max(0.0);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn total_minutes_matches_sum_of_moves() {
        let report = analyze(&lines(&["G90", "G1 X10 F600"]));
        assert!((report.total_minutes - (10.0 / 600.0)).abs() < 1e-9);
        assert_eq!(report.max_feed, 600.0);
        assert_eq!(report.max_plunge, 0.0);
    }

    #[test]
    fn plunge_move_tracked_separately() {
        let report = analyze(&lines(&["G90", "G1 Z-5 F100"]));
        assert_eq!(report.max_plunge, 100.0);
        assert_eq!(report.max_feed, 0.0);
    }

    #[test]
    fn zero_feed_move_contributes_no_time_and_excluded_from_max_feed() {
        let report = analyze(&lines(&["G90", "G1 X10 F0"]));
        assert_eq!(report.total_minutes, 0.0);
        assert_eq!(report.max_feed, 0.0);
    }

    #[test]
    fn tool_change_detected() {
        let report = analyze(&lines(&["G90", "M6 T2", "G1 X1 F100"]));
        assert_eq!(report.tool_change_line_indices, vec![1]);
    }

    #[test]
    fn spindle_range_ignores_zero_and_negative() {
        let report = analyze(&lines(&["S0", "S1000", "S500"]));
        assert_eq!(report.min_spindle, 500.0);
        assert_eq!(report.max_spindle, 1000.0);
    }

    #[test]
    fn g90_g91_g90_round_trip_matches_pure_absolute() {
        let relative = analyze(&lines(&["G90", "G1 X10 F600", "G91", "G1 X5 F600", "G90", "G1 X20 F600"]));
        let absolute = analyze(&lines(&["G90", "G1 X10 F600", "G1 X15 F600", "G1 X20 F600"]));
        assert!((relative.total_minutes - absolute.total_minutes).abs() < 1e-9);
    }

    #[test]
    fn analysis_is_idempotent() {
        let src = lines(&["G90", "G1 X10 Y5 F300", "M6 T1", "G1 Z-2 F50"]);
        let a = analyze(&src);
        let b = analyze(&src);
        assert_eq!(a, b);
    }

    #[test]
    fn minutes_to_next_tool_change_counts_down() {
        let report = analyze(&lines(&["G90", "G1 X10 F600", "M6 T1", "G1 X20 F600"]));
        // Line 0 has no move; line 1 ends at 10/600 minutes, before the M6 at line 2.
        assert!(report.per_line_minutes_to_next_tool_change[1] >= 0.0);
        assert_eq!(*report.per_line_minutes_to_next_tool_change.last().unwrap(), 0.0);
    }
}
