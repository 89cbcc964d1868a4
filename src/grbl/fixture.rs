//! Fixture registry and collision check.
//!
//! Fixtures are physical obstacles (e.g. clamps) modeled as cylinders in
//! machine coordinates. The coarse check walks cutting moves directly; the
//! XY check instead builds the hull of all cutting moves and flags rapid
//! transits whose endpoints fall outside it.

use super::analyzer::Bounds;
use super::state::Axes;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub mx: f64,
    pub my: f64,
    pub mz_top: f64,
    pub radius: f64,
}

impl Fixture {
    /// True if the machine-coordinate point lies inside this cylinder:
    /// `(x-mx)^2 + (y-my)^2 < r^2` and `z <= mz_top`.
    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        let dx = x - self.mx;
        let dy = y - self.my;
        (dx * dx + dy * dy) < self.radius * self.radius && z <= self.mz_top
    }
}

#[derive(Default)]
pub struct FixtureRegistry {
    fixtures: Vec<Fixture>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, fixture: Fixture) -> usize {
        self.fixtures.push(fixture);
        self.fixtures.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<Fixture> {
        if index < self.fixtures.len() {
            Some(self.fixtures.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.fixtures.clear();
    }

    pub fn list(&self) -> &[Fixture] {
        &self.fixtures
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collision {
    pub line_index: usize,
    pub work_pos: Axes,
    pub fixture_index: usize,
}

struct CollisionCursor {
    x: f64,
    y: f64,
    z: f64,
    absolute: bool,
    cutting: bool,
}

impl Default for CollisionCursor {
    fn default() -> Self {
        CollisionCursor { x: 0.0, y: 0.0, z: 0.0, absolute: true, cutting: false }
    }
}

fn extract_axis(line: &str, letter: char) -> Option<f64> {
    let upper = letter.to_ascii_uppercase();
    let bytes = line.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i].to_ascii_uppercase() == upper as u8 {
            let rest = &line[i + 1..];
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .unwrap_or(rest.len());
            if let Ok(v) = rest[..end].parse::<f64>() {
                return Some(v);
            }
        }
    }
    None
}

fn contains_token(line: &str, token: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = line[from..].find(token) {
        let abs = from + pos;
        let before_ok = abs == 0 || !line.as_bytes()[abs - 1].is_ascii_alphanumeric();
        let after = abs + token.len();
        let after_ok = after >= line.len() || !line.as_bytes()[after].is_ascii_digit();
        if before_ok && after_ok {
            return true;
        }
        from = abs + token.len();
    }
    false
}

/// Coarse per-line collision check: walks the program tracking position and
/// modality exactly like the analyzer, but only flags `G1` (cutting) moves
/// whose endpoint lies inside a fixture's cylinder in machine coordinates.
pub fn check_collisions(lines: &[String], fixtures: &[Fixture], wco: Axes) -> Vec<Collision> {
    let mut cursor = CollisionCursor::default();
    let mut collisions = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let upper = raw.trim().to_ascii_uppercase();
        if contains_token(&upper, "G90") {
            cursor.absolute = true;
        }
        if contains_token(&upper, "G91") {
            cursor.absolute = false;
        }
        if contains_token(&upper, "G0") || contains_token(&upper, "G00") {
            cursor.cutting = false;
        }
        if contains_token(&upper, "G1") || contains_token(&upper, "G01") {
            cursor.cutting = true;
        }

        let nx = extract_axis(&upper, 'X');
        let ny = extract_axis(&upper, 'Y');
        let nz = extract_axis(&upper, 'Z');
        if let Some(v) = nx {
            cursor.x = if cursor.absolute { v } else { cursor.x + v };
        }
        if let Some(v) = ny {
            cursor.y = if cursor.absolute { v } else { cursor.y + v };
        }
        if let Some(v) = nz {
            cursor.z = if cursor.absolute { v } else { cursor.z + v };
        }

        if cursor.cutting && (nx.is_some() || ny.is_some() || nz.is_some()) {
            let mx = cursor.x + wco.x;
            let my = cursor.y + wco.y;
            let mz = cursor.z + wco.z;
            for (fi, fixture) in fixtures.iter().enumerate() {
                if fixture.contains(mx, my, mz) {
                    collisions.push(Collision {
                        line_index: idx,
                        work_pos: Axes { x: cursor.x, y: cursor.y, z: cursor.z, a: 0.0 },
                        fixture_index: fi,
                    });
                }
            }
        }
    }
    collisions
}

#[derive(Clone, Debug, PartialEq)]
pub struct RapidSegment {
    pub tool: u32,
    pub from: Axes,
    pub to: Axes,
}

/// Refined "XY check": computes the axis-aligned hull of all `G1` XY moves,
/// then collects `G0` rapids whose endpoints fall outside that hull and
/// checks those endpoints against fixtures — catches collisions on
/// transits between cut regions the coarse check misses.
pub fn xy_check(lines: &[String], fixtures: &[Fixture], wco: Axes) -> (Option<Bounds>, Vec<Collision>) {
    let mut cursor = CollisionCursor::default();
    let mut tool = 0u32;
    let mut g1_points: Vec<(f64, f64)> = Vec::new();
    let mut rapids: Vec<(usize, u32, RapidSegment)> = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let upper = raw.trim().to_ascii_uppercase();
        if contains_token(&upper, "G90") {
            cursor.absolute = true;
        }
        if contains_token(&upper, "G91") {
            cursor.absolute = false;
        }
        if contains_token(&upper, "M6") || contains_token(&upper, "M06") {
            if let Some(t) = extract_axis(&upper, 'T') {
                tool = t as u32;
            }
        }

        let rapid = contains_token(&upper, "G0") || contains_token(&upper, "G00");
        let cut = contains_token(&upper, "G1") || contains_token(&upper, "G01");

        let nx = extract_axis(&upper, 'X');
        let ny = extract_axis(&upper, 'Y');
        let nz = extract_axis(&upper, 'Z');
        let from = Axes { x: cursor.x, y: cursor.y, z: cursor.z, a: 0.0 };
        if let Some(v) = nx {
            cursor.x = if cursor.absolute { v } else { cursor.x + v };
        }
        if let Some(v) = ny {
            cursor.y = if cursor.absolute { v } else { cursor.y + v };
        }
        if let Some(v) = nz {
            cursor.z = if cursor.absolute { v } else { cursor.z + v };
        }
        let to = Axes { x: cursor.x, y: cursor.y, z: cursor.z, a: 0.0 };
        let has_xy = nx.is_some() || ny.is_some();

        if cut && has_xy {
            g1_points.push((cursor.x, cursor.y));
        } else if rapid && has_xy {
            rapids.push((idx, tool, RapidSegment { tool, from, to }));
        }
    }

    if g1_points.is_empty() {
        return (None, Vec::new());
    }
    let hull = Bounds {
        x_min: g1_points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min),
        x_max: g1_points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max),
        y_min: g1_points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min),
        y_max: g1_points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max),
        z_min: 0.0,
        z_max: 0.0,
    };
    const MARGIN: f64 = 0.1;
    let outside = |x: f64, y: f64| {
        x < hull.x_min - MARGIN || x > hull.x_max + MARGIN || y < hull.y_min - MARGIN || y > hull.y_max + MARGIN
    };

    let mut collisions = Vec::new();
    for (idx, _tool, seg) in rapids {
        if !(outside(seg.from.x, seg.from.y) || outside(seg.to.x, seg.to.y)) {
            continue;
        }
        for endpoint in [seg.from, seg.to] {
            let mx = endpoint.x + wco.x;
            let my = endpoint.y + wco.y;
            let mz = endpoint.z + wco.z;
            for (fi, fixture) in fixtures.iter().enumerate() {
                if fixture.contains(mx, my, mz) {
                    collisions.push(Collision {
                        line_index: idx,
                        work_pos: endpoint,
                        fixture_index: fi,
                    });
                }
            }
        }
    }
    (Some(hull), collisions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn collision_reported_inside_fixture() {
        let fixtures = vec![Fixture { mx: 50.0, my: 50.0, mz_top: 10.0, radius: 10.0 }];
        let program = lines(&["G90 G1 X45 Y50 Z5 F500"]);
        let collisions = check_collisions(&program, &fixtures, Axes::default());
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].fixture_index, 0);
        assert_eq!(collisions[0].line_index, 0);
    }

    #[test]
    fn no_collision_outside_fixture() {
        let fixtures = vec![Fixture { mx: 50.0, my: 50.0, mz_top: 10.0, radius: 10.0 }];
        let program = lines(&["G90 G1 X0 Y0 Z5 F500"]);
        assert!(check_collisions(&program, &fixtures, Axes::default()).is_empty());
    }

    #[test]
    fn rapid_moves_are_not_flagged_by_coarse_check() {
        let fixtures = vec![Fixture { mx: 50.0, my: 50.0, mz_top: 10.0, radius: 10.0 }];
        let program = lines(&["G90 G0 X45 Y50 Z5"]);
        assert!(check_collisions(&program, &fixtures, Axes::default()).is_empty());
    }

    #[test]
    fn add_remove_restores_registry() {
        let mut reg = FixtureRegistry::new();
        let before = reg.list().to_vec();
        let idx = reg.add(Fixture { mx: 1.0, my: 2.0, mz_top: 3.0, radius: 4.0 });
        reg.remove(idx);
        assert_eq!(reg.list().to_vec(), before);
    }

    #[test]
    fn xy_check_flags_rapid_transit_outside_hull() {
        let fixtures = vec![Fixture { mx: 100.0, my: 0.0, mz_top: 10.0, radius: 5.0 }];
        let program = lines(&[
            "G90 G1 X0 Y0 F300",
            "G1 X10 Y0 F300",
            "G0 X100 Y0 Z2",
        ]);
        let (hull, collisions) = xy_check(&program, &fixtures, Axes::default());
        assert!(hull.is_some());
        assert_eq!(collisions.len(), 1);
    }
}
