//! Probe fixture (cylinder finder): locates a cylindrical fixture by probing
//! outward from an operator-chosen interior point until the hard-limit
//! alarm fires, using three such contacts to solve for the circumcenter.

use super::{MacroContext, MacroError};
use crate::config::{
    FIXTURE_PROBE_BACKOFF_MM, FIXTURE_PROBE_DISTANCE_MM, FIXTURE_PROBE_FEED, FIXTURE_WCS_SLOT,
    HARD_LIMITS_SETTING_KEY, PROBE_FEED_SLOW,
};
use crate::grbl::fixture::Fixture;
use crate::grbl::state::{Axes, MachineState};
use crate::hub::HubEvent;
use std::time::Duration;

async fn wait_for_alarm(ctx: &MacroContext, timeout: Duration) -> Result<(), MacroError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if matches!(ctx.engine.snapshot().await.state, MachineState::Alarm(_)) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(MacroError::Precondition("hard limit never tripped".into()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Probes outward along `angle_deg` (measured from +X) until the hard-limit
/// alarm fires, then clears the alarm and backs off. Returns the contact
/// point in machine coordinates.
async fn probe_angle(ctx: &MacroContext, angle_deg: f64) -> Result<Axes, MacroError> {
    let radians = angle_deg.to_radians();
    let (dx, dy) = (radians.cos(), radians.sin());

    ctx.send_fire_and_forget(&format!(
        "G91 G1 X{:.3} Y{:.3} F{:.1}",
        dx * FIXTURE_PROBE_DISTANCE_MM,
        dy * FIXTURE_PROBE_DISTANCE_MM,
        FIXTURE_PROBE_FEED,
    ))
    .await?;

    wait_for_alarm(ctx, Duration::from_secs(30)).await?;
    let contact = ctx.mpos().await;

    ctx.send("$X").await?;
    ctx.send(&format!(
        "G91 G0 X{:.3} Y{:.3}",
        -dx * FIXTURE_PROBE_BACKOFF_MM,
        -dy * FIXTURE_PROBE_BACKOFF_MM,
    ))
    .await?;
    ctx.wait_idle().await?;
    ctx.send("G90").await?;
    Ok(contact)
}

/// Solves three points on a circle for center and mean radius.
fn circumcenter(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> (f64, f64, f64) {
    let (x1, y1) = a;
    let (x2, y2) = b;
    let (x3, y3) = c;
    let d = 2.0 * (x1 * (y2 - y3) + x2 * (y3 - y1) + x3 * (y1 - y2));
    let ux = ((x1 * x1 + y1 * y1) * (y2 - y3)
        + (x2 * x2 + y2 * y2) * (y3 - y1)
        + (x3 * x3 + y3 * y3) * (y1 - y2))
        / d;
    let uy = ((x1 * x1 + y1 * y1) * (x3 - x2)
        + (x2 * x2 + y2 * y2) * (x1 - x3)
        + (x3 * x3 + y3 * y3) * (x2 - x1))
        / d;
    let r1 = ((x1 - ux).powi(2) + (y1 - uy).powi(2)).sqrt();
    let r2 = ((x2 - ux).powi(2) + (y2 - uy).powi(2)).sqrt();
    let r3 = ((x3 - ux).powi(2) + (y3 - uy).powi(2)).sqrt();
    (ux, uy, (r1 + r2 + r3) / 3.0)
}

pub async fn probe_fixture(ctx: &MacroContext) -> Result<(), MacroError> {
    ctx.log("probe_fixture: start");
    ctx.send(&format!("{HARD_LIMITS_SETTING_KEY}=0")).await?;

    let mut contacts = Vec::new();
    for angle in [0.0, 120.0, 240.0] {
        match probe_angle(ctx, angle).await {
            Ok(point) => contacts.push((point.x, point.y)),
            Err(e) => {
                let _ = ctx.send(&format!("{HARD_LIMITS_SETTING_KEY}=1")).await;
                return Err(e);
            }
        }
    }

    let (cx, cy, radius) = circumcenter(contacts[0], contacts[1], contacts[2]);

    let edge_angle = 0.0_f64;
    ctx.send(&format!(
        "G53 G0 X{:.3} Y{:.3}",
        cx + radius * edge_angle.cos(),
        cy + radius * edge_angle.sin(),
    ))
    .await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G38.2 Z-20 F{PROBE_FEED_SLOW:.1}")).await?;
    ctx.wait_idle().await?;
    let top_z = ctx.mpos().await.z;

    let result = ctx.send(&format!("{HARD_LIMITS_SETTING_KEY}=1")).await;

    let fixture = Fixture { mx: cx, my: cy, mz_top: top_z, radius };
    ctx.hub.publish(HubEvent::FixtureDiscovered(fixture));
    ctx.send(&format!(
        "G10 L2 P{FIXTURE_WCS_SLOT} X{cx:.3} Y{cy:.3} Z{top_z:.3}",
    ))
    .await?;

    result?;
    ctx.log("probe_fixture: done");
    Ok(())
}
