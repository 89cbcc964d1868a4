//! Z probe and X/Y edge probe macros, composable into `probe_xy`/`probe_xyz`.

use super::{MacroContext, MacroError};
use crate::config::{
    EDGE_PROBE_BACK_DISTANCE, EDGE_PROBE_CLEARANCE_BASE, EDGE_PROBE_FINAL_OFFSET_BASE,
    EDGE_PROBE_SPURIOUS_CHECK_Z, PROBE_FEED_FAST, PROBE_FEED_SLOW, Z_PROBE_DISTANCE_1,
    Z_PROBE_DISTANCE_2, Z_PROBE_PLATE_THICKNESS, Z_PROBE_RETRACT_1, Z_SAFE_MACHINE_LIMIT,
};
use crate::grbl::Command;

/// Probes down, re-zeros work Z at the known plate thickness, and retracts
/// without ever driving the machine Z past `Z_SAFE_MACHINE_LIMIT`.
pub async fn probe_z(ctx: &MacroContext) -> Result<(), MacroError> {
    ctx.log("probe_z: start");
    ctx.send("G91").await?;

    ctx.send(&format!("G38.2 Z-{:.3} F{:.1}", Z_PROBE_DISTANCE_1, PROBE_FEED_FAST)).await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G0 Z{:.3}", Z_PROBE_RETRACT_1)).await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G38.2 Z-{:.3} F{:.1}", Z_PROBE_DISTANCE_2, PROBE_FEED_SLOW)).await?;
    ctx.wait_idle().await?;

    let plate_offset = Command::SetWcsZero { p: 0, x: None, y: None, z: Some(Z_PROBE_PLATE_THICKNESS) };
    ctx.send(&plate_offset.to_string()).await?;

    let mpos_z = ctx.mpos().await.z;
    let retract = 10.0f64.min((mpos_z.abs() - Z_SAFE_MACHINE_LIMIT.abs()).max(0.0));
    ctx.send(&format!("G0 Z{:.3}", retract)).await?;
    ctx.wait_idle().await?;

    ctx.send("G90").await?;
    ctx.log("probe_z: done");
    Ok(())
}

/// Shared edge-probe body for X and Y, parameterized by axis letter and an
/// explicit sign so callers composing this (e.g. rotary chuck find) aren't
/// limited to the invoking context's own `edge_sign`.
pub(super) async fn probe_edge_with_sign(ctx: &MacroContext, axis: char, sign: f64) -> Result<(), MacroError> {
    let r = ctx.tool_diameter / 2.0;

    ctx.send("G91").await?;
    let clearance = sign * (EDGE_PROBE_CLEARANCE_BASE + r);
    ctx.send(&format!("G0 {axis}{clearance:.3}")).await?;
    ctx.wait_idle().await?;

    // Spurious-trip guard: this Z travel must not find a surface.
    ctx.send(&format!("G38.3 Z{:.3} F{:.1}", EDGE_PROBE_SPURIOUS_CHECK_Z, PROBE_FEED_FAST)).await?;
    ctx.wait_idle().await?;
    if ctx.engine.snapshot().await.last_probe.map(|p| p.success).unwrap_or(false) {
        return Err(MacroError::Precondition("spurious probe contact before edge approach".into()));
    }
    ctx.send(&format!("G0 Z{:.3}", -EDGE_PROBE_SPURIOUS_CHECK_Z)).await?;
    ctx.wait_idle().await?;

    let approach = -sign * (EDGE_PROBE_CLEARANCE_BASE + r + 5.0);
    ctx.send(&format!("G38.2 {axis}{approach:.3} F{:.1}", PROBE_FEED_FAST)).await?;
    ctx.wait_idle().await?;

    ctx.send(&format!("G0 {axis}{:.3}", sign * EDGE_PROBE_BACK_DISTANCE)).await?;
    ctx.wait_idle().await?;

    let refine = -sign * (EDGE_PROBE_BACK_DISTANCE + 2.0);
    ctx.send(&format!("G38.2 {axis}{refine:.3} F{:.1}", PROBE_FEED_SLOW)).await?;
    ctx.wait_idle().await?;

    let value = sign * (EDGE_PROBE_FINAL_OFFSET_BASE + r);
    let edge_offset = match axis {
        'X' => Command::SetWcsZero { p: 0, x: Some(value), y: None, z: None },
        _ => Command::SetWcsZero { p: 0, x: None, y: Some(value), z: None },
    };
    ctx.send(&edge_offset.to_string()).await?;

    // Escape: raise Z before reversing XY so the tool doesn't drag.
    ctx.send("G0 Z2").await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G0 {axis}{:.3}", -sign * EDGE_PROBE_BACK_DISTANCE)).await?;
    ctx.wait_idle().await?;

    ctx.send("G90").await?;
    Ok(())
}

pub async fn probe_x(ctx: &MacroContext) -> Result<(), MacroError> {
    ctx.log("probe_x: start");
    probe_edge_with_sign(ctx, 'X', ctx.edge_sign).await?;
    ctx.log("probe_x: done");
    Ok(())
}

pub async fn probe_y(ctx: &MacroContext) -> Result<(), MacroError> {
    ctx.log("probe_y: start");
    probe_edge_with_sign(ctx, 'Y', ctx.edge_sign).await?;
    ctx.log("probe_y: done");
    Ok(())
}

pub async fn probe_xy(ctx: &MacroContext) -> Result<(), MacroError> {
    probe_x(ctx).await?;
    probe_y(ctx).await?;
    Ok(())
}

pub async fn probe_xyz(ctx: &MacroContext) -> Result<(), MacroError> {
    probe_z(ctx).await?;
    probe_x(ctx).await?;
    probe_y(ctx).await?;
    Ok(())
}
