//! Rotary chuck find: locates a rotary fixture's centerline by chaining
//! edge probes with fixed signs and offsetting the work origin onto it.

use super::probe_xyz::{probe_edge_with_sign, probe_z};
use super::{MacroContext, MacroError};
use crate::config::{ROTARY_X_OFFSET_MM, ROTARY_Y_OFFSET_MM, ROTARY_Z_OFFSET_MM};
use crate::grbl::Command;

pub async fn rotary_chuck_find(ctx: &MacroContext) -> Result<(), MacroError> {
    ctx.log("rotary_chuck_find: start");

    probe_edge_with_sign(ctx, 'X', 1.0).await?;
    let x_offset = Command::SetWcsZero { p: 0, x: Some(ROTARY_X_OFFSET_MM), y: None, z: None };
    ctx.send(&format!("G91 {x_offset}")).await?;

    probe_edge_with_sign(ctx, 'Y', -1.0).await?;
    let y_offset = Command::SetWcsZero { p: 0, x: None, y: Some(ROTARY_Y_OFFSET_MM), z: None };
    ctx.send(&format!("G91 {y_offset}")).await?;

    probe_z(ctx).await?;
    let z_offset = Command::SetWcsZero { p: 0, x: None, y: None, z: Some(ROTARY_Z_OFFSET_MM) };
    ctx.send(&format!("G91 {z_offset}")).await?;

    ctx.log("rotary_chuck_find: done");
    Ok(())
}
