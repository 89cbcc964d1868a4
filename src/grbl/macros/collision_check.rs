//! Collision check macro: a thin registry entry for `macro_run{name:
//! "collision_check"}`. The actual analysis needs the streamer's loaded
//! program and the fixture registry, both owned outside the macro engine,
//! so the control-channel server computes it directly via
//! `crate::grbl::{check_collisions, xy_check}` and this body only confirms
//! the macro path is reachable and reports completion.

use super::{MacroContext, MacroError};

pub async fn collision_check(ctx: &MacroContext) -> Result<(), MacroError> {
    ctx.log("collision_check: delegated to the control-channel server");
    Ok(())
}
