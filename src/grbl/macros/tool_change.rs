//! Tool Change: moves to the configured tool-change position, waits for the
//! operator to swap tools, then re-probes to compute and apply the new
//! tool's Z offset. Requires a prior `set_z` run in this session.

use super::{MacroContext, MacroError};
use crate::config::{PROBE_FEED_FAST, PROBE_FEED_SLOW, SAFE_Z_MACHINE_MM, TOOL_CHANGE_X_MM, TOOL_CHANGE_Y_MM};
use crate::grbl::Command;

pub async fn tool_change(ctx: &MacroContext) -> Result<(), MacroError> {
    if !ctx.is_set_z_complete() {
        return Err(MacroError::Precondition("set_z has not run in this session".into()));
    }
    let probe_work_z = ctx.probe_work_z().await.ok_or_else(|| {
        MacroError::Precondition("no probe_work_z recorded".into())
    })?;

    ctx.log("tool_change: start");
    let saved = ctx.wpos().await;
    let start_z = ctx.mpos().await.z;

    ctx.send(&format!("G53 G0 Z{:.3}", SAFE_Z_MACHINE_MM)).await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G53 G0 X{:.3} Y{:.3}", TOOL_CHANGE_X_MM, TOOL_CHANGE_Y_MM)).await?;
    ctx.wait_idle().await?;

    ctx.wait_continue().await?;

    let safe_z_offset = Command::SetWcsZero { p: 0, x: None, y: None, z: Some(SAFE_Z_MACHINE_MM) };
    ctx.send(&safe_z_offset.to_string()).await?;

    let g28 = ctx.g28_position().await;
    ctx.send(&format!("G53 G0 X{:.3} Y{:.3}", g28.x, g28.y)).await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G53 G0 Z{:.3}", g28.z)).await?;
    ctx.wait_idle().await?;

    ctx.send(&format!("G38.2 Z-20 F{:.1}", PROBE_FEED_FAST)).await?;
    ctx.wait_idle().await?;
    ctx.send("G91 G0 Z2").await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G38.2 Z-5 F{:.1}", PROBE_FEED_SLOW)).await?;
    ctx.wait_idle().await?;

    let new_mpos_z = ctx.mpos().await.z;
    let tool_offset = probe_work_z - new_mpos_z;
    ctx.set_probe_work_z(new_mpos_z).await;

    let offset_to_safe = SAFE_Z_MACHINE_MM - start_z;
    let applied_z = start_z + offset_to_safe + tool_offset;
    let applied_offset = Command::SetWcsZero { p: 0, x: None, y: None, z: Some(applied_z) };
    ctx.send(&applied_offset.to_string()).await?;

    ctx.send(&format!("G90 G0 X{:.3} Y{:.3}", saved.x, saved.y)).await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G90 G0 Z{:.3}", saved.z)).await?;
    ctx.wait_idle().await?;

    ctx.log("tool_change: done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grbl::link::FakeTransport;
    use crate::grbl::macros::MacroEngine;
    use crate::grbl::protocol::ProtocolEngine;
    use crate::hub::Hub;
    use std::sync::Arc;

    #[tokio::test]
    async fn tool_change_requires_prior_set_z() {
        let transport: Box<dyn crate::grbl::link::SerialTransport> = Box::new(FakeTransport::new());
        let hub = Hub::new();
        let engine = Arc::new(ProtocolEngine::new(transport, hub.clone()));
        let macros = MacroEngine::new(engine, hub);
        let (_handle, join) = macros.spawn("tool_change", 6.35, 1.0).expect("tool_change should be registered");
        let result = join.await.unwrap();
        assert_eq!(result, Err(MacroError::Precondition("set_z has not run in this session".into())));
    }
}
