//! Tool Measure (SetZ): probes at the stored position to record a
//! machine-coordinate reference Z that Tool Change later diffs against.

use super::{MacroContext, MacroError};
use crate::config::{PROBE_FEED_FAST, PROBE_FEED_SLOW, SAFE_Z_MACHINE_MM};
use crate::grbl::Command;

pub async fn set_z(ctx: &MacroContext) -> Result<(), MacroError> {
    ctx.log("set_z: start");
    let saved = ctx.wpos().await;

    ctx.send(&format!("G53 G0 Z{:.3}", SAFE_Z_MACHINE_MM)).await?;
    ctx.wait_idle().await?;

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

    let probe_work_z = ctx.mpos().await.z;
    ctx.set_probe_work_z(probe_work_z).await;
    ctx.mark_set_z_complete();

    ctx.send(&format!("G90 G0 X{:.3} Y{:.3}", saved.x, saved.y)).await?;
    ctx.wait_idle().await?;
    ctx.send(&format!("G90 G0 Z{:.3}", saved.z)).await?;
    ctx.wait_idle().await?;

    ctx.log("set_z: done");
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
    async fn set_z_macro_is_registered_and_fails_fast_without_connection() {
        let transport: Box<dyn crate::grbl::link::SerialTransport> = Box::new(FakeTransport::new());
        let hub = Hub::new();
        let engine = Arc::new(ProtocolEngine::new(transport, hub.clone()));
        let macros = MacroEngine::new(engine, hub);
        let (_handle, join) = macros.spawn("set_z", 6.35, 1.0).expect("set_z should be registered");
        let result = join.await.unwrap();
        assert_eq!(result, Err(MacroError::NotConnected));
    }
}
