use clap::Parser;
use grbl_core::cli::Cli;
use grbl_core::config::{DEFAULT_LOG_DIR, DEFAULT_RECOVERY_PATH, SERIAL_LOG_RETENTION_DAYS};
use grbl_core::error::GrblError;
use grbl_core::grbl::{MacroEngine, NullTransport, ProtocolEngine, SerialLink, Streamer};
use grbl_core::hub::Hub;
use grbl_core::log::SerialLog;
use grbl_core::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), GrblError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let log_dir = PathBuf::from(DEFAULT_LOG_DIR);
    SerialLog::prune(&log_dir, SERIAL_LOG_RETENTION_DAYS)?;
    let serial_log = SerialLog::open(&log_dir)?;

    let hub = Hub::new();
    let transport: Box<dyn grbl_core::grbl::SerialTransport> = Box::new(NullTransport);
    let engine = Arc::new(ProtocolEngine::new(transport, hub.clone()));
    engine.set_serial_log(serial_log);

    if let Some(device) = cli.device.as_deref() {
        match SerialLink::open(device) {
            Ok(link) => {
                engine.set_transport(Box::new(link));
                engine.connect(device).await;
                info!("connected to {}", device);
            }
            Err(e) => {
                return Err(GrblError::Startup(format!("failed to open {device}: {e}")));
            }
        }
    }

    let recovery_path = PathBuf::from(DEFAULT_RECOVERY_PATH);
    let streamer = Arc::new(Streamer::new(Arc::clone(&engine), hub.clone(), recovery_path));
    let macros = Arc::new(MacroEngine::new(Arc::clone(&engine), hub.clone()));

    let state = Arc::new(AppState::new(Arc::clone(&engine), Arc::clone(&streamer), macros, hub));
    server::spawn_fixture_sync(Arc::clone(&state));

    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port))
        .await
        .map_err(|e| GrblError::Startup(format!("failed to bind port {}: {e}", cli.port)))?;

    info!("listening on port {}", cli.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GrblError::Startup(format!("server error: {e}")))?;

    engine.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
