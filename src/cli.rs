//! Command-line surface: two flags, both optional.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "grbl-core", about = "CNC controller core: serial link, streaming, macros, control channel")]
pub struct Cli {
    /// HTTP port the control channel listens on.
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Serial device path to open on startup. If omitted, the controller
    /// connects later via a `connect` control-channel message.
    #[arg(long)]
    pub device: Option<String>,
}
