//! Controller communication: serial link, line protocol, streaming engine,
//! macro engine, and supporting analysis/fixture modules.
//!
//! **Public API:** [`ProtocolEngine`] — connect, disconnect, send commands,
//! subscribe to status. [`Streamer`] drives a loaded program over an engine.
//! [`MacroEngine::spawn`] dispatches a named macro. Use [`list_ports`] to
//! discover serial devices.

mod analyzer;
mod commands;
mod fixture;
mod link;
pub mod macros;
mod parser;
mod poller;
mod protocol;
mod state;
mod streamer;

pub use analyzer::{analyze, AnalyzerReport, Bounds};
pub use commands::{Command, RealtimeCommand};
pub use fixture::{check_collisions, xy_check, Collision, Fixture, FixtureRegistry, RapidSegment};
pub use link::{list_ports, LinkError, NullTransport, PortInfo, SerialLink, SerialTransport};
pub use parser::{classify, Line, ParseError, ProbeReport, StatusReport};
pub use macros::{MacroContext, MacroEngine, MacroError, MacroHandle};
pub use poller::run as run_poller;
pub use protocol::{CommandResult, ProtocolEngine};
pub use state::{AlarmCode, Axes, HoldReason, MachineState, MachineStatus, ProbeResult};
pub use streamer::{StreamCommand, StreamError, StreamState, Streamer};

#[cfg(test)]
pub use link::FakeTransport;
