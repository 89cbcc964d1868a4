//! CNC controller core: serial link, streaming engine, macro engine, and a
//! JSON-framed control channel served over a websocket.

pub mod cli;
pub mod config;
pub mod error;
pub mod grbl;
pub mod hub;
pub mod log;
pub mod recovery;
pub mod server;
