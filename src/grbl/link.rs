//! Serial link: opens the controller device with the DTR discipline the
//! protocol requires and exposes raw read/write primitives.
//!
//! On a common controller variant, pulsing DTR triggers a hardware reset
//! that silently discards in-flight work, so DTR is held low and hardware
//! handshake is disabled for the life of the connection.

use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;

pub const BAUD_RATE: u32 = 115_200;
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
}

/// Abstraction over the byte pipe beneath the protocol engine, so the
/// engine and its tests don't depend on real hardware.
pub trait SerialTransport: Send {
    fn read_chunk(&mut self) -> Result<Vec<u8>, LinkError>;
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
}

/// Real serial link over a named device.
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    pub fn open(device: &str) -> Result<Self, LinkError> {
        let mut port = serialport::new(device, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|source| LinkError::Open {
                device: device.to_string(),
                source,
            })?;
        // DTR low: pulsing it resets some controller variants and discards
        // in-flight work.
        let _ = port.write_data_terminal_ready(false);
        Ok(SerialLink { port })
    }
}

impl SerialTransport for SerialLink {
    fn read_chunk(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut buf = [0u8; 256];
        match self.port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(LinkError::Read(e)),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.port.write_all(bytes).map_err(LinkError::Write)?;
        self.port.flush().map_err(LinkError::Write)
    }
}

/// Placeholder transport installed before any device is connected. Reads
/// return nothing and writes are silently discarded; the protocol engine
/// refuses to use it for real commands via its own `is_connected` gate.
pub struct NullTransport;

impl SerialTransport for NullTransport {
    fn read_chunk(&mut self) -> Result<Vec<u8>, LinkError> {
        Ok(Vec::new())
    }

    fn write_bytes(&mut self, _bytes: &[u8]) -> Result<(), LinkError> {
        Ok(())
    }
}

/// A single enumerated serial port.
#[derive(Clone, Debug, serde::Serialize)]
pub struct PortInfo {
    pub name: String,
}

pub fn list_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = serialport::available_ports().map_err(|source| LinkError::Open {
        device: "<enumerate>".into(),
        source,
    })?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo { name: p.port_name })
        .collect())
}

/// In-memory transport double used by tests: a queue of chunks to return on
/// read, and a record of everything written.
#[cfg(test)]
pub struct FakeTransport {
    pub inbound: std::collections::VecDeque<Vec<u8>>,
    pub written: Vec<Vec<u8>>,
}

#[cfg(test)]
impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            inbound: std::collections::VecDeque::new(),
            written: Vec::new(),
        }
    }

    pub fn push_line(&mut self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.inbound.push_back(bytes);
    }
}

#[cfg(test)]
impl SerialTransport for FakeTransport {
    fn read_chunk(&mut self) -> Result<Vec<u8>, LinkError> {
        Ok(self.inbound.pop_front().unwrap_or_default())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.written.push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_transport_round_trip() {
        let mut t = FakeTransport::new();
        t.push_line("ok");
        assert_eq!(t.read_chunk().unwrap(), b"ok\n".to_vec());
        t.write_bytes(b"G0 X0\n").unwrap();
        assert_eq!(t.written[0], b"G0 X0\n".to_vec());
    }
}
