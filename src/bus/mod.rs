//! Bus transports: something that can write and re-read a register frame.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::frame::RawFrame;

pub mod serial;
pub mod sim;

#[cfg(test)]
pub mod fake;

#[cfg(target_os = "linux")]
pub mod i2c;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("open {target}: {reason}")]
    Open { target: String, reason: String },
    #[error("read frame from {target}: {reason}")]
    Read { target: String, reason: String },
    #[error("write frame to {target}: {reason}")]
    Write { target: String, reason: String },
    #[cfg(not(target_os = "linux"))]
    #[error("{0} transport is not available on this platform")]
    Unsupported(DeviceType),
}

/// Exclusive handle on one bus endpoint. Dropping it closes the endpoint.
pub trait Transport: Send {
    fn read_frame(&mut self) -> Result<RawFrame, TransportError>;
    fn write_frame(&mut self, frame: &RawFrame) -> Result<(), TransportError>;
    fn describe(&self) -> String;
}

/// Peripheral family. Selects the transport and its quirks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Photon,
    Mbed,
    Serial,
    Sim,
}

impl DeviceType {
    /// Whether a read must be preceded by a register-select write.
    pub fn register_select(self) -> bool {
        !matches!(self, DeviceType::Mbed)
    }

    /// Fixed delay the peripheral needs after every write.
    pub fn settle_delay(self) -> Option<Duration> {
        match self {
            DeviceType::Mbed => Some(Duration::from_millis(250)),
            _ => None,
        }
    }

    pub fn is_i2c(self) -> bool {
        matches!(self, DeviceType::Photon | DeviceType::Mbed)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceType::Photon => "photon",
            DeviceType::Mbed => "mbed",
            DeviceType::Serial => "serial",
            DeviceType::Sim => "sim",
        })
    }
}

impl FromStr for DeviceType {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "photon" => Ok(DeviceType::Photon),
            "mbed" => Ok(DeviceType::Mbed),
            "serial" => Ok(DeviceType::Serial),
            "sim" => Ok(DeviceType::Sim),
            _ => Err(()),
        }
    }
}

/// Where a worker lives on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// 7-bit bus address on the shared i2c adapter.
    Address(u16),
    /// Serial device path.
    Path(String),
    /// In-process peer.
    Local,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Address(a) => write!(f, "0x{:02x}", a),
            Endpoint::Path(p) => f.write_str(p),
            Endpoint::Local => f.write_str("local"),
        }
    }
}

/// Open the transport for one worker.
///
/// `bus` is the i2c adapter path shared by all i2c workers. Sim workers get a
/// peer running the supplied batch size.
pub fn open(
    device_type: DeviceType,
    endpoint: &Endpoint,
    bus: &str,
    batch: u8,
) -> Result<Box<dyn Transport>, TransportError> {
    match (device_type, endpoint) {
        (DeviceType::Photon | DeviceType::Mbed, Endpoint::Address(addr)) => {
            open_i2c(bus, *addr, device_type)
        }
        (DeviceType::Serial, Endpoint::Path(path)) => {
            Ok(Box::new(serial::SerialTransport::open(path)?))
        }
        (DeviceType::Sim, _) => Ok(Box::new(sim::SimTransport::spawn(batch))),
        (_, other) => Err(TransportError::Open {
            target: other.to_string(),
            reason: format!("{} workers cannot use this endpoint", device_type),
        }),
    }
}

#[cfg(target_os = "linux")]
fn open_i2c(
    bus: &str,
    addr: u16,
    device_type: DeviceType,
) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(i2c::I2cTransport::open(bus, addr, device_type)?))
}

#[cfg(not(target_os = "linux"))]
fn open_i2c(
    _bus: &str,
    _addr: u16,
    device_type: DeviceType,
) -> Result<Box<dyn Transport>, TransportError> {
    Err(TransportError::Unsupported(device_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quirks() {
        assert!(DeviceType::Photon.register_select());
        assert!(!DeviceType::Mbed.register_select());
        assert_eq!(
            DeviceType::Mbed.settle_delay(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(DeviceType::Photon.settle_delay(), None);
        assert!(DeviceType::Mbed.is_i2c());
        assert!(!DeviceType::Sim.is_i2c());
    }

    #[test]
    fn device_type_names() {
        for t in [
            DeviceType::Photon,
            DeviceType::Mbed,
            DeviceType::Serial,
            DeviceType::Sim,
        ] {
            assert_eq!(t.to_string().parse::<DeviceType>(), Ok(t));
        }
        assert_eq!("MBED".parse::<DeviceType>(), Ok(DeviceType::Mbed));
        assert!("arduino".parse::<DeviceType>().is_err());
    }

    #[test]
    fn open_rejects_mismatched_endpoint() {
        let err = open(DeviceType::Serial, &Endpoint::Address(0x10), "/dev/i2c-1", 5)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn open_sim() {
        let mut t = open(DeviceType::Sim, &Endpoint::Local, "", 5).unwrap();
        assert!(t.describe().contains("sim"));
        assert!(t.read_frame().is_ok());
    }
}
