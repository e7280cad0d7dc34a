use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use log::trace;

use super::{DeviceType, Transport, TransportError};
use crate::frame::{FRAME_LEN, RawFrame, to_hex};

/// Linux i2c-dev endpoint for one peripheral address.
pub struct I2cTransport {
    dev: LinuxI2CDevice,
    bus: String,
    addr: u16,
    device_type: DeviceType,
}

impl I2cTransport {
    pub fn open(bus: &str, addr: u16, device_type: DeviceType) -> Result<Self, TransportError> {
        let dev = LinuxI2CDevice::new(bus, addr).map_err(|e| TransportError::Open {
            target: format!("{}@0x{:02x}", bus, addr),
            reason: e.to_string(),
        })?;
        Ok(Self {
            dev,
            bus: bus.to_string(),
            addr,
            device_type,
        })
    }
}

impl Transport for I2cTransport {
    fn read_frame(&mut self) -> Result<RawFrame, TransportError> {
        // mbed slaves misbehave when the start condition is raised twice
        if self.device_type.register_select() {
            self.dev.write(&[0u8; 2]).map_err(|e| TransportError::Read {
                target: self.describe(),
                reason: format!("register select: {}", e),
            })?;
        }
        let mut raw = [0u8; FRAME_LEN];
        self.dev
            .read(&mut raw)
            .map_err(|e| TransportError::Read {
                target: self.describe(),
                reason: e.to_string(),
            })?;
        trace!("[i2c] 0x{:02x} <- {}", self.addr, to_hex(&raw));
        Ok(raw)
    }

    fn write_frame(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        trace!("[i2c] 0x{:02x} -> {}", self.addr, to_hex(frame));
        self.dev.write(frame).map_err(|e| TransportError::Write {
            target: self.describe(),
            reason: e.to_string(),
        })?;
        if let Some(d) = self.device_type.settle_delay() {
            std::thread::sleep(d);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} {}@0x{:02x}", self.device_type, self.bus, self.addr)
    }
}
