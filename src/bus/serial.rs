use log::{debug, trace};
use serialport::SerialPort;

use super::{Transport, TransportError};
use crate::frame::RawFrame;
use crate::port::{DEFAULT_BAUD, LineReader, open_port, write_line};
use crate::proto::parser::{LineMsg, format_line, parse_line};

/// Lines tolerated between a REG READ and its REG DATA answer.
const MAX_STRAY_LINES: usize = 4;

/// Register access tunnelled over a UART, answered by `efp-dispatch peer`.
pub struct SerialTransport {
    dev: String,
    port: Box<dyn SerialPort>,
    reader: LineReader<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(dev: &str) -> Result<Self, TransportError> {
        let open_err = |reason: String| TransportError::Open {
            target: dev.to_string(),
            reason,
        };
        let port = open_port(dev, DEFAULT_BAUD).map_err(|e| open_err(e.to_string()))?;
        // Clone it for independent read/write handles
        let reader = LineReader::new(port.try_clone().map_err(|e| open_err(e.to_string()))?);
        Ok(Self {
            dev: dev.to_string(),
            port,
            reader,
        })
    }

    fn send(&mut self, msg: &LineMsg) -> std::io::Result<()> {
        write_line(&mut *self.port, &format_line(msg))
    }
}

impl Transport for SerialTransport {
    fn read_frame(&mut self) -> Result<RawFrame, TransportError> {
        let read_err = |dev: &str, reason: String| TransportError::Read {
            target: dev.to_string(),
            reason,
        };
        self.send(&LineMsg::Read)
            .map_err(|e| read_err(&self.dev, e.to_string()))?;

        for _ in 0..MAX_STRAY_LINES {
            let line = self
                .reader
                .read_line()
                .map_err(|e| read_err(&self.dev, e.to_string()))?
                .ok_or_else(|| read_err(&self.dev, "no reply".into()))?;
            match parse_line(&line) {
                Ok(LineMsg::Data { frame }) => {
                    trace!("[serial] {} <- {:?}", self.dev, frame);
                    return Ok(frame);
                }
                Ok(other) => debug!("[serial] {} ignoring {:?}", self.dev, other),
                Err(e) => debug!("[serial] {} ignoring line: {}", self.dev, e),
            }
        }
        Err(read_err(&self.dev, "no REG DATA reply".into()))
    }

    fn write_frame(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        trace!("[serial] {} -> {:?}", self.dev, frame);
        self.send(&LineMsg::Write { frame: *frame })
            .map_err(|e| TransportError::Write {
                target: self.dev.clone(),
                reason: e.to_string(),
            })
    }

    fn describe(&self) -> String {
        format!("serial {}", self.dev)
    }
}
