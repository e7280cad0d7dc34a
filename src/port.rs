use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

pub const DEFAULT_BAUD: u32 = 115_200;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Open a UART at `baud` 8N1, no flow control.
pub fn open_port(dev: &str, baud: u32) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(dev, baud)
        .timeout(READ_TIMEOUT)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open()
}

pub fn write_line<W: Write + ?Sized>(port: &mut W, line: &str) -> std::io::Result<()> {
    port.write_all(line.as_bytes())?;
    port.flush()
}

/// Buffered CRLF line reader over a port with a read timeout.
///
/// Bytes that arrived before a timeout are kept and completed by later reads.
pub struct LineReader<R> {
    reader: BufReader<R>,
    partial: String,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            partial: String::new(),
        }
    }

    /// One complete line, or `Ok(None)` when the read timeout expired first.
    pub fn read_line(&mut self) -> std::io::Result<Option<String>> {
        match self.reader.read_line(&mut self.partial) {
            Ok(_) if self.partial.ends_with('\n') => Ok(Some(std::mem::take(&mut self.partial))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn reads_lines_then_none() {
        let data: &[u8] = b"REG READ\r\nREG DATA data=000000000000\r\n";
        let mut lines = LineReader::new(data);
        assert_eq!(lines.read_line().unwrap().as_deref(), Some("REG READ\r\n"));
        assert!(lines.read_line().unwrap().is_some());
        assert_eq!(lines.read_line().unwrap(), None);
    }

    /// Hands out one chunk per read; `None` is a read timeout.
    struct Chunks(VecDeque<Option<&'static [u8]>>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(ErrorKind::TimedOut.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn line_split_by_timeout_is_reassembled() {
        let mut lines = LineReader::new(Chunks(VecDeque::from([
            Some(&b"REG DA"[..]),
            None,
            Some(&b"TA data=020105000000\r\n"[..]),
        ])));
        assert_eq!(lines.read_line().unwrap(), None);
        assert_eq!(
            lines.read_line().unwrap().as_deref(),
            Some("REG DATA data=020105000000\r\n")
        );
        assert_eq!(lines.read_line().unwrap(), None);
    }

    #[test]
    fn write_line_writes_all() {
        let mut out = Vec::new();
        write_line(&mut out, "REG READ\r\n").unwrap();
        assert_eq!(out, b"REG READ\r\n");
    }
}
