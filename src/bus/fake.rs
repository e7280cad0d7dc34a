//! Test transports.

use std::sync::{Arc, Mutex};

use super::{Transport, TransportError};
use crate::frame::{self, RawFrame, Reply, decode_request, encode_request};
use crate::proto::command::Command;

/// Answers each request with whatever the closure returns; `None` leaves the
/// frame pending forever. Every request is recorded in `log`.
pub struct Scripted<F> {
    answer: F,
    register: RawFrame,
    pub log: Arc<Mutex<Vec<Command>>>,
    pub fail_writes: bool,
    pub reads: usize,
}

impl<F> Scripted<F>
where
    F: FnMut(Command) -> Option<Reply> + Send,
{
    pub fn new(answer: F) -> Self {
        Self {
            answer,
            register: [0; frame::FRAME_LEN],
            log: Arc::new(Mutex::new(Vec::new())),
            fail_writes: false,
            reads: 0,
        }
    }
}

impl<F> Transport for Scripted<F>
where
    F: FnMut(Command) -> Option<Reply> + Send,
{
    fn read_frame(&mut self) -> Result<RawFrame, TransportError> {
        self.reads += 1;
        Ok(self.register)
    }

    fn write_frame(&mut self, raw: &RawFrame) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Write {
                target: "scripted".into(),
                reason: "nack".into(),
            });
        }
        let cmd = decode_request(raw).expect("test writes valid frames");
        self.log.lock().unwrap().push(cmd);
        self.register = encode_request(cmd);
        if let Some(r) = (self.answer)(cmd) {
            frame::answer(&mut self.register, r.ack, Some(r.data));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

/// Wraps a transport and never lets one opcode through: the request sits
/// pending so the controller times out.
pub struct DeafTo<T> {
    inner: T,
    opcode: u8,
    swallowed: Option<RawFrame>,
}

impl<T: Transport> DeafTo<T> {
    pub fn new(inner: T, cmd: Command) -> Self {
        Self {
            inner,
            opcode: cmd.opcode(),
            swallowed: None,
        }
    }
}

impl<T: Transport> Transport for DeafTo<T> {
    fn read_frame(&mut self) -> Result<RawFrame, TransportError> {
        match self.swallowed {
            Some(raw) => Ok(raw),
            None => self.inner.read_frame(),
        }
    }

    fn write_frame(&mut self, raw: &RawFrame) -> Result<(), TransportError> {
        if raw[frame::REG_COMMAND] == self.opcode {
            self.swallowed = Some(*raw);
            return Ok(());
        }
        self.swallowed = None;
        self.inner.write_frame(raw)
    }

    fn describe(&self) -> String {
        format!("deaf {}", self.inner.describe())
    }
}

/// Lets the first `allowed` writes through, then every write fails.
pub struct FailWritesAfter<T> {
    inner: T,
    allowed: usize,
}

impl<T: Transport> FailWritesAfter<T> {
    pub fn new(inner: T, allowed: usize) -> Self {
        Self { inner, allowed }
    }
}

impl<T: Transport> Transport for FailWritesAfter<T> {
    fn read_frame(&mut self) -> Result<RawFrame, TransportError> {
        self.inner.read_frame()
    }

    fn write_frame(&mut self, raw: &RawFrame) -> Result<(), TransportError> {
        if self.allowed == 0 {
            return Err(TransportError::Write {
                target: self.describe(),
                reason: "bus error".into(),
            });
        }
        self.allowed -= 1;
        self.inner.write_frame(raw)
    }

    fn describe(&self) -> String {
        format!("flaky {}", self.inner.describe())
    }
}
