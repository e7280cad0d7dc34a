//! Register frame layout shared by controller and peers.
//!
//! One canonical map is used everywhere:
//!
//! | offset | field    |
//! |--------|----------|
//! | 0      | command  |
//! | 1      | ack      |
//! | 2      | data     |
//! | 3      | argument echo (request data byte, left alone by the peer) |
//! | 4..=5  | reserved (zero on write, ignored on read) |
//!
//! The peer only ever touches the ack and data bytes, so the command and
//! echo bytes tell which request an answered frame belongs to.

use std::fmt::Write;

use thiserror::Error;

use crate::proto::command::{AckStatus, Command};

pub const FRAME_LEN: usize = 6;
pub const REG_COMMAND: usize = 0;
pub const REG_ACK: usize = 1;
pub const REG_DATA: usize = 2;
pub const REG_ARG: usize = 3;

pub type RawFrame = [u8; FRAME_LEN];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command opcode 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("unknown ack value 0x{0:02x}")]
    UnknownAck(u8),
    #[error("bad frame hex: {0}")]
    BadHex(String),
}

/// What a peer left in the frame after handling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub ack: AckStatus,
    pub data: u8,
}

/// Request as written by the controller: ack is always Pending.
pub fn encode_request(cmd: Command) -> RawFrame {
    let mut raw = [0u8; FRAME_LEN];
    raw[REG_COMMAND] = cmd.opcode();
    raw[REG_ACK] = AckStatus::Pending.to_byte();
    raw[REG_DATA] = cmd.payload();
    raw[REG_ARG] = cmd.payload();
    raw
}

/// Whether `raw` holds the answer to `cmd` rather than to some earlier request.
pub fn is_reply_to(raw: &RawFrame, cmd: Command) -> bool {
    raw[REG_COMMAND] == cmd.opcode() && raw[REG_ARG] == cmd.payload()
}

pub fn decode_request(raw: &RawFrame) -> Result<Command, FrameError> {
    Command::from_parts(raw[REG_COMMAND], raw[REG_DATA])
        .ok_or(FrameError::UnknownCommand(raw[REG_COMMAND]))
}

pub fn decode_reply(raw: &RawFrame) -> Result<Reply, FrameError> {
    let ack = AckStatus::from_byte(raw[REG_ACK]).ok_or(FrameError::UnknownAck(raw[REG_ACK]))?;
    Ok(Reply {
        ack,
        data: raw[REG_DATA],
    })
}

/// Stamp a peer's answer into a received request frame.
pub fn answer(raw: &mut RawFrame, ack: AckStatus, data: Option<u8>) {
    raw[REG_ACK] = ack.to_byte();
    if let Some(d) = data {
        raw[REG_DATA] = d;
    }
}

pub fn to_hex(raw: &RawFrame) -> String {
    let mut s = String::with_capacity(FRAME_LEN * 2);
    for b in raw {
        let _ = write!(s, "{:02X}", b);
    }
    s
}

pub fn from_hex(hex: &str) -> Result<RawFrame, FrameError> {
    if hex.len() != FRAME_LEN * 2 || !hex.is_ascii() {
        return Err(FrameError::BadHex(hex.to_string()));
    }
    let mut raw = [0u8; FRAME_LEN];
    for (i, byte) in raw.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| FrameError::BadHex(hex.to_string()))?;
    }
    Ok(raw)
}
