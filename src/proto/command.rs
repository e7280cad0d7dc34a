use std::fmt;

/// EFP opcodes, as carried in the command byte of a register frame.
pub const OP_PING: u8 = 0x0;
pub const OP_ORDER: u8 = 0x1;
pub const OP_STATUS: u8 = 0x2;
pub const OP_RESULT: u8 = 0x3;
pub const OP_RESET: u8 = 0x4;
pub const OP_CANCEL: u8 = 0x5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    /// Start computing the batch for this job value.
    Order(u8),
    Status,
    /// Fetch one result byte, 1-based.
    Result(u8),
    Reset,
    Cancel,
}

impl Command {
    pub fn opcode(self) -> u8 {
        match self {
            Command::Ping => OP_PING,
            Command::Order(_) => OP_ORDER,
            Command::Status => OP_STATUS,
            Command::Result(_) => OP_RESULT,
            Command::Reset => OP_RESET,
            Command::Cancel => OP_CANCEL,
        }
    }

    /// Byte written into the data field alongside the opcode.
    pub fn payload(self) -> u8 {
        match self {
            Command::Order(n) | Command::Result(n) => n,
            _ => 0,
        }
    }

    pub fn from_parts(opcode: u8, data: u8) -> Option<Self> {
        Some(match opcode {
            OP_PING => Command::Ping,
            OP_ORDER => Command::Order(data),
            OP_STATUS => Command::Status,
            OP_RESULT => Command::Result(data),
            OP_RESET => Command::Reset,
            OP_CANCEL => Command::Cancel,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Order(_) => "ORDER",
            Command::Status => "STATUS",
            Command::Result(_) => "RESULT",
            Command::Reset => "RESET",
            Command::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Order(n) | Command::Result(n) => write!(f, "{}({})", self.name(), n),
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Peer has not answered yet.
    Pending,
    Ok,
    Err,
}

impl AckStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            AckStatus::Pending => 0x0,
            AckStatus::Ok => 0x1,
            AckStatus::Err => 0x2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(AckStatus::Pending),
            0x1 => Some(AckStatus::Ok),
            0x2 => Some(AckStatus::Err),
            _ => None,
        }
    }
}
