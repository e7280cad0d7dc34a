// src/proto/parser.rs
//! CRLF line encoding used to tunnel register access over a UART.
//!
//! ```text
//! REG WRITE data=010005000000   controller -> peer, no reply
//! REG READ                      controller -> peer
//! REG DATA data=01010e000000    peer -> controller, answers REG READ
//! ```
use std::collections::BTreeMap;

use thiserror::Error;

use crate::frame::{RawFrame, from_hex, to_hex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMsg {
    Write { frame: RawFrame },
    Read,
    Data { frame: RawFrame },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("malformed key=value pair: {0}")]
    BadPair(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid frame for {0}: {1}")]
    BadFrame(&'static str, String),
    #[error("unknown tag: {0}")]
    UnknownTag(String),
}

/// Serialize a message to a CRLF-terminated line.
pub fn format_line(msg: &LineMsg) -> String {
    let mut out = match msg {
        LineMsg::Write { frame } => format!("REG WRITE data={}", to_hex(frame)),
        LineMsg::Read => "REG READ".to_string(),
        LineMsg::Data { frame } => format!("REG DATA data={}", to_hex(frame)),
    };
    out.push_str("\r\n");
    out
}

/// Parse a CR/LF-terminated line.
pub fn parse_line(line: &str) -> Result<LineMsg, ParseError> {
    let s = line.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');
    if s.is_empty() {
        return Err(ParseError::Empty);
    }

    // Tag is everything before the first k=v token.
    let tokens: Vec<&str> = s.split_whitespace().collect();
    let kv_start = tokens
        .iter()
        .position(|t| t.contains('='))
        .unwrap_or(tokens.len());
    let tag = tokens[..kv_start].join(" ");
    let mut map = BTreeMap::<&str, &str>::new();
    for &tok in &tokens[kv_start..] {
        let (k, v) = tok
            .split_once('=')
            .ok_or_else(|| ParseError::BadPair(tok.to_string()))?;
        map.insert(k, v);
    }

    match tag.as_str() {
        "REG WRITE" => Ok(LineMsg::Write {
            frame: req_frame(&map, "data")?,
        }),
        "REG READ" => Ok(LineMsg::Read),
        "REG DATA" => Ok(LineMsg::Data {
            frame: req_frame(&map, "data")?,
        }),
        _ => Err(ParseError::UnknownTag(tag)),
    }
}

fn req_frame(map: &BTreeMap<&str, &str>, k: &'static str) -> Result<RawFrame, ParseError> {
    let v = map.get(k).ok_or(ParseError::MissingField(k))?;
    from_hex(v).map_err(|_| ParseError::BadFrame(k, v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_line_shape() {
        let line = format_line(&LineMsg::Write {
            frame: [1, 0, 5, 0, 0, 0],
        });
        assert_eq!(line, "REG WRITE data=010005000000\r\n");
        assert_eq!(
            parse_line(&line).unwrap(),
            LineMsg::Write {
                frame: [1, 0, 5, 0, 0, 0]
            }
        );
    }

    #[test]
    fn read_and_data() {
        assert_eq!(parse_line("REG READ\r\n").unwrap(), LineMsg::Read);
        let msg = parse_line("REG DATA data=02010e000000\r\n").unwrap();
        assert_eq!(
            msg,
            LineMsg::Data {
                frame: [2, 1, 0x0e, 0, 0, 0]
            }
        );
    }

    #[test]
    fn error_cases() {
        assert!(matches!(parse_line("\r\n"), Err(ParseError::Empty)));
        assert!(matches!(
            parse_line("REG POKE data=000000000000"),
            Err(ParseError::UnknownTag(_))
        ));
        assert!(matches!(
            parse_line("REG WRITE"),
            Err(ParseError::MissingField("data"))
        ));
        assert!(matches!(
            parse_line("REG DATA data=0102"),
            Err(ParseError::BadFrame("data", _))
        ));
    }
}
