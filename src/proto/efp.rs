//! EFP request/ack handshake over a register frame.
//!
//! Every operation writes one request frame with the ack byte cleared, then
//! re-reads the frame until the peer has set the ack or the timeout elapses.
//! A write failure is returned at once and never retried here.

use std::thread;
use std::time::{Duration, Instant};

use log::trace;
use thiserror::Error;

use crate::bus::{Transport, TransportError};
use crate::frame::{FrameError, Reply, decode_reply, encode_request, is_reply_to};
use crate::proto::command::{AckStatus, Command};

/// Pause between ack polls so a silent peer does not pin a core.
pub const ACK_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum EfpError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{cmd}: no ack within {waited_ms} ms")]
    Timeout { cmd: Command, waited_ms: u128 },
    /// The peer answered Err: bad index, wrong state, or unknown request.
    #[error("{0}: peer answered Err")]
    Rejected(Command),
    #[error("{cmd}: {source}")]
    Malformed {
        cmd: Command,
        #[source]
        source: FrameError,
    },
    #[error("invalid result range {0}..={1}")]
    InvalidRange(u8, u8),
}

/// Write `cmd` and wait for the peer to resolve the ack byte.
///
/// Returns the reply whatever the ack (Ok or Err); only a pending ack past
/// `timeout` is an error. Read failures while polling count as "not yet", and
/// so does a frame still holding the answer to an earlier request.
pub fn send(
    port: &mut dyn Transport,
    cmd: Command,
    timeout: Duration,
) -> Result<Reply, EfpError> {
    port.write_frame(&encode_request(cmd))?;
    let start = Instant::now();
    loop {
        match port.read_frame() {
            Ok(raw) if !is_reply_to(&raw, cmd) => {
                trace!("[efp] {} {} stale frame {:?}", port.describe(), cmd, raw);
            }
            Ok(raw) => {
                let reply =
                    decode_reply(&raw).map_err(|source| EfpError::Malformed { cmd, source })?;
                if reply.ack != AckStatus::Pending {
                    trace!("[efp] {} {} -> {:?}", port.describe(), cmd, reply);
                    return Ok(reply);
                }
            }
            Err(e) => trace!("[efp] {} {} poll: {}", port.describe(), cmd, e),
        }
        let waited = start.elapsed();
        if waited > timeout {
            return Err(EfpError::Timeout {
                cmd,
                waited_ms: waited.as_millis(),
            });
        }
        thread::sleep(ACK_POLL_INTERVAL);
    }
}

fn expect_ok(port: &mut dyn Transport, cmd: Command, timeout: Duration) -> Result<u8, EfpError> {
    let reply = send(port, cmd, timeout)?;
    match reply.ack {
        AckStatus::Ok => Ok(reply.data),
        _ => Err(EfpError::Rejected(cmd)),
    }
}

pub fn ping(port: &mut dyn Transport, timeout: Duration) -> Result<(), EfpError> {
    expect_ok(port, Command::Ping, timeout).map(|_| ())
}

pub fn order(port: &mut dyn Transport, n: u8, timeout: Duration) -> Result<(), EfpError> {
    expect_ok(port, Command::Order(n), timeout).map(|_| ())
}

/// Number of results the peer has computed for its current job.
pub fn status(port: &mut dyn Transport, timeout: Duration) -> Result<u8, EfpError> {
    expect_ok(port, Command::Status, timeout)
}

pub fn result_single(port: &mut dyn Transport, idx: u8, timeout: Duration) -> Result<u8, EfpError> {
    expect_ok(port, Command::Result(idx), timeout)
}

/// Fetch results `start..=end` one byte at a time, in order.
///
/// The first failed fetch fails the whole range; nothing partial is returned.
pub fn result_range(
    port: &mut dyn Transport,
    start: u8,
    end: u8,
    timeout: Duration,
) -> Result<Vec<u8>, EfpError> {
    if start > end {
        return Err(EfpError::InvalidRange(start, end));
    }
    let mut out = Vec::with_capacity((end - start) as usize + 1);
    for idx in start..=end {
        out.push(result_single(port, idx, timeout)?);
    }
    Ok(out)
}

pub fn reset(port: &mut dyn Transport, timeout: Duration) -> Result<(), EfpError> {
    expect_ok(port, Command::Reset, timeout).map(|_| ())
}

pub fn cancel(port: &mut dyn Transport, timeout: Duration) -> Result<(), EfpError> {
    expect_ok(port, Command::Cancel, timeout).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::fake::Scripted;
    use crate::bus::sim::SimTransport;
    use crate::peer::machine::{Peer, tests::instant};

    fn ok(data: u8) -> Option<Reply> {
        Some(Reply {
            ack: AckStatus::Ok,
            data,
        })
    }

    #[test]
    fn silent_peer_times_out() {
        let mut port = Scripted::new(|_| None);
        let t0 = Instant::now();
        let err = send(&mut port, Command::Ping, Duration::from_millis(50)).unwrap_err();
        let took = t0.elapsed();
        assert!(matches!(err, EfpError::Timeout { .. }), "{err}");
        assert!(took >= Duration::from_millis(50));
        assert!(took < Duration::from_millis(250), "took {took:?}");
        assert!(port.reads > 1);
    }

    #[test]
    fn write_failure_is_immediate() {
        let mut port = Scripted::new(|_| ok(0));
        port.fail_writes = true;
        let err = ping(&mut port, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, EfpError::Transport(_)));
        assert_eq!(port.reads, 0);
    }

    #[test]
    fn err_ack_is_a_reply_for_send_but_rejected_for_ops() {
        let mut port = Scripted::new(|_| {
            Some(Reply {
                ack: AckStatus::Err,
                data: 0,
            })
        });
        let reply = send(&mut port, Command::Order(1), Duration::from_millis(50)).unwrap();
        assert_eq!(reply.ack, AckStatus::Err);
        let err = order(&mut port, 1, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, EfpError::Rejected(Command::Order(1))));
    }

    #[test]
    fn status_returns_data_byte() {
        let mut port = Scripted::new(|cmd| match cmd {
            Command::Status => ok(3),
            _ => None,
        });
        assert_eq!(status(&mut port, Duration::from_millis(50)).unwrap(), 3);
    }

    #[test]
    fn explicit_pending_answer_still_times_out() {
        let mut port = Scripted::new(|_| {
            Some(Reply {
                ack: AckStatus::Pending,
                data: 0,
            })
        });
        assert!(matches!(
            ping(&mut port, Duration::from_millis(10)),
            Err(EfpError::Timeout { .. })
        ));
    }

    struct Garbled;

    impl Transport for Garbled {
        fn read_frame(&mut self) -> Result<crate::frame::RawFrame, TransportError> {
            Ok([0, 0x7, 0, 0, 0, 0])
        }
        fn write_frame(&mut self, _: &crate::frame::RawFrame) -> Result<(), TransportError> {
            Ok(())
        }
        fn describe(&self) -> String {
            "garbled".into()
        }
    }

    #[test]
    fn unknown_ack_is_malformed() {
        let err = ping(&mut Garbled, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err,
            EfpError::Malformed {
                source: FrameError::UnknownAck(7),
                ..
            }
        ));
    }

    /// Register that keeps whatever answered frame it was built with.
    struct Stale(crate::frame::RawFrame);

    impl Transport for Stale {
        fn read_frame(&mut self) -> Result<crate::frame::RawFrame, TransportError> {
            Ok(self.0)
        }
        fn write_frame(&mut self, _: &crate::frame::RawFrame) -> Result<(), TransportError> {
            Ok(())
        }
        fn describe(&self) -> String {
            "stale".into()
        }
    }

    #[test]
    fn answer_to_another_request_is_not_accepted() {
        let t = Duration::from_millis(20);
        // answered Status, progress 5
        let mut port = Stale([2, 1, 5, 0, 0, 0]);
        assert!(matches!(
            result_single(&mut port, 2, t),
            Err(EfpError::Timeout { .. })
        ));
        assert_eq!(status(&mut port, t).unwrap(), 5);

        // answered Result(1) must not satisfy Result(2)
        let mut answered = encode_request(Command::Result(1));
        crate::frame::answer(&mut answered, AckStatus::Ok, Some(4));
        let mut port = Stale(answered);
        assert!(matches!(
            result_single(&mut port, 2, t),
            Err(EfpError::Timeout { .. })
        ));
        assert_eq!(result_single(&mut port, 1, t).unwrap(), 4);
    }

    #[test]
    fn range_fetches_in_order() {
        let mut port = Scripted::new(|cmd| match cmd {
            Command::Result(i) => ok(i * 2),
            _ => None,
        });
        let log = port.log.clone();
        let got = result_range(&mut port, 1, 5, Duration::from_millis(50)).unwrap();
        assert_eq!(got, vec![2, 4, 6, 8, 10]);
        let asked: Vec<Command> = log.lock().unwrap().clone();
        assert_eq!(asked, (1..=5).map(Command::Result).collect::<Vec<_>>());
    }

    #[test]
    fn range_aborts_on_first_failure() {
        let mut port = Scripted::new(|cmd| match cmd {
            Command::Result(3) => None,
            Command::Result(i) => ok(i),
            _ => None,
        });
        let log = port.log.clone();
        let err = result_range(&mut port, 1, 5, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, EfpError::Timeout { .. }));
        assert_eq!(log.lock().unwrap().len(), 3, "stops at the failing index");
        assert!(matches!(
            result_range(&mut port, 4, 2, Duration::from_millis(20)),
            Err(EfpError::InvalidRange(4, 2))
        ));
    }

    #[test]
    fn against_sim_peer() {
        let mut port = SimTransport::new(Peer::spawn(5, instant()));
        let t = Duration::from_millis(200);
        ping(&mut port, t).unwrap();
        order(&mut port, 0, t).unwrap();
        let start = Instant::now();
        while status(&mut port, t).unwrap() < 5 {
            assert!(start.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(result_range(&mut port, 1, 5, t).unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(matches!(
            result_single(&mut port, 6, t),
            Err(EfpError::Rejected(Command::Result(6)))
        ));
        reset(&mut port, t).unwrap();
        assert!(matches!(cancel(&mut port, t), Err(EfpError::Rejected(_))));
    }
}
