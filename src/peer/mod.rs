//! Peer side: serve the register protocol over a UART, backed by [`machine::Peer`].

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::cli::PeerOpts;
use crate::frame::{FRAME_LEN, RawFrame};
use crate::port::{LineReader, open_port, write_line};
use crate::proto::parser::{LineMsg, format_line, parse_line};

pub mod machine;

use machine::Peer;

pub fn run(opts: PeerOpts) -> Result<()> {
    let port = open_port(&opts.dev, opts.baud)
        .with_context(|| format!("opening peer port on {}", opts.dev))?;
    let mut out = port
        .try_clone()
        .with_context(|| format!("cloning {} for writing", opts.dev))?;
    let mut reader = LineReader::new(port);

    let peer = Peer::with_pi_digits(opts.batch);
    let mut register: RawFrame = [0; FRAME_LEN];
    info!(
        "[peer] serving on {} @ {} baud, batch {}",
        opts.dev, opts.baud, opts.batch
    );

    loop {
        let Some(line) = reader
            .read_line()
            .with_context(|| format!("reading from {}", opts.dev))?
        else {
            continue;
        };
        if let Some(reply) = serve_line(&peer, &mut register, &line) {
            write_line(&mut *out, &format_line(&reply))
                .with_context(|| format!("writing to {}", opts.dev))?;
        }
    }
}

/// Apply one controller line to the register. Returns the line to send back, if any.
pub fn serve_line(peer: &Peer, register: &mut RawFrame, line: &str) -> Option<LineMsg> {
    match parse_line(line) {
        Ok(LineMsg::Write { frame }) => {
            *register = peer.handle(frame);
            None
        }
        Ok(LineMsg::Read) => Some(LineMsg::Data { frame: *register }),
        Ok(other) => {
            warn!("[peer] ignoring unexpected {:?}", other);
            None
        }
        Err(e) => {
            debug!("[peer] bad line {:?}: {}", line.trim_end(), e);
            None
        }
    }
}
