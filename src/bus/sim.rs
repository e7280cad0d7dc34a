use super::{Transport, TransportError};
use crate::frame::{FRAME_LEN, RawFrame};
use crate::peer::machine::Peer;

/// In-process peer behind the transport trait: a write is handled at once and
/// the answered frame stays in the register until the next write.
pub struct SimTransport {
    peer: Peer,
    register: RawFrame,
}

impl SimTransport {
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            register: [0u8; FRAME_LEN],
        }
    }

    pub fn spawn(batch: u8) -> Self {
        Self::new(Peer::with_pi_digits(batch))
    }

}

impl Transport for SimTransport {
    fn read_frame(&mut self) -> Result<RawFrame, TransportError> {
        Ok(self.register)
    }

    fn write_frame(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        self.register = self.peer.handle(*frame);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sim peer (batch {}, {:?})", self.peer.batch(), self.peer.mode())
    }
}
