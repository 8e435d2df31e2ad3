use {
  bytes::{Buf, BufMut},
  thiserror::Error,
};

/// Size of the reliability header: sequence, ack and ack bits, 4 bytes each.
pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
  #[error("unexpected end of input")]
  UnexpectedEof,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reliability header carried on every datagram, big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  pub sequence: u32,
  /// Most recent sequence observed from the peer.
  pub ack: u32,
  /// Bit `k` acknowledges the packet with sequence `ack - 1 - k`.
  pub ack_bits: u32,
}

impl Header {
  pub fn encode<B: BufMut>(&self, buf: &mut B) {
    buf.put_u32(self.sequence);
    buf.put_u32(self.ack);
    buf.put_u32(self.ack_bits);
  }

  pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
    if buf.remaining() < HEADER_SIZE {
      return Err(Error::UnexpectedEof);
    }
    Ok(Self {
      sequence: buf.get_u32(),
      ack: buf.get_u32(),
      ack_bits: buf.get_u32(),
    })
  }
}
