//! A user-space reliability layer over UDP.
//!
//! Datagrams get a per-packet sequence number and every outgoing header
//! carries cumulative ack information for up to 33 recent packets, so both
//! sides learn which of their packets arrived without any retransmission
//! machinery. On top of that sits a virtual connection (liveness via an
//! inactivity timeout, protocol-id filtering) and a flow controller that
//! recommends a send rate from the observed round trip time.
//!
//! Everything is single-threaded and cooperative. A host drives a
//! connection with the non-blocking tick idiom: send, drain receives until
//! zero, update the clock, sleep.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use hawser::{flow::FlowControl, reliable::ReliableConnection, socket::Udp, Config, Protocol};
//! use std::time::Duration;
//!
//! let config = Config {
//!   protocol: Protocol(0x11112222),
//!   ..Config::default()
//! };
//! let mut conn = ReliableConnection::<Udp>::new(config);
//! conn.start(30000, &mut ())?;
//! conn.connect("127.0.0.1:30001".parse()?, &mut ());
//!
//! let mut flow = FlowControl::new();
//! let mut buf = [0u8; 1024];
//! for _ in 0..100 {
//!   let dt = Duration::from_secs(1) / flow.send_rate();
//!   conn.send_packet(b"hello")?;
//!   while conn.receive_packet(&mut buf, &mut ())? > 0 {}
//!   conn.update(dt, &mut ());
//!   flow.update(dt, conn.reliability().round_trip_time());
//!   std::thread::sleep(dt);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod flow;
pub mod reliability;
pub mod reliable;
pub mod socket;

mod queue;
mod seq;
mod wire;

use std::{
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
  time::Duration,
};

/// An opaque value identifying your protocol (and its version).
///
/// Carried as a 4-byte big-endian prefix on every datagram; anything with a
/// different prefix is dropped before it reaches the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol(pub u32);

impl<T: Hash> From<T> for Protocol {
  fn from(v: T) -> Self {
    let mut s = DefaultHasher::new();
    v.hash(&mut s);
    Self(s.finish() as u32)
  }
}

/// Per-connection configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
  pub protocol: Protocol,
  /// How long without a valid datagram before the connection is considered
  /// dead.
  pub timeout: Duration,
  /// Largest sequence number before wrap around. Production wants
  /// `u32::MAX`; small values (31, 255) exercise the wrap in tests.
  pub max_sequence: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      protocol: Protocol(0),
      timeout: Duration::from_secs(10),
      max_sequence: u32::MAX,
    }
  }
}
