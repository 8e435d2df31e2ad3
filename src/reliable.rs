//! A virtual connection with per-packet sequencing and cumulative acks.
//!
//! Every outgoing datagram carries a 12-byte reliability header after the
//! protocol prefix; every incoming one feeds the reliability system. Nothing
//! is retransmitted here: which payloads to re-send, if any, is the host's
//! call based on the acks it observes.

use {
  crate::{
    connection::{Connection, Events, Mode},
    error::Result,
    reliability::ReliabilitySystem,
    socket::Socket,
    wire::{self, Header},
    Config,
  },
  std::{net::SocketAddr, time::Duration},
};

/// Forwards lifecycle events to the caller's handler and records whether a
/// disconnect fired, so the owner can reset its reliability state afterwards
/// without holding a reference to itself.
struct DisconnectWatch<'a, E> {
  events: &'a mut E,
  disconnected: bool,
}

impl<'a, E> DisconnectWatch<'a, E> {
  fn new(events: &'a mut E) -> Self {
    Self {
      events,
      disconnected: false,
    }
  }
}

impl<E: Events> Events for DisconnectWatch<'_, E> {
  fn on_start(&mut self) {
    self.events.on_start()
  }
  fn on_stop(&mut self) {
    self.events.on_stop()
  }
  fn on_connect(&mut self) {
    self.events.on_connect()
  }
  fn on_disconnect(&mut self) {
    self.disconnected = true;
    self.events.on_disconnect()
  }
}

pub struct ReliableConnection<S> {
  conn: Connection<S>,
  reliability: ReliabilitySystem,
  scratch: Vec<u8>,
  /// Outgoing datagrams whose sequence matches this mask are dropped before
  /// the socket (still registered as sent). Loss-injection hook for tests.
  loss_mask: u32,
}

impl<S: Socket> ReliableConnection<S> {
  pub fn new(config: Config) -> Self {
    Self {
      conn: Connection::new(config),
      reliability: ReliabilitySystem::new(config.max_sequence),
      scratch: vec![0u8; 1 << 16],
      loss_mask: 0,
    }
  }

  pub fn start<E: Events>(&mut self, port: u16, events: &mut E) -> Result<()> {
    self.conn.start(port, events)
  }

  pub fn stop<E: Events>(&mut self, events: &mut E) {
    self.conn.stop(events);
    // the next session starts with fresh sequences and counters
    self.reliability.reset();
  }

  pub fn listen<E: Events>(&mut self, events: &mut E) {
    let mut watch = DisconnectWatch::new(events);
    self.conn.listen(&mut watch);
    if watch.disconnected {
      self.reliability.reset();
    }
  }

  pub fn connect<E: Events>(&mut self, address: SocketAddr, events: &mut E) {
    let mut watch = DisconnectWatch::new(events);
    self.conn.connect(address, &mut watch);
    if watch.disconnected {
      self.reliability.reset();
    }
  }

  /// Sends `payload` wrapped in a reliability header and registers it under
  /// the next local sequence.
  pub fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
    if self.reliability.local_sequence() & self.loss_mask != 0 {
      // simulated loss: the wire never sees it, the bookkeeping does
      self.reliability.packet_sent(payload.len());
      return Ok(());
    }

    let header = Header {
      sequence: self.reliability.local_sequence(),
      ack: self.reliability.remote_sequence(),
      ack_bits: self.reliability.generate_ack_bits(),
    };
    let mut packet = Vec::with_capacity(wire::HEADER_SIZE + payload.len());
    header.encode(&mut packet);
    packet.extend_from_slice(payload);

    self.conn.send_packet(&packet)?;
    self.reliability.packet_sent(payload.len());
    Ok(())
  }

  /// Pulls one datagram, feeds its header to the reliability system and
  /// copies the payload into `buf`, returning its length (bounded by
  /// `buf.len()`). Zero means nothing useful arrived.
  pub fn receive_packet<E: Events>(&mut self, buf: &mut [u8], events: &mut E) -> Result<usize> {
    let n = self.conn.receive_packet(&mut self.scratch, events)?;
    if n <= wire::HEADER_SIZE {
      return Ok(0);
    }
    let header = match Header::decode(&mut &self.scratch[..n]) {
      Ok(header) => header,
      Err(_) => return Ok(0),
    };

    let payload_len = n - wire::HEADER_SIZE;
    self.reliability.packet_received(header.sequence, payload_len);
    self.reliability.process_ack(header.ack, header.ack_bits);

    let copied = payload_len.min(buf.len());
    buf[..copied].copy_from_slice(&self.scratch[wire::HEADER_SIZE..wire::HEADER_SIZE + copied]);
    Ok(copied)
  }

  /// Advances the connection and the reliability clock. A timeout here
  /// resets the reliability system so a re-established connection starts
  /// clean.
  pub fn update<E: Events>(&mut self, dt: Duration, events: &mut E) {
    let mut watch = DisconnectWatch::new(events);
    self.conn.update(dt, &mut watch);
    if watch.disconnected {
      self.reliability.reset();
    }
    self.reliability.update(dt);
  }

  /// Protocol prefix plus reliability header.
  pub fn header_size(&self) -> usize {
    self.conn.header_size() + wire::HEADER_SIZE
  }

  pub fn reliability(&self) -> &ReliabilitySystem {
    &self.reliability
  }

  /// Loss-injection hook: drop outgoing datagrams whose sequence matches
  /// `mask`. Zero (the default) drops nothing.
  pub fn set_packet_loss_mask(&mut self, mask: u32) {
    self.loss_mask = mask;
  }

  pub fn is_running(&self) -> bool {
    self.conn.is_running()
  }

  pub fn is_connecting(&self) -> bool {
    self.conn.is_connecting()
  }

  pub fn connect_failed(&self) -> bool {
    self.conn.connect_failed()
  }

  pub fn is_connected(&self) -> bool {
    self.conn.is_connected()
  }

  pub fn is_listening(&self) -> bool {
    self.conn.is_listening()
  }

  pub fn mode(&self) -> Mode {
    self.conn.mode()
  }

  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.conn.local_addr()
  }

  #[cfg(test)]
  pub(crate) fn start_with<E: Events>(&mut self, socket: S, events: &mut E) {
    self.conn.start_with(socket, events);
  }
}
