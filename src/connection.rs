//! A virtual connection between two endpoints over a connectionless socket.
//!
//! There is no handshake: the first valid datagram a listening server sees
//! makes its sender the peer, and a connecting client completes as soon as
//! the server answers. Liveness is purely an inactivity timeout.

use {
  crate::{
    error::{Error, Result},
    socket::Socket,
    Config, Protocol,
  },
  bytes::{Buf, BufMut},
  std::{io, net::SocketAddr, time::Duration},
};

/// Size of the protocol-id prefix on every datagram.
pub const HEADER_SIZE: usize = 4;

/// Lifecycle events, fired synchronously from inside [`Connection::start`],
/// [`Connection::stop`], [`Connection::receive_packet`] and
/// [`Connection::update`] on the caller's thread.
///
/// The handler is passed into each operation that can fire one; the
/// connection never stores it.
pub trait Events {
  fn on_start(&mut self) {}
  fn on_stop(&mut self) {}
  fn on_connect(&mut self) {}
  fn on_disconnect(&mut self) {}
}

/// No-op handler for callers that don't care.
impl Events for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  None,
  Client,
  Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Disconnected,
  Listening,
  Connecting,
  ConnectFailed,
  Connected,
}

pub struct Connection<S> {
  protocol: Protocol,
  timeout: Duration,
  running: bool,
  mode: Mode,
  state: State,
  socket: Option<S>,
  timeout_acc: Duration,
  address: Option<SocketAddr>,
  // enough to hold the largest possible datagram
  scratch: Vec<u8>,
}

impl<S: Socket> Connection<S> {
  pub fn new(config: Config) -> Self {
    Self {
      protocol: config.protocol,
      timeout: config.timeout,
      running: false,
      mode: Mode::None,
      state: State::Disconnected,
      socket: None,
      timeout_acc: Duration::ZERO,
      address: None,
      scratch: vec![0u8; 1 << 16],
    }
  }

  /// Opens the transport on `port` and fires `on_start`.
  pub fn start<E: Events>(&mut self, port: u16, events: &mut E) -> Result<()> {
    let socket = S::bind(port).map_err(|source| Error::Bind { port, source })?;
    log::info!("connection started on port {port}");
    self.socket = Some(socket);
    self.running = true;
    events.on_start();
    Ok(())
  }

  /// Closes the transport. Fires `on_disconnect` first when currently
  /// connected, then `on_stop`. Idempotent.
  pub fn stop<E: Events>(&mut self, events: &mut E) {
    log::info!("connection stopped");
    let was_connected = self.is_connected();
    self.clear();
    self.socket = None;
    self.running = false;
    if was_connected {
      events.on_disconnect();
    }
    events.on_stop();
  }

  /// Switches to server mode and waits for a client.
  pub fn listen<E: Events>(&mut self, events: &mut E) {
    log::info!("listening for a connection");
    let was_connected = self.is_connected();
    self.clear();
    if was_connected {
      events.on_disconnect();
    }
    self.mode = Mode::Server;
    self.state = State::Listening;
  }

  /// Switches to client mode and starts connecting to `address`.
  pub fn connect<E: Events>(&mut self, address: SocketAddr, events: &mut E) {
    log::info!("connecting to {address}");
    let was_connected = self.is_connected();
    self.clear();
    if was_connected {
      events.on_disconnect();
    }
    self.mode = Mode::Client;
    self.state = State::Connecting;
    self.address = Some(address);
  }

  /// Accumulates inactivity; past the configured timeout a connecting
  /// client fails and an established connection drops.
  pub fn update<E: Events>(&mut self, dt: Duration, events: &mut E) {
    self.timeout_acc += dt;
    if self.timeout_acc > self.timeout {
      match self.state {
        State::Connecting => {
          log::info!("connect timed out");
          self.clear();
          self.state = State::ConnectFailed;
          events.on_disconnect();
        }
        State::Connected => {
          log::info!("connection timed out");
          self.clear();
          events.on_disconnect();
        }
        _ => {}
      }
    }
  }

  /// Prefixes `payload` with the protocol id and hands it to the transport
  /// for the current peer.
  pub fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
    let socket = self.socket.as_ref().ok_or(Error::NotRunning)?;
    let address = self.address.ok_or(Error::NoPeer)?;

    let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
    packet.put_u32(self.protocol.0);
    packet.put_slice(payload);

    match socket.send_to(&packet, address) {
      Ok(_) => Ok(()),
      // the link is unreliable anyway; a full send buffer drops the datagram
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  /// Pulls one datagram from the transport into `buf` and returns the
  /// payload length, bounded by `buf.len()`. Zero means nothing useful was
  /// available: no datagram, too short, wrong protocol or wrong sender.
  ///
  /// A valid datagram resets the inactivity clock, promotes a listening
  /// server (adopting the sender as peer) and completes a connecting
  /// client, firing `on_connect`.
  pub fn receive_packet<E: Events>(&mut self, buf: &mut [u8], events: &mut E) -> Result<usize> {
    let socket = match self.socket.as_ref() {
      Some(socket) => socket,
      None => return Ok(0),
    };
    let (bytes_read, sender) = match socket.recv_from(&mut self.scratch) {
      Ok(v) => v,
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
      Err(e) => return Err(e.into()),
    };

    if bytes_read <= HEADER_SIZE {
      return Ok(0);
    }
    let mut prefix = &self.scratch[..HEADER_SIZE];
    if prefix.get_u32() != self.protocol.0 {
      log::trace!("dropping datagram with unknown protocol id from {sender}");
      return Ok(0);
    }

    if self.mode == Mode::Server && !self.is_connected() {
      log::info!("server accepts connection from {sender}");
      self.state = State::Connected;
      self.address = Some(sender);
      events.on_connect();
    }

    match self.address {
      Some(address) if address == sender => {
        if self.mode == Mode::Client && self.state == State::Connecting {
          log::info!("client completes connection with {sender}");
          self.state = State::Connected;
          events.on_connect();
        }
        self.timeout_acc = Duration::ZERO;
        let n = (bytes_read - HEADER_SIZE).min(buf.len());
        buf[..n].copy_from_slice(&self.scratch[HEADER_SIZE..HEADER_SIZE + n]);
        Ok(n)
      }
      _ => {
        log::trace!("dropping datagram from unexpected sender {sender}");
        Ok(0)
      }
    }
  }

  pub fn is_running(&self) -> bool {
    self.running
  }

  pub fn is_connecting(&self) -> bool {
    self.state == State::Connecting
  }

  pub fn connect_failed(&self) -> bool {
    self.state == State::ConnectFailed
  }

  pub fn is_connected(&self) -> bool {
    self.state == State::Connected
  }

  pub fn is_listening(&self) -> bool {
    self.state == State::Listening
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  /// Address of the bound transport, once started.
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.socket.as_ref().and_then(|s| s.local_addr().ok())
  }

  pub fn header_size(&self) -> usize {
    HEADER_SIZE
  }

  fn clear(&mut self) {
    self.state = State::Disconnected;
    self.timeout_acc = Duration::ZERO;
    self.address = None;
  }

  #[cfg(test)]
  pub(crate) fn start_with<E: Events>(&mut self, socket: S, events: &mut E) {
    self.socket = Some(socket);
    self.running = true;
    events.on_start();
  }
}
