use {
  mio::{net, Events, Interest, Poll, Token},
  std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
  },
};

/// Longest a single readiness wait may block.
pub const MAX_WAIT: Duration = Duration::from_millis(100);

const TOKEN: Token = Token(0);

/// The datagram transport a connection runs over.
///
/// `recv_from` returning `WouldBlock` means "no datagram available right
/// now"; it is not an error. Implementations must never block indefinitely.
pub trait Socket: Sized {
  /// Claims `port` on the loopback interface. Fails if the port is taken.
  fn bind(port: u16) -> io::Result<Self>;

  fn local_addr(&self) -> io::Result<SocketAddr>;

  fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

  fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// Non-blocking UDP socket with a poll for bounded waits.
pub struct Udp {
  inner: net::UdpSocket,
  poll: Poll,
  events: Events,
}

impl Udp {
  /// Blocks until the socket is ready to read or write, bounded by
  /// [`MAX_WAIT`]. Lets a host sleep between ticks instead of spinning.
  pub fn wait(&mut self, timeout: Duration) -> io::Result<()> {
    self.poll.poll(&mut self.events, Some(timeout.min(MAX_WAIT)))
  }
}

impl Socket for Udp {
  fn bind(port: u16) -> io::Result<Self> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut inner = net::UdpSocket::bind(addr)?;
    let poll = Poll::new()?;
    poll.registry().register(
      &mut inner,
      TOKEN,
      Interest::READABLE | Interest::WRITABLE,
    )?;
    let events = Events::with_capacity(16);
    Ok(Self { inner, poll, events })
  }

  fn local_addr(&self) -> io::Result<SocketAddr> {
    self.inner.local_addr()
  }

  fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
    self.inner.send_to(buf, target)
  }

  fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    self.inner.recv_from(buf)
  }
}

#[cfg(test)]
pub(crate) mod fake {
  //! In-memory socket for deterministic connection tests. Outgoing
  //! datagrams land in a channel the test inspects; incoming ones are
  //! injected through a channel the test holds.

  use super::Socket;
  use crossbeam::channel::{self, Receiver, Sender};
  use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
  };

  pub type Datagram = (SocketAddr, Vec<u8>);

  pub struct FakeSocket {
    addr: SocketAddr,
    inbox: Receiver<Datagram>,
    outbox: Sender<Datagram>,
  }

  /// The test-facing ends of a fake socket: inject incoming datagrams
  /// (sender address + bytes), observe outgoing ones (target + bytes).
  pub struct Wire {
    pub deliver: Sender<Datagram>,
    pub sent: Receiver<Datagram>,
  }

  fn would_block<T>(_: T) -> io::Error {
    io::Error::from(io::ErrorKind::WouldBlock)
  }

  impl FakeSocket {
    pub fn with_wire(port: u16) -> (Self, Wire) {
      let (deliver, inbox) = channel::unbounded();
      let (outbox, sent) = channel::unbounded();
      let socket = Self {
        addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        inbox,
        outbox,
      };
      (socket, Wire { deliver, sent })
    }
  }

  impl Socket for FakeSocket {
    fn bind(port: u16) -> io::Result<Self> {
      // isolated: nothing is ever delivered, sends go nowhere
      let (socket, _) = Self::with_wire(port);
      Ok(socket)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
      Ok(self.addr)
    }

    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
      self
        .outbox
        .try_send((target, buf.to_owned()))
        .map(|_| buf.len())
        .map_err(would_block)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
      let (addr, data) = self.inbox.try_recv().map_err(would_block)?;
      buf[..data.len()].copy_from_slice(&data[..]);
      Ok((data.len(), addr))
    }
  }

  /// Moves every datagram sitting on `from`'s outbox into `to`'s inbox,
  /// stamping `from_addr` as the sender. A zero-latency lossless link.
  pub fn pump(from: &Wire, from_addr: SocketAddr, to: &Wire) {
    while let Ok((_, data)) = from.sent.try_recv() {
      to.deliver.send((from_addr, data)).unwrap();
    }
  }
}
