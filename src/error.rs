use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The transport could not claim the requested port.
  #[error("failed to bind port {port}: {source}")]
  Bind { port: u16, source: io::Error },
  #[error("io error: {0}")]
  Io(#[from] io::Error),
  /// No peer address is known yet (client before the server replied, or
  /// after a timeout cleared it).
  #[error("no peer address set")]
  NoPeer,
  /// The connection was never started, or has been stopped.
  #[error("connection is not running")]
  NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
