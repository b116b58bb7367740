//! TCP connection establishment towards Redis endpoints
//!
//! Resolves the endpoint, connects with a timeout and tunes the socket for
//! long-lived, latency-sensitive command traffic.

use super::address::HostAndPort;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of a connection attempt
#[derive(Debug)]
pub enum ConnectionResult {
    Success(TcpStream),
    Timeout,
    ConnectionRefused,
    NetworkError(io::Error),
}

impl ConnectionResult {
    /// Collapse into an I/O result, timeouts and refusals included
    pub fn into_io_result(self) -> io::Result<TcpStream> {
        match self {
            ConnectionResult::Success(stream) => Ok(stream),
            ConnectionResult::Timeout => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection attempt timed out",
            )),
            ConnectionResult::ConnectionRefused => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
            ConnectionResult::NetworkError(e) => Err(e),
        }
    }
}

/// Connects to backend endpoints
#[derive(Debug, Clone)]
pub struct Connector {
    connect_timeout: Duration,
    keepalive: Option<Duration>,
}

impl Connector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            keepalive: Some(Duration::from_secs(60)),
        }
    }

    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect to a backend server
    pub async fn connect(&self, address: &HostAndPort) -> ConnectionResult {
        debug!("Connecting to {}", address);

        let target = (address.host(), address.port());
        match timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = self.configure_stream(&stream) {
                    warn!("Failed to configure stream to {}: {}", address, e);
                }
                debug!("Connected to {}", address);
                ConnectionResult::Success(stream)
            }
            Ok(Err(e)) => match e.kind() {
                io::ErrorKind::ConnectionRefused => {
                    debug!("Connection refused by {}", address);
                    ConnectionResult::ConnectionRefused
                }
                _ => {
                    debug!("Network error connecting to {}: {}", address, e);
                    ConnectionResult::NetworkError(e)
                }
            },
            Err(_) => {
                debug!("Timeout connecting to {}", address);
                ConnectionResult::Timeout
            }
        }
    }

    fn configure_stream(&self, stream: &TcpStream) -> Result<(), io::Error> {
        stream.set_nodelay(true)?;
        if let Some(idle) = self.keepalive {
            let socket = SockRef::from(stream);
            socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }
        Ok(())
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
