use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::TcpStream;

use crate::riverdb::backend_conn::BackendConnection;
use crate::riverdb::common::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Opens new BackendConnections against one fixed (host, port) endpoint.
/// Used by both the master and replica pools, and by the Janitor when it
/// replaces a connection it just destroyed.
pub struct BackendFactory {
    host: String,
    port: u16,
}

impl BackendFactory {
    pub fn new(host: String, port: u16) -> Self {
        BackendFactory { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::new(format!("could not resolve {}:{}", self.host, self.port)))
    }

    /// Opens a non-blocking TCP connection and spin-waits for it to finish
    /// connecting (or fail) before returning. mio's TcpStream::connect
    /// returns immediately with the connect in progress; take_error() is the
    /// non-blocking way to discover success vs. failure.
    pub fn connect(&self) -> Result<BackendConnection> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect(addr)?;

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            match stream.take_error()? {
                Some(e) => return Err(Error::from(e)),
                None => {
                    if stream.peer_addr().is_ok() {
                        break;
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::new(format!("timed out connecting to {}", addr)));
            }
            thread::sleep(CONNECT_POLL_INTERVAL);
        }

        Ok(BackendConnection::new(stream, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdTcpListener;

    #[test]
    fn connects_to_a_live_listener() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_thread = thread::spawn(move || {
            let _ = listener.accept();
        });

        let factory = BackendFactory::new(addr.ip().to_string(), addr.port());
        let conn = factory.connect().unwrap();
        assert_eq!(conn.addr(), addr);

        accept_thread.join().unwrap();
    }

    #[test]
    fn resolve_fails_for_an_unresolvable_host() {
        let factory = BackendFactory::new("this.host.does.not.resolve.invalid".to_string(), 5432);
        assert!(factory.resolve().is_err());
    }
}
