use std::cell::UnsafeCell;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;

use crate::riverdb::common::{coarse_monotonic_now, AtomicCell};

/// The four disjoint states of a BackendConnection. Packed into a single
/// byte so the whole state machine rides in one AtomicCell<ConnState>
/// rather than behind a lock: only a CAS ever moves it, and DESTROYED is
/// absorbing once entered.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnState {
    Idle = 0,
    Busy = 1,
    Stale = 2,
    Destroyed = 3,
}

/// Owns exactly one non-blocking backend socket and the atomic state that
/// grants exclusive I/O ownership over it. Only the thread that wins the
/// Idle->Busy CAS (or the thread tearing it down into Destroyed) may touch
/// the socket; everyone else only ever touches `state`.
pub struct BackendConnection {
    socket: UnsafeCell<TcpStream>,
    state: AtomicCell<ConnState>,
    created_at: u32,
    addr: SocketAddr,
}

// Safety: exclusivity over `socket` is enforced by the `state` CAS protocol,
// not by the borrow checker. Any caller performing I/O must have first won
// try_acquire (Idle->Busy) or be the thread that drove the connection into
// Destroyed.
unsafe impl Send for BackendConnection {}
unsafe impl Sync for BackendConnection {}

impl BackendConnection {
    pub(crate) fn new(socket: TcpStream, addr: SocketAddr) -> Self {
        BackendConnection {
            socket: UnsafeCell::new(socket),
            state: AtomicCell::new(ConnState::Idle),
            created_at: coarse_monotonic_now(),
            addr,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state.load()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn created_at(&self) -> u32 {
        self.created_at
    }

    /// Idle->Busy. Returns true on success; the caller now exclusively owns
    /// the socket until it calls release() or destroy().
    pub fn try_acquire(&self) -> bool {
        self.state.compare_exchange(ConnState::Idle, ConnState::Busy).is_ok()
    }

    /// Busy->Idle. Returns true on success; false means the caller violated
    /// the protocol (the connection wasn't Busy), in which case the caller
    /// must do nothing further with the connection.
    pub fn release(&self) -> bool {
        self.state.compare_exchange(ConnState::Busy, ConnState::Idle).is_ok()
    }

    /// CAS-loop setting Stale from {Idle, Busy}. Refuses (returns false) if
    /// already Destroyed; Stale is otherwise reachable from either state.
    pub fn mark_stale(&self) -> bool {
        loop {
            match self.state.load() {
                ConnState::Destroyed => return false,
                ConnState::Stale => return true,
                current => {
                    if self.state.compare_exchange_weak(current, ConnState::Stale).is_ok() {
                        return true;
                    }
                }
            }
        }
    }

    /// Atomically swaps in Destroyed; closes the socket exactly once, only
    /// on the transition that actually changed the state (so concurrent
    /// destroy() calls from racing callers don't double-close).
    pub fn destroy(&self) {
        let prior = self.state.swap(ConnState::Destroyed);
        if prior != ConnState::Destroyed {
            // shutdown() best-effort; the fd is reclaimed regardless when
            // the TcpStream drops at the end of the owning pool's cleanup.
            let _ = self.socket().shutdown(std::net::Shutdown::Both);
        }
    }

    fn socket(&self) -> &mut TcpStream {
        // Safety: caller holds Busy (or is the destroyer); see struct docs.
        unsafe { &mut *self.socket.get() }
    }

    /// Non-blocking read. Returns Ok(0) on remote EOF (the spec's "-1"
    /// signal, translated to Rust's usual 0-on-EOF convention), Ok(n) on
    /// n bytes read, or the underlying io::Error (including WouldBlock).
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket().read(buf)
    }

    /// Non-blocking write; forwards the underlying io::Error (including
    /// WouldBlock) to the caller.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket().write(buf)
    }

    pub fn set_nonblocking(&self) -> io::Result<()> {
        // mio::net::TcpStream is always non-blocking by construction.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener as StdTcpListener;

    fn make_conn() -> (BackendConnection, std::net::TcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let mio_stream = TcpStream::from_std(server);
        (BackendConnection::new(mio_stream, addr), client)
    }

    #[test]
    fn fresh_connection_starts_idle() {
        let (conn, _client) = make_conn();
        assert_eq!(conn.state(), ConnState::Idle);
    }

    #[test]
    fn try_acquire_then_release_round_trips_to_idle() {
        let (conn, _client) = make_conn();
        assert!(conn.try_acquire());
        assert_eq!(conn.state(), ConnState::Busy);
        assert!(conn.release());
        assert_eq!(conn.state(), ConnState::Idle);
    }

    #[test]
    fn double_acquire_only_one_winner() {
        let (conn, _client) = make_conn();
        assert!(conn.try_acquire());
        assert!(!conn.try_acquire());
    }

    #[test]
    fn destroyed_is_absorbing() {
        let (conn, _client) = make_conn();
        conn.destroy();
        assert_eq!(conn.state(), ConnState::Destroyed);
        assert!(!conn.mark_stale());
        assert!(!conn.try_acquire());
        // Idempotent: destroying twice does not panic or double transition.
        conn.destroy();
        assert_eq!(conn.state(), ConnState::Destroyed);
    }

    #[test]
    fn mark_stale_reachable_from_idle_and_busy() {
        let (conn, _client) = make_conn();
        assert!(conn.mark_stale());
        assert_eq!(conn.state(), ConnState::Stale);

        let (conn2, _client2) = make_conn();
        assert!(conn2.try_acquire());
        assert!(conn2.mark_stale());
        assert_eq!(conn2.state(), ConnState::Stale);
    }
}
