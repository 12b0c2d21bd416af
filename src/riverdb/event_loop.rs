use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, info, warn};

use crate::riverdb::backend_conn::BackendConnection;
use crate::riverdb::buffer_pool::DirectBufferPool;
use crate::riverdb::classifier::{classify, Classification};
use crate::riverdb::common::{Error, Result};
use crate::riverdb::queue::{RegistrationProducer, RegistrationQueue};
use crate::riverdb::router::Router;

/// Reserved for the mio::Waker that wakes us out of the multiplexer wait to
/// drain the pending-registration queue or notice a shutdown request.
const WAKE_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;
const MULTIPLEXER_WAIT: Duration = Duration::from_secs(1);

const BACKEND_IO_TIMEOUT: Duration = Duration::from_secs(2);
const BACKEND_IO_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Phase of a single client session, mirroring the per-client state the
/// EventLoop owns exclusively (only the thread that registered a session
/// ever touches it). This implementation completes a request synchronously
/// within one client-readable event, so AwaitBackendReply is transient
/// bookkeeping rather than a state a session rests in across separate
/// readiness notifications; StreamingBackendToClient is reserved for a
/// future partial-response flow and is never entered here.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    AwaitClientBytes,
    AwaitBackendReply,
    StreamingBackendToClient,
    Closing,
}

struct ClientSession {
    stream: TcpStream,
    addr: SocketAddr,
    phase: Phase,
}

/// One selector loop, one OS thread, one Poll. Owns every session it
/// registers; no other thread ever touches a ClientSession or calls into
/// this loop's Poll. The only blocking call anywhere in the loop is the
/// multiplexer wait itself, bounded to MULTIPLEXER_WAIT.
pub struct EventLoop {
    id: usize,
    poll: Poll,
    sessions: Slab<ClientSession>,
    buffer_pool: Arc<DirectBufferPool>,
    router: Arc<Router>,
    queue: RegistrationQueue<TcpStream>,
    shutdown: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new(id: usize, buffer_pool: Arc<DirectBufferPool>, router: Arc<Router>) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(EventLoop {
            id,
            poll,
            sessions: Slab::new(),
            buffer_pool,
            router,
            queue: RegistrationQueue::new(waker),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A handle other threads (the dispatcher) use to hand this loop new
    /// client sockets. Must be taken before `run` consumes the loop.
    pub fn producer(&self) -> RegistrationProducer<TcpStream> {
        self.queue.producer()
    }

    /// A handle the owning EventLoopGroup keeps to request shutdown.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Runs until shutdown_flag() is set and observed. Blocking only inside
    /// the multiplexer wait; everything else is non-blocking or a bounded
    /// retry loop.
    pub fn run(mut self) -> Result<()> {
        info!(loop_id = self.id, "event loop started");
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            self.poll.poll(&mut events, Some(MULTIPLEXER_WAIT))?;

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    self.accept_registrations()?;
                    continue;
                }

                let idx = event.token().0;
                if let Err(e) = self.handle_client_event(idx) {
                    debug!(loop_id = self.id, conn = idx, error = %e, "closing client session");
                    self.close_session(idx);
                }
            }
        }

        self.teardown();
        info!(loop_id = self.id, "event loop shut down");
        Ok(())
    }

    fn accept_registrations(&mut self) -> Result<()> {
        for mut stream in self.queue.drain() {
            let addr = stream.peer_addr()?;
            let entry = self.sessions.vacant_entry();
            let token = Token(entry.key());
            self.poll.registry().register(&mut stream, token, Interest::READABLE)?;
            entry.insert(ClientSession {
                stream,
                addr,
                phase: Phase::AwaitClientBytes,
            });
        }
        Ok(())
    }

    fn handle_client_event(&mut self, idx: usize) -> Result<()> {
        if !self.sessions.contains(idx) {
            return Ok(());
        }
        if self.sessions[idx].phase == Phase::Closing {
            return Err(Error::closed());
        }

        let mut request = self.buffer_pool.acquire().ok_or_else(Error::too_busy)?;
        let n = {
            let session = &mut self.sessions[idx];
            match session.stream.read(request.full_mut_slice()) {
                Ok(0) => return Err(Error::closed()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(Error::from(e)),
            }
        };
        request.set_position(0);
        request.set_limit(n);

        let classification = classify(request.as_slice());
        let backend = self.router.pick(classification).ok_or_else(Error::too_busy)?;

        self.sessions[idx].phase = Phase::AwaitBackendReply;
        let mut reply = self.buffer_pool.acquire().ok_or_else(Error::too_busy)?;
        let result = relay_request(&backend, request.as_slice(), reply.full_mut_slice(), &mut self.sessions[idx].stream);

        match result {
            Ok(()) => {
                self.sessions[idx].phase = Phase::AwaitClientBytes;
                self.router.release(classification, backend);
                Ok(())
            }
            Err(e) => {
                // I/O failure on a BUSY connection: stale + destroy + remove,
                // leaving a gap the Janitor's next sweep refills.
                backend.mark_stale();
                backend.destroy();
                let pool = match classification {
                    Classification::Read => self.router.replica(),
                    Classification::Write | Classification::Unknown => self.router.master(),
                };
                pool.remove(&backend);
                self.sessions[idx].phase = Phase::Closing;
                Err(e)
            }
        }
    }

    fn close_session(&mut self, idx: usize) {
        if self.sessions.contains(idx) {
            let mut session = self.sessions.remove(idx);
            let _ = self.poll.registry().deregister(&mut session.stream);
            warn!(loop_id = self.id, conn = idx, addr = %session.addr, "session closed");
        }
    }

    fn teardown(&mut self) {
        let indices: Vec<usize> = self.sessions.iter().map(|(idx, _)| idx).collect();
        for idx in indices {
            self.close_session(idx);
        }
    }
}

/// Writes the whole request to the backend, blocks (via bounded retry, the
/// same spin-with-sleep discipline as BackendFactory::connect) until a
/// reply arrives, and forwards it to the client.
fn relay_request(backend: &BackendConnection, request: &[u8], reply: &mut [u8], client: &mut TcpStream) -> Result<()> {
    write_all_to_backend(backend, request)?;
    let n = read_some_from_backend(backend, reply)?;
    write_all_to_client(client, &reply[..n])
}

fn write_all_to_backend(backend: &BackendConnection, mut buf: &[u8]) -> Result<()> {
    let deadline = Instant::now() + BACKEND_IO_TIMEOUT;
    while !buf.is_empty() {
        match backend.write(buf) {
            Ok(0) => return Err(Error::closed()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::new("timed out writing to backend"));
                }
                thread::sleep(BACKEND_IO_POLL_INTERVAL);
            }
            Err(e) => return Err(Error::from(e)),
        }
    }
    Ok(())
}

fn read_some_from_backend(backend: &BackendConnection, buf: &mut [u8]) -> Result<usize> {
    let deadline = Instant::now() + BACKEND_IO_TIMEOUT;
    loop {
        match backend.read(buf) {
            Ok(0) => return Err(Error::closed()),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::new("timed out reading backend reply"));
                }
                thread::sleep(BACKEND_IO_POLL_INTERVAL);
            }
            Err(e) => return Err(Error::from(e)),
        }
    }
}

fn write_all_to_client(client: &mut TcpStream, mut buf: &[u8]) -> Result<()> {
    let deadline = Instant::now() + BACKEND_IO_TIMEOUT;
    while !buf.is_empty() {
        match client.write(buf) {
            Ok(0) => return Err(Error::closed()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::new("timed out writing to client"));
                }
                thread::sleep(BACKEND_IO_POLL_INTERVAL);
            }
            Err(e) => return Err(Error::from(e)),
        }
    }
    Ok(())
}
