use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::TcpStream;
use tracing::warn;

use crate::riverdb::buffer_pool::DirectBufferPool;
use crate::riverdb::common::Result;
use crate::riverdb::event_loop::EventLoop;
use crate::riverdb::queue::RegistrationProducer;
use crate::riverdb::router::Router;

const JOIN_DEADLINE: Duration = Duration::from_secs(2);

/// Owns N EventLoops and round-robins accepted sockets across them.
/// Construction (`new`) builds the loops and their producer handles without
/// spawning any threads; `start` is the separate step that spawns one OS
/// thread per loop, so a caller can wire dispatch()-dependent components
/// together before anything actually begins running.
pub struct EventLoopGroup {
    producers: Vec<RegistrationProducer<TcpStream>>,
    shutdowns: Vec<Arc<AtomicBool>>,
    pending: Mutex<Option<Vec<EventLoop>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counter: AtomicUsize,
}

impl EventLoopGroup {
    pub fn new(worker_count: usize, buffer_pool: Arc<DirectBufferPool>, router: Arc<Router>) -> Result<Arc<Self>> {
        let worker_count = worker_count.max(1);
        let mut event_loops = Vec::with_capacity(worker_count);
        let mut producers = Vec::with_capacity(worker_count);
        let mut shutdowns = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let event_loop = EventLoop::new(id, buffer_pool.clone(), router.clone())?;
            producers.push(event_loop.producer());
            shutdowns.push(event_loop.shutdown_flag());
            event_loops.push(event_loop);
        }

        Ok(Arc::new(EventLoopGroup {
            producers,
            shutdowns,
            pending: Mutex::new(Some(event_loops)),
            handles: Mutex::new(Vec::with_capacity(worker_count)),
            counter: AtomicUsize::new(0),
        }))
    }

    /// Spawns one OS thread per loop. Calling this more than once has no
    /// effect beyond the first call.
    pub fn start(&self) -> Result<()> {
        let event_loops = match self.pending.lock().expect("pending mutex poisoned").take() {
            Some(loops) => loops,
            None => return Ok(()),
        };

        let mut handles = self.handles.lock().expect("handles mutex poisoned");
        for (id, event_loop) in event_loops.into_iter().enumerate() {
            let join = thread::Builder::new()
                .name(format!("riverdb-eventloop-{}", id))
                .spawn(move || {
                    if let Err(e) = event_loop.run() {
                        tracing::error!(loop_id = id, error = %e, "event loop exited with an error");
                    }
                })?;
            handles.push(join);
        }
        Ok(())
    }

    /// Hands a freshly accepted socket to the next loop in round-robin
    /// order: `counter.fetch_add(1) mod N`.
    pub fn dispatch(&self, socket: TcpStream) -> Result<()> {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.producers.len();
        self.producers[idx].register(socket)
    }

    /// Flags every loop to stop, wakes each one so it notices promptly, then
    /// joins each thread with a bounded deadline, logging (not panicking)
    /// on any join failure or timeout.
    pub fn shutdown(&self) {
        for shutdown in &self.shutdowns {
            shutdown.store(true, Ordering::Release);
        }
        for producer in &self.producers {
            let _ = producer.wake();
        }

        // JoinHandle::join has no timeout variant in std; spawn a watchdog
        // thread per join so a wedged loop can't hang shutdown forever.
        let handles = std::mem::take(&mut *self.handles.lock().expect("handles mutex poisoned"));
        for join in handles {
            let (tx, rx) = std::sync::mpsc::channel();
            thread::spawn(move || {
                let result = join.join();
                let _ = tx.send(result);
            });
            match rx.recv_timeout(JOIN_DEADLINE) {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("event loop thread panicked during shutdown"),
                Err(_) => warn!("event loop thread did not exit within the shutdown deadline"),
            }
        }
    }
}
