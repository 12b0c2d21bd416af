use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::riverdb::common::coarse_monotonic_now;
use crate::riverdb::factory::BackendFactory;
use crate::riverdb::pool::ConnectionPool;

const PROBE_BUF_LEN: usize = 16;

/// A single daemon thread attached to one pool. Sleeps for `interval`,
/// then runs one bounded sweep: age-checks or probes every connection it
/// can acquire, destroying and replacing anything unhealthy.
pub struct Janitor {
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl Janitor {
    pub fn spawn(name: &'static str, pool: Arc<dyn ConnectionPool>, factory: Arc<BackendFactory>, max_idle_secs: u32, interval_secs: u32) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let interval = Duration::from_secs(interval_secs.max(1) as u64);

        let join = thread::Builder::new()
            .name(format!("riverdb-janitor-{}", name))
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if thread_shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    sweep(name, &*pool, &factory, max_idle_secs);
                }
            })
            .expect("failed to spawn janitor thread");

        Janitor { shutdown, join }
    }

    /// Flips the shutdown flag; the thread exits at its next wake.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.join.join();
    }
}

/// One bounded pass: acquire up to `capacity` connections, age-check or
/// probe each, release the healthy ones, destroy+replace the rest.
fn sweep(name: &str, pool: &dyn ConnectionPool, factory: &BackendFactory, max_idle_secs: u32) {
    let mut probed = 0u32;
    let mut replaced = 0u32;

    for _ in 0..pool.capacity() {
        let conn = match pool.acquire() {
            Some(conn) => conn,
            None => break,
        };
        probed += 1;

        let age = coarse_monotonic_now().saturating_sub(conn.created_at());
        let healthy = if age > max_idle_secs {
            false
        } else {
            probe(&conn)
        };

        if healthy {
            pool.release(conn);
            continue;
        }

        conn.mark_stale();
        conn.destroy();
        pool.remove(&conn);
        drop(conn);

        match factory.connect() {
            Ok(fresh) => {
                pool.offer(Arc::new(fresh));
                replaced += 1;
            }
            Err(e) => {
                warn!(pool = name, error = %e, "janitor failed to replace a stale connection");
            }
        }
    }

    if probed > 0 {
        info!(pool = name, probed, replaced, "janitor sweep complete");
    }
}

/// Non-blocking read into a tiny scratch buffer. Remote EOF or any I/O
/// error marks the connection unhealthy; WouldBlock (nothing to read, the
/// common case for an idle connection) is healthy.
fn probe(conn: &crate::riverdb::backend_conn::BackendConnection) -> bool {
    let mut buf = [0u8; PROBE_BUF_LEN];
    match conn.read(&mut buf) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}
