use std::cell::Cell;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::riverdb::backend_conn::BackendConnection;
use crate::riverdb::common::fast_modulo32;
use crate::riverdb::pool::ConnectionPool;
use crate::riverdb::worker::Worker;

/// Fixed array of slots, each persistently holding one connection for its
/// entire lifetime in the pool. acquire() never removes a connection from
/// its slot — it only flips that connection's own Idle->Busy bit — so
/// release() is equally cheap: no slot is ever touched, only the
/// connection's state. Only offer()/remove() rewrite a slot's contents.
///
/// Each slot is an `ArcSwapOption<BackendConnection>` rather than a bare
/// `AtomicPtr`: `load_full()` hands back an owned, independently-refcounted
/// `Arc` before acquire() ever looks at the connection, so a concurrent
/// remove() that drops the pool's own last reference can never race a
/// dereference of freed memory the way a plain atomic load of a raw pointer
/// would. offer()/remove() use `rcu` for the same reason — every mutation
/// goes through arc_swap's own compare-and-retry loop instead of a
/// hand-rolled CAS over a raw pointer.
pub struct ScanCasPool {
    slots: Vec<ArcSwapOption<BackendConnection>>,
    size: AtomicUsize,
    scan_index: AtomicUsize,
}

impl ScanCasPool {
    pub fn new(capacity: usize) -> Self {
        ScanCasPool {
            slots: (0..capacity).map(|_| ArcSwapOption::from(None)).collect(),
            size: AtomicUsize::new(0),
            scan_index: AtomicUsize::new(0),
        }
    }
}

impl ConnectionPool for ScanCasPool {
    fn acquire(&self) -> Option<Arc<BackendConnection>> {
        let len = self.slots.len() as u32;
        if len == 0 {
            return None;
        }
        // Prefer the calling EventLoop thread's own RNG to jitter the scan
        // start, so sibling loops don't contend on a single shared counter;
        // fall back to the atomic counter for callers with no Worker (the
        // Janitor, tests).
        let jitter = Worker::try_get().map(|w| w.rand32()).unwrap_or_else(|| self.scan_index.fetch_add(1, Relaxed) as u32);
        let start = fast_modulo32(jitter, len) as usize;
        for i in 0..len as usize {
            let idx = (start + i) % len as usize;
            if let Some(conn) = self.slots[idx].load_full() {
                if conn.try_acquire() {
                    return Some(conn);
                }
            }
        }
        None
    }

    fn release(&self, conn: Arc<BackendConnection>) {
        conn.release();
        // `conn` is our own clone of the slot's reference; drop it here.
    }

    fn offer(&self, conn: Arc<BackendConnection>) -> bool {
        for slot in &self.slots {
            let installed = Cell::new(false);
            slot.rcu(|current| {
                if current.is_none() {
                    installed.set(true);
                    Some(conn.clone())
                } else {
                    installed.set(false);
                    current.clone()
                }
            });
            if installed.get() {
                self.size.fetch_add(1, Relaxed);
                return true;
            }
        }
        false
    }

    fn remove(&self, conn: &Arc<BackendConnection>) -> bool {
        let target = Arc::as_ptr(conn);
        for slot in &self.slots {
            let removed = Cell::new(false);
            slot.rcu(|current| match current {
                Some(c) if Arc::as_ptr(c) == target => {
                    removed.set(true);
                    None
                }
                other => {
                    removed.set(false);
                    other.clone()
                }
            });
            if removed.get() {
                self.size.fetch_sub(1, Relaxed);
                return true;
            }
        }
        false
    }

    fn size(&self) -> usize {
        self.size.load(Relaxed)
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpStream;
    use std::net::TcpListener as StdTcpListener;

    fn make_conn() -> Arc<BackendConnection> {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        std::mem::forget(client);
        Arc::new(BackendConnection::new(TcpStream::from_std(server), addr))
    }

    #[test]
    fn offer_then_acquire_round_trips() {
        let pool = ScanCasPool::new(4);
        assert!(pool.offer(make_conn()));
        assert_eq!(pool.size(), 1);
        let conn = pool.acquire().unwrap();
        assert!(!conn.try_acquire());
        pool.release(conn);
    }

    #[test]
    fn acquire_on_empty_pool_returns_none() {
        let pool = ScanCasPool::new(4);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn acquire_skips_busy_connections() {
        let pool = ScanCasPool::new(2);
        pool.offer(make_conn());
        pool.offer(make_conn());
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        pool.release(a);
        pool.release(b);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn remove_drops_the_slot_and_frees_capacity_for_offer() {
        let pool = ScanCasPool::new(1);
        let conn = make_conn();
        pool.offer(conn.clone());
        assert!(!pool.offer(make_conn()));
        assert!(pool.remove(&conn));
        assert_eq!(pool.size(), 0);
        assert!(pool.offer(make_conn()));
    }

    #[test]
    fn offer_beyond_capacity_fails_and_does_not_leak_the_slot_count() {
        let pool = ScanCasPool::new(1);
        pool.offer(make_conn());
        assert!(!pool.offer(make_conn()));
        assert_eq!(pool.size(), 1);
    }
}
