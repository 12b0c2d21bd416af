use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Relaxed};
use std::sync::atomic::{AtomicPtr, AtomicUsize};
use std::sync::Arc;

use crate::riverdb::backend_conn::BackendConnection;
use crate::riverdb::padded_counter::PaddedCounter;
use crate::riverdb::pool::ConnectionPool;

/// A ring buffer of connection slots addressed by independent producer
/// (release/offer) and consumer (acquire) sequence counters, each padded to
/// its own cache line so the two sides of the ring never false-share.
/// Unlike ScanCasPool, acquire() physically dequeues a connection from its
/// slot rather than leaving it in place — the returned Arc is the ring's
/// only reference, and release() must hand it back in.
pub struct RingPool {
    slots: Vec<AtomicPtr<BackendConnection>>,
    mask: usize,
    size: AtomicUsize,
    head: PaddedCounter,
    tail: PaddedCounter,
}

unsafe impl Send for RingPool {}
unsafe impl Sync for RingPool {}

impl RingPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        RingPool {
            slots: (0..capacity).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
            mask: capacity - 1,
            size: AtomicUsize::new(0),
            head: PaddedCounter::new(0),
            tail: PaddedCounter::new(0),
        }
    }

    /// Primary-slot-then-linear-probe insertion: tries `start`, then walks
    /// forward across the whole ring. False only if every slot is occupied.
    fn place(&self, raw: *mut BackendConnection, start: usize) -> bool {
        for i in 0..self.slots.len() {
            let idx = (start + i) & self.mask;
            if self.slots[idx].compare_exchange(ptr::null_mut(), raw, AcqRel, Relaxed).is_ok() {
                self.size.fetch_add(1, Relaxed);
                return true;
            }
        }
        false
    }
}

impl ConnectionPool for RingPool {
    fn acquire(&self) -> Option<Arc<BackendConnection>> {
        let cap = self.slots.len();
        for _ in 0..cap {
            let seq = self.head.fetch_add(1, Relaxed);
            let idx = (seq as usize) & self.mask;
            let raw = self.slots[idx].swap(ptr::null_mut(), AcqRel);
            if raw.is_null() {
                continue;
            }
            self.size.fetch_sub(1, Relaxed);
            let conn = unsafe { Arc::from_raw(raw) };
            if conn.try_acquire() {
                return Some(conn);
            }
            // Already occupied by some other protocol violation; put it
            // back rather than lose a live connection.
            let raw = Arc::into_raw(conn) as *mut BackendConnection;
            self.place(raw, idx);
        }
        None
    }

    fn release(&self, conn: Arc<BackendConnection>) {
        conn.release();
        let raw = Arc::into_raw(conn) as *mut BackendConnection;
        let seq = self.tail.fetch_add(1, Relaxed);
        let idx = (seq as usize) & self.mask;
        if !self.place(raw, idx) {
            // The ring is sized to the pool's capacity and acquire() only
            // ever extracts what release()/offer() put in, so this should
            // not happen in steady state. Force it into its primary slot
            // rather than leak the connection.
            let prev = self.slots[idx].swap(raw, AcqRel);
            if prev.is_null() {
                self.size.fetch_add(1, Relaxed);
            } else {
                unsafe { drop(Arc::from_raw(prev)) };
            }
        }
    }

    fn offer(&self, conn: Arc<BackendConnection>) -> bool {
        let raw = Arc::into_raw(conn) as *mut BackendConnection;
        let seq = self.tail.fetch_add(1, Relaxed);
        let idx = (seq as usize) & self.mask;
        if self.place(raw, idx) {
            true
        } else {
            unsafe { drop(Arc::from_raw(raw)) };
            false
        }
    }

    fn remove(&self, conn: &Arc<BackendConnection>) -> bool {
        let target = Arc::as_ptr(conn) as *mut BackendConnection;
        for slot in &self.slots {
            if slot.compare_exchange(target, ptr::null_mut(), AcqRel, Relaxed).is_ok() {
                self.size.fetch_sub(1, Relaxed);
                unsafe { drop(Arc::from_raw(target)) };
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

impl Drop for RingPool {
    fn drop(&mut self) {
        for slot in &self.slots {
            let raw = slot.swap(ptr::null_mut(), AcqRel);
            if !raw.is_null() {
                unsafe { drop(Arc::from_raw(raw)) };
            }
        }
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
    fn capacity_rounds_up_to_a_power_of_two() {
        let pool = RingPool::new(5);
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn offer_then_acquire_round_trips() {
        let pool = RingPool::new(4);
        assert!(pool.offer(make_conn()));
        assert_eq!(pool.size(), 1);
        let conn = pool.acquire().unwrap();
        assert_eq!(pool.size(), 0);
        pool.release(conn);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn acquire_on_empty_ring_returns_none() {
        let pool = RingPool::new(4);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn remove_takes_a_connection_out_of_the_ring() {
        let pool = RingPool::new(4);
        let conn = make_conn();
        pool.offer(conn.clone());
        assert!(pool.remove(&conn));
        assert_eq!(pool.size(), 0);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn full_ring_rejects_further_offers() {
        let pool = RingPool::new(2);
        assert!(pool.offer(make_conn()));
        assert!(pool.offer(make_conn()));
        assert!(!pool.offer(make_conn()));
        assert_eq!(pool.size(), 2);
    }
}
