use std::cell::Cell;

// faster than xorshift128+ and better quality (see https://github.com/lemire/testingRNG)
use nanorand::{Rng, WyRand};

use crate::riverdb::common::fast_modulo32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

thread_local! {
    static CURRENT_WORKER: Cell<*const Worker> = Cell::new(std::ptr::null());
}

static mut ALL_WORKERS: &[Worker] = &[];

/// Worker is thread-local storage for the one EventLoop thread it's bound
/// to: a per-thread RNG used for the scan index jitter in ScanCasPool, and
/// an id used in log output. It corresponds 1-to-1 with EventLoop threads,
/// not with any shared runtime's worker pool — there is no shared runtime.
///
/// All Worker methods take &mut self, because there should never be more
/// than one reference to a Worker outstanding: exactly one EventLoop thread
/// owns it for its entire lifetime.
pub struct Worker {
    pub id: u32,
    rng: WyRand,
}

/// # Safety
/// Must be called exactly once, before any EventLoop thread starts and
/// calls Worker::get/try_get.
pub unsafe fn init_workers(num_workers: u32) {
    let workers: Vec<_> = (0..num_workers).map(|i| Worker::new(i + 1)).collect();
    ALL_WORKERS = &*workers.leak();
}

impl Worker {
    pub fn new(id: u32) -> Self {
        Worker {
            id,
            rng: WyRand::new(),
        }
    }

    /// Returns the thread-local Worker, assigning the next unclaimed one
    /// from ALL_WORKERS on first call from a given thread.
    /// Panics if every Worker slot from init_workers has already been claimed.
    pub fn get() -> &'static mut Worker {
        Self::try_get().expect("not an event loop thread")
    }

    pub fn try_get() -> Option<&'static mut Worker> {
        static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);

        CURRENT_WORKER.with(|ctx| {
            // Safety: ALL_WORKERS has been initialized before this function is called
            unsafe {
                let mut p = ctx.get();
                if p.is_null() {
                    // Grab an unallocated worker from ALL_WORKERS
                    if NEXT_WORKER.load(Relaxed) < ALL_WORKERS.len() {
                        let worker = ALL_WORKERS.get_unchecked(NEXT_WORKER.fetch_add(1, Relaxed));
                        p = worker as _;
                        ctx.set(p);
                    } else {
                        return None;
                    }
                }
                Some(&mut *(p as *mut Worker))
            }
        })
    }

    pub fn rand32(&mut self) -> u32 {
        self.rng.generate()
    }

    pub fn uniform_rand32(&mut self, max: u32) -> u32 {
        fast_modulo32(self.rng.generate(), max)
    }
}
