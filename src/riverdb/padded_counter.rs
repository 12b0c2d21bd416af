use std::sync::atomic::{AtomicU64, Ordering};

/// A 64-bit monotonic counter padded out to its own cache line so that two
/// PaddedCounters placed next to each other (producer/consumer sequences in
/// RingPool) never false-share. `#[repr(align(64))]` guarantees the struct
/// itself starts on a cache-line boundary; the trailing filler pushes its
/// size to a full line so the *next* field, whatever it is, starts on the
/// next line rather than sharing this one.
#[repr(align(64))]
pub struct PaddedCounter {
    value: AtomicU64,
    _pad: [u8; 56],
}

const _: () = assert!(std::mem::size_of::<PaddedCounter>() == 64);

impl PaddedCounter {
    pub const fn new(initial: u64) -> Self {
        PaddedCounter {
            value: AtomicU64::new(initial),
            _pad: [0u8; 56],
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> u64 {
        self.value.load(order)
    }

    #[inline]
    pub fn fetch_add(&self, val: u64, order: Ordering) -> u64 {
        self.value.fetch_add(val, order)
    }

    #[inline]
    pub fn compare_exchange_weak(&self, current: u64, new: u64, success: Ordering, failure: Ordering) -> Result<u64, u64> {
        self.value.compare_exchange_weak(current, new, success, failure)
    }
}

impl Default for PaddedCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupies_exactly_one_cache_line() {
        assert_eq!(std::mem::size_of::<PaddedCounter>(), 64);
        assert_eq!(std::mem::align_of::<PaddedCounter>(), 64);
    }

    #[test]
    fn adjacent_counters_land_on_different_lines() {
        struct Pair {
            a: PaddedCounter,
            b: PaddedCounter,
        }
        let pair = Pair {
            a: PaddedCounter::new(0),
            b: PaddedCounter::new(0),
        };
        let a_addr = &pair.a as *const _ as usize;
        let b_addr = &pair.b as *const _ as usize;
        assert_eq!((a_addr.max(b_addr) - a_addr.min(b_addr)) % 64, 0);
        assert_ne!(a_addr, b_addr);
    }

    #[test]
    fn fetch_add_wraps_like_a_normal_atomic() {
        let c = PaddedCounter::new(u64::MAX);
        let prev = c.fetch_add(1, Ordering::SeqCst);
        assert_eq!(prev, u64::MAX);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }
}
