mod errors;
mod coarse_clock;
mod atomic_cell;
mod math;

pub use self::errors::{Error, Result};
pub use self::coarse_clock::{coarse_monotonic_now, coarse_clock_updater, coarse_clock_shutdown};
pub use self::atomic_cell::AtomicCell;
pub use self::math::fast_modulo32;

/// True if T and U have the same size, and therefore a bitwise transmute_copy
/// between them is a plain reinterpretation rather than truncation/padding.
/// Used by the AtomicCell macro to pick the matching primitive atomic type.
pub const fn can_transmute<T, U>() -> bool {
    std::mem::size_of::<T>() == std::mem::size_of::<U>()
}
