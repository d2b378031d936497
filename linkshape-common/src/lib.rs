//! Helpers shared by the linkshape crates.

use std::time::SystemTime;

mod keyed;
pub use keyed::{KeyedGuard, KeyedMutex};

/// Returns the current UNIX timestamp in microseconds.
#[inline]
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Size constants.
#[allow(non_upper_case_globals)]
pub mod constants {
    /// One kibibyte.
    pub const KiB: u32 = 1024;
}
