//! Single-flight guard for processing passes

use std::sync::atomic::{AtomicBool, Ordering};

/// Held for the duration of a pass; releases the flag on drop
///
/// Dropping covers every exit path, including early `?` returns and panics
/// unwinding through the pass.
#[derive(Debug)]
pub(crate) struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    /// Take the flag, or `None` if another pass holds it
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
