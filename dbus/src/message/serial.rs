use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

/// A message serial number. Always non-zero, per the protocol.
pub type Serial = NonZeroU32;

/// Hands out serial numbers for messages this connection originates,
/// wrapping from `u32::MAX` back to `1` rather than to the reserved `0`.
#[derive(Debug)]
pub(crate) struct SerialAllocator {
    next: AtomicU32,
}

impl SerialAllocator {
    pub(crate) fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    pub(crate) fn next(&self) -> Serial {
        loop {
            let current = self.next.fetch_add(1, Ordering::Relaxed);
            if let Some(serial) = NonZeroU32::new(current) {
                return serial;
            }
            // current == 0, wrapped past u32::MAX: retry with the next value.
        }
    }
}

impl Default for SerialAllocator {
    fn default() -> Self {
        Self::new()
    }
}
