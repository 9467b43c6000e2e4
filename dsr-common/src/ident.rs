use std::sync::atomic::{AtomicU16, Ordering};

/// A wrapping 16-bit identification counter, shared between threads.
///
/// Route requests and acknowledgement requests each draw identifications from their own counter.
/// The counter starts at a random value so that a restarted node does not immediately reuse the
/// identifications it handed out before.
#[derive(Debug)]
pub struct IdentificationCounter(AtomicU16);

impl IdentificationCounter {
    /// Creates a counter starting at a random value.
    pub fn random() -> Self {
        Self(AtomicU16::new(rand::random()))
    }

    /// Creates a counter starting at `start`.
    pub const fn starting_at(start: u16) -> Self {
        Self(AtomicU16::new(start))
    }

    /// Returns the next identification. Wraps around on overflow.
    #[inline]
    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdentificationCounter {
    fn default() -> Self {
        Self::random()
    }
}
