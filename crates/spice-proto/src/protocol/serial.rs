//! Per-channel serial counter for outbound data messages.
//!
//! # What is a serial? (for beginners)
//!
//! Every data message a channel sends carries a serial number.  The server
//! uses it to correlate acknowledgements and to order cross-channel waits
//! (WAIT_FOR_CHANNELS names a serial on another channel).  Serials start at 1,
//! increase by one per message, and are never reused on the same channel,
//! even when a send is retried.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64`.  A channel is driven from one thread, but the
//! owning session may read [`SerialCounter::last`] from elsewhere for
//! diagnostics, and an atomic keeps that lock-free.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing serial counter starting at 1.
///
/// # Examples
///
/// ```rust
/// use spice_proto::protocol::SerialCounter;
///
/// let serials = SerialCounter::new();
/// assert_eq!(serials.next(), 1);
/// assert_eq!(serials.next(), 2);
/// assert_eq!(serials.last(), 2);
/// ```
#[derive(Debug)]
pub struct SerialCounter {
    /// The last serial handed out; 0 means none yet.
    inner: AtomicU64,
}

impl SerialCounter {
    /// Creates a counter whose first serial is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Assigns the next serial.
    ///
    /// `Ordering::Relaxed` is sufficient: serials order messages on the wire,
    /// they do not publish memory between threads.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// The most recently assigned serial, or 0 if none was assigned yet.
    pub fn last(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_counter_starts_at_one() {
        // Arrange
        let serials = SerialCounter::new();

        // Act
        let first = serials.next();

        // Assert
        assert_eq!(first, 1);
    }

    #[test]
    fn test_serial_counter_increments_monotonically() {
        // Arrange
        let serials = SerialCounter::new();

        // Act
        let values: Vec<u64> = (0..100).map(|_| serials.next()).collect();

        // Assert – strictly increasing, no value repeated
        for window in values.windows(2) {
            assert!(window[1] > window[0], "serials must be strictly increasing");
        }
    }

    #[test]
    fn test_last_does_not_advance() {
        // Arrange
        let serials = SerialCounter::new();
        serials.next();

        // Act
        let last = serials.last();
        let next = serials.next();

        // Assert
        assert_eq!(last, 1);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_last_is_zero_before_first_serial() {
        assert_eq!(SerialCounter::default().last(), 0);
    }
}
