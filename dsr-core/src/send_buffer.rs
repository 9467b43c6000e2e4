use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use dsr_common::Address;
use dsr_wire::Frame;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ConfigHandle;

#[derive(Debug)]
struct SendBufferEntry {
    destination: Address,
    frame: Frame,
    expires: Instant,
}

/// A snapshot of a single send buffer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendBufferRecord {
    pub destination: Address,
    pub expires: Instant,
}

/// Originated packets waiting for a route to their destination.
#[derive(Debug)]
pub struct SendBuffer {
    entries: RwLock<VecDeque<SendBufferEntry>>,
    config: ConfigHandle,
}

impl SendBuffer {
    pub fn new(config: ConfigHandle) -> Self {
        Self { entries: RwLock::new(VecDeque::new()), config }
    }

    /// Queues `frame` until a route to `destination` is known or the send buffer timeout
    /// passes.
    pub fn add(&self, destination: Address, frame: Frame, now: Instant) {
        let expires = now + self.config.load().sendbuffer_timeout;
        self.entries.write().push_back(SendBufferEntry { destination, frame, expires });
    }

    /// Dequeues every live frame for `destination`, oldest first, and hands each to `send`
    /// together with its transmission delay. The k-th frame is delayed by k flush steps.
    /// Returns the number of flushed frames.
    pub fn flush(&self, destination: &Address, now: Instant, mut send: impl FnMut(Frame, Duration)) -> usize {
        let step = self.config.load().sendbuffer_flush_step;

        let flushed: Vec<Frame> = {
            let mut entries = self.entries.write();
            let (matching, rest): (VecDeque<_>, VecDeque<_>) =
                entries.drain(..).partition(|entry| entry.destination == *destination);
            *entries = rest;
            matching.into_iter().filter(|entry| entry.expires > now).map(|entry| entry.frame).collect()
        };

        let count = flushed.len();
        for (k, frame) in flushed.into_iter().enumerate() {
            send(frame, step.saturating_mul(k as u32 + 1));
        }

        if count > 0 {
            debug!(%destination, count, "flushed send buffer");
        }
        count
    }

    /// Drops every frame past its timeout. Returns the number of dropped frames.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.expires > now);

        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired send buffer entries");
        }
        evicted
    }

    /// Number of frames waiting for `destination`.
    pub fn pending_for(&self, destination: &Address) -> usize {
        self.entries.read().iter().filter(|e| e.destination == *destination).count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns a copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<SendBufferRecord> {
        self.entries
            .read()
            .iter()
            .map(|e| SendBufferRecord { destination: e.destination, expires: e.expires })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::config::DsrConfig;

    fn addr(n: u8) -> Address {
        Address::new([2, 0, 0, 0, 0, n])
    }

    fn frame(dest: u8, payload: &'static [u8]) -> Frame {
        Frame::new(addr(1), addr(dest), Bytes::from_static(payload))
    }

    #[test]
    fn flush_in_order_with_increasing_delay() {
        let buffer = SendBuffer::new(ConfigHandle::default());
        let now = Instant::now();
        buffer.add(addr(3), frame(3, b"one"), now);
        buffer.add(addr(4), frame(4, b"other"), now);
        buffer.add(addr(3), frame(3, b"two"), now);

        let mut sent = Vec::new();
        assert_eq!(buffer.flush(&addr(3), now, |frame, delay| sent.push((frame.payload, delay))), 2);

        assert_eq!(sent[0].0, Bytes::from_static(b"one"));
        assert_eq!(sent[1].0, Bytes::from_static(b"two"));
        assert!(Duration::ZERO < sent[0].1 && sent[0].1 < sent[1].1);

        // Flushing again sends nothing.
        assert_eq!(buffer.flush(&addr(3), now, |_, _| panic!("sent twice")), 0);
        assert_eq!(buffer.pending_for(&addr(4)), 1);
    }

    #[test]
    fn expired_frames_are_evicted_without_sending() {
        let timeout = Duration::from_secs(5);
        let buffer = SendBuffer::new(ConfigHandle::new(DsrConfig::default().with_sendbuffer_timeout(timeout)));
        let now = Instant::now();
        buffer.add(addr(3), frame(3, b"late"), now);
        buffer.add(addr(3), frame(3, b"later"), now + timeout);

        assert_eq!(buffer.sweep(now + timeout - Duration::from_millis(1)), 0);
        assert_eq!(buffer.sweep(now + timeout), 1);
        assert_eq!(buffer.len(), 1);

        // Expired frames are not flushed either.
        assert_eq!(buffer.flush(&addr(3), now + timeout * 2, |_, _| panic!("expired frame sent")), 0);
        assert!(buffer.is_empty());
    }
}
