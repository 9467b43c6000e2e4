use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters of a [`Router`](crate::Router).
#[derive(Debug, Default)]
pub struct RouterStats {
    /// Data packets originated by this node.
    originated: AtomicUsize,
    /// Frames forwarded along a source route.
    forwarded: AtomicUsize,
    /// Packets handed to the local host.
    delivered: AtomicUsize,
    /// Received frames that were dropped.
    dropped: AtomicUsize,
    route_requests: AtomicUsize,
    route_replies: AtomicUsize,
    route_errors: AtomicUsize,
    link_failures: AtomicUsize,
}

macro_rules! counter {
    ($field:ident, $increment:ident) => {
        #[inline]
        pub(crate) fn $increment(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        #[inline]
        pub fn $field(&self) -> usize {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl RouterStats {
    counter!(originated, increment_originated);
    counter!(forwarded, increment_forwarded);
    counter!(delivered, increment_delivered);
    counter!(dropped, increment_dropped);
    counter!(route_requests, increment_route_requests);
    counter!(route_replies, increment_route_replies);
    counter!(route_errors, increment_route_errors);
    counter!(link_failures, increment_link_failures);
}
