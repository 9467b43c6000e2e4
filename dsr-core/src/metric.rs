//! Link metrics.

use std::fmt;

use dsr_common::{constants::HOP_COUNT_WEIGHT, Address};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Unicast ETX at or above which an unacknowledged frame counts as a broken link.
pub const DEFAULT_ETX_FAILURE_THRESHOLD: f64 = 3.0;

/// Assigns weights to links.
pub trait LinkMetric: fmt::Debug + Send + Sync + 'static {
    /// Weight of the link from the local interface `local_iface` to `neighbor`.
    fn hop_weight(&self, local_iface: &Address, neighbor: &Address) -> u16;

    /// Volatile metrics change over time, so re-learning a known link updates its weight.
    fn is_volatile(&self) -> bool {
        false
    }

    /// Called when a frame on the link went unacknowledged. Returning false keeps the link
    /// alive and only drops the frame.
    fn confirms_failure(&self, _local_iface: &Address, _neighbor: &Address) -> bool {
        true
    }
}

/// Every hop weighs the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct HopCount;

impl LinkMetric for HopCount {
    #[inline]
    fn hop_weight(&self, _: &Address, _: &Address) -> u16 {
        HOP_COUNT_WEIGHT
    }
}

/// Source of expected transmission counts, usually fed by probe windows.
pub trait EtxEstimator: fmt::Debug + Send + Sync + 'static {
    /// ETX of the link measured with broadcast probes.
    fn etx(&self, local_iface: &Address, neighbor: &Address) -> f64;

    /// ETX of the link measured with unicast probes.
    fn unicast_etx(&self, local_iface: &Address, neighbor: &Address) -> f64 {
        self.etx(local_iface, neighbor)
    }
}

/// Encodes an ETX value as a link weight with two decimals of precision.
#[inline]
pub fn encode_etx(etx: f64) -> u16 {
    if etx.is_nan() {
        return u16::MAX;
    }
    (etx * 100.0).round().clamp(0.0, u16::MAX as f64) as u16
}

/// The expected transmission count metric.
#[derive(Debug)]
pub struct Etx<E> {
    estimator: E,
    failure_threshold: f64,
}

impl<E: EtxEstimator> Etx<E> {
    pub fn new(estimator: E) -> Self {
        Self { estimator, failure_threshold: DEFAULT_ETX_FAILURE_THRESHOLD }
    }

    /// Sets the unicast ETX at or above which a missing acknowledgement breaks the link.
    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub const fn estimator(&self) -> &E {
        &self.estimator
    }
}

impl<E: EtxEstimator> LinkMetric for Etx<E> {
    fn hop_weight(&self, local_iface: &Address, neighbor: &Address) -> u16 {
        encode_etx(self.estimator.etx(local_iface, neighbor))
    }

    fn is_volatile(&self) -> bool {
        true
    }

    fn confirms_failure(&self, local_iface: &Address, neighbor: &Address) -> bool {
        self.estimator.unicast_etx(local_iface, neighbor) >= self.failure_threshold
    }
}

/// An [`EtxEstimator`] whose values are set by hand.
#[derive(Debug)]
pub struct StaticEtx {
    links: RwLock<FxHashMap<(Address, Address), f64>>,
    default: f64,
}

impl StaticEtx {
    /// Creates an estimator that reports `default` for unknown links.
    pub fn new(default: f64) -> Self {
        Self { links: RwLock::new(FxHashMap::default()), default }
    }

    pub fn set(&self, local_iface: Address, neighbor: Address, etx: f64) {
        self.links.write().insert((local_iface, neighbor), etx);
    }
}

impl Default for StaticEtx {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl EtxEstimator for StaticEtx {
    fn etx(&self, local_iface: &Address, neighbor: &Address) -> f64 {
        self.links.read().get(&(*local_iface, *neighbor)).copied().unwrap_or(self.default)
    }
}
