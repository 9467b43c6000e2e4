//! Frame transports used by the routing engine.

use dsr_common::Address;
use dsr_wire::Frame;

pub mod memory;
pub use memory::{MemoryMesh, MemoryTransport, Reception};

/// Moves frames between a node and its neighbors, and hands frames addressed to the node up to
/// the host network stack.
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Transmits `frame` on the local interface `iface`. The frame's link-layer destination
    /// selects the receiving neighbor, or every neighbor for [`Address::BROADCAST`].
    fn send(&self, iface: Address, frame: Frame) -> Result<(), Self::Error>;

    /// Delivers a frame to the local host.
    fn deliver(&self, frame: Frame) -> Result<(), Self::Error>;
}
