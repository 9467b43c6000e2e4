//! An in-memory wireless medium.
//!
//! Interfaces are joined by directed links. Every transmission is encoded with the wire
//! [`Codec`] and queued for each interface that can hear the sender, regardless of the frame's
//! link-layer destination, the way a shared radio channel behaves. Receivers decide whether the
//! frame was addressed to them or merely overheard.

use std::{collections::VecDeque, sync::Arc};

use bytes::BytesMut;
use dsr_common::Address;
use dsr_wire::{Codec, Frame};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::Transport;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Wire error: {0:?}")]
    Wire(#[from] dsr_wire::Error),
}

/// A frame that arrived on an interface.
#[derive(Debug, Clone)]
pub struct Reception {
    /// The interface that heard the frame.
    pub iface: Address,
    pub frame: Frame,
}

#[derive(Debug)]
struct Transmission {
    to: Address,
    bytes: BytesMut,
}

#[derive(Debug, Default)]
struct MeshState {
    /// Directed links between interfaces.
    links: FxHashSet<(Address, Address)>,
    in_flight: VecDeque<Transmission>,
    /// Frames handed to the host stack, per node.
    delivered: FxHashMap<Address, Vec<Frame>>,
    /// Total number of transmissions.
    transmissions: usize,
}

/// A shared broadcast medium connecting [`MemoryTransport`]s.
#[derive(Debug, Default)]
pub struct MemoryMesh {
    state: Mutex<MeshState>,
}

impl MemoryMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates the transport endpoint of the node `node`.
    pub fn endpoint(self: &Arc<Self>, node: Address) -> MemoryTransport {
        MemoryTransport { mesh: Arc::clone(self), node }
    }

    /// Joins two interfaces in both directions.
    pub fn connect(&self, a: Address, b: Address) {
        let mut state = self.state.lock();
        state.links.insert((a, b));
        state.links.insert((b, a));
    }

    /// Lets `to` hear `from`, but not the other way around.
    pub fn connect_directed(&self, from: Address, to: Address) {
        self.state.lock().links.insert((from, to));
    }

    /// Breaks the link between two interfaces in both directions.
    pub fn disconnect(&self, a: Address, b: Address) {
        let mut state = self.state.lock();
        state.links.remove(&(a, b));
        state.links.remove(&(b, a));
    }

    /// Removes and decodes the oldest frame still in flight.
    pub fn next_reception(&self) -> Option<Result<Reception, MemoryError>> {
        let Transmission { to, mut bytes } = self.state.lock().in_flight.pop_front()?;

        let mut codec = Codec::new();
        Some(match codec.decode(&mut bytes) {
            Ok(Some(frame)) => Ok(Reception { iface: to, frame }),
            Ok(None) => Err(MemoryError::Wire(dsr_wire::Error::Truncated)),
            Err(e) => Err(e.into()),
        })
    }

    /// Number of frames in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Total number of frames transmitted on the medium.
    pub fn transmissions(&self) -> usize {
        self.state.lock().transmissions
    }

    /// Returns a copy of the frames delivered to the host stack of `node`.
    pub fn delivered(&self, node: &Address) -> Vec<Frame> {
        self.state.lock().delivered.get(node).cloned().unwrap_or_default()
    }

    /// Drops every frame in flight.
    pub fn clear(&self) {
        self.state.lock().in_flight.clear();
    }

    fn transmit(&self, iface: Address, frame: Frame) -> Result<(), MemoryError> {
        let mut codec = Codec::new();
        let mut bytes = BytesMut::new();
        codec.encode(frame, &mut bytes)?;

        let mut state = self.state.lock();
        state.transmissions += 1;

        let receivers: Vec<Address> =
            state.links.iter().filter(|(from, _)| *from == iface).map(|(_, to)| *to).collect();

        trace!(%iface, receivers = receivers.len(), "transmitting frame");
        for to in receivers {
            state.in_flight.push_back(Transmission { to, bytes: bytes.clone() });
        }

        Ok(())
    }
}

/// The endpoint of a single node on a [`MemoryMesh`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    mesh: Arc<MemoryMesh>,
    node: Address,
}

impl MemoryTransport {
    pub fn mesh(&self) -> &Arc<MemoryMesh> {
        &self.mesh
    }
}

impl Transport for MemoryTransport {
    type Error = MemoryError;

    fn send(&self, iface: Address, frame: Frame) -> Result<(), Self::Error> {
        self.mesh.transmit(iface, frame)
    }

    fn deliver(&self, frame: Frame) -> Result<(), Self::Error> {
        self.mesh.state.lock().delivered.entry(self.node).or_default().push(frame);
        Ok(())
    }
}
