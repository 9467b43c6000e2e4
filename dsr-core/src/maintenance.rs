use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use dsr_common::Address;
use dsr_wire::Frame;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{config::ConfigHandle, error::MaintenanceError, metric::LinkMetric};

/// A unicast frame handed to the maintenance buffer.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    /// Identification, unique among the buffered frames.
    pub id: u16,
    pub frame: Frame,
    /// Interface the frame was received on, `None` if this node originated it.
    pub in_iface: Option<Address>,
    /// Interface the frame is sent on.
    pub out_iface: Address,
}

impl BufferedFrame {
    #[inline]
    pub fn next_hop(&self) -> Address {
        self.frame.l2_dst
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Not transmitted yet. Sent when the deadline passes.
    Scheduled { tracked: bool },
    /// Transmitted and waiting for an acknowledgement.
    Pending,
}

#[derive(Debug)]
struct MaintenanceEntry {
    buffered: BufferedFrame,
    phase: Phase,
    retransmissions: u32,
    deadline: Instant,
    seq: u64,
}

impl MaintenanceEntry {
    #[inline]
    fn link(&self) -> (Address, Address) {
        (self.buffered.out_iface, self.buffered.next_hop())
    }
}

/// Work produced by [`MaintenanceBuffer::sweep`].
#[derive(Debug, Clone)]
pub enum MaintenanceEvent {
    /// First transmission of a delayed frame.
    Transmit { frame: Frame, out_iface: Address },
    /// The frame went unacknowledged and is sent again.
    Retransmit { frame: Frame, out_iface: Address, attempt: u32 },
    /// The link to the next hop is considered broken.
    LinkFailure(LinkFailure),
}

/// A broken link detected by the maintenance buffer.
#[derive(Debug, Clone)]
pub struct LinkFailure {
    pub out_iface: Address,
    pub next_hop: Address,
    /// The frame that exhausted its retransmissions.
    pub frame: Frame,
    /// Set if this node forwarded the frame rather than originating it.
    pub in_iface: Option<Address>,
    /// Other buffered frames on the same link, dropped with it.
    pub dropped: usize,
}

/// A snapshot of a single maintenance buffer entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceRecord {
    pub id: u16,
    pub out_iface: Address,
    pub next_hop: Address,
    pub retransmissions: u32,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
struct BufferState {
    entries: FxHashMap<u16, MaintenanceEntry>,
    /// Entries by deadline. The sequence number keeps keys unique.
    deadlines: BTreeMap<(Instant, u64), u16>,
    seq: u64,
}

impl BufferState {
    fn insert(&mut self, buffered: BufferedFrame, phase: Phase, deadline: Instant) -> Result<(), MaintenanceError> {
        let id = buffered.id;
        if self.entries.contains_key(&id) {
            return Err(MaintenanceError::AlreadyPresent(id));
        }

        let seq = self.seq;
        self.seq += 1;
        self.deadlines.insert((deadline, seq), id);
        self.entries.insert(id, MaintenanceEntry { buffered, phase, retransmissions: 0, deadline, seq });
        Ok(())
    }

    fn remove(&mut self, id: u16) -> Option<MaintenanceEntry> {
        let entry = self.entries.remove(&id)?;
        self.deadlines.remove(&(entry.deadline, entry.seq));
        Some(entry)
    }

    fn reschedule(&mut self, id: u16, deadline: Instant) {
        if let Some(entry) = self.entries.get_mut(&id) {
            self.deadlines.remove(&(entry.deadline, entry.seq));
            entry.deadline = deadline;
            self.deadlines.insert((deadline, entry.seq), id);
        }
    }

    /// Removes every entry sent over `link`. Returns how many were removed.
    fn remove_link(&mut self, link: (Address, Address)) -> usize {
        let ids: Vec<u16> = self.entries.iter().filter(|(_, e)| e.link() == link).map(|(id, _)| *id).collect();
        ids.iter().filter(|id| self.remove(**id).is_some()).count()
    }
}

/// Tracks unicast frames until the next hop acknowledges them, retransmits them and detects
/// broken links.
#[derive(Debug)]
pub struct MaintenanceBuffer {
    state: RwLock<BufferState>,
    config: ConfigHandle,
}

impl MaintenanceBuffer {
    pub fn new(config: ConfigHandle) -> Self {
        Self { state: RwLock::new(BufferState::default()), config }
    }

    /// Buffers a frame that was just transmitted.
    pub fn add(&self, buffered: BufferedFrame, now: Instant) -> Result<(), MaintenanceError> {
        let deadline = now + self.config.load().retransmission_timeout;
        self.state.write().insert(buffered, Phase::Pending, deadline)
    }

    /// Buffers a frame whose first transmission happens after `delay`, then tracks it like
    /// [`Self::add`].
    pub fn add_delayed(&self, buffered: BufferedFrame, delay: Duration, now: Instant) -> Result<(), MaintenanceError> {
        self.state.write().insert(buffered, Phase::Scheduled { tracked: true }, now + delay)
    }

    /// Buffers a frame for a single transmission after `delay`, without acknowledgement
    /// tracking.
    pub fn schedule(&self, buffered: BufferedFrame, delay: Duration, now: Instant) -> Result<(), MaintenanceError> {
        self.state.write().insert(buffered, Phase::Scheduled { tracked: false }, now + delay)
    }

    /// Removes an acknowledged frame.
    pub fn delete(&self, id: u16) -> Result<Frame, MaintenanceError> {
        self.state.write().remove(id).map(|e| e.buffered.frame).ok_or(MaintenanceError::NotFound(id))
    }

    pub fn contains(&self, id: u16) -> bool {
        self.state.read().entries.contains_key(&id)
    }

    /// Treats an overheard source-routed frame as a passive acknowledgement: a buffered frame
    /// with the same originator, destination and route length but more segments left has been
    /// forwarded by the next hop. Matching frames and every other frame on their links are
    /// removed. Returns the number of removed frames.
    pub fn on_overheard_source_route(&self, overheard: &Frame) -> usize {
        let Some((segments_left, hops)) = overheard.source_route() else {
            return 0;
        };

        let mut state = self.state.write();
        let links: Vec<(Address, Address)> = state
            .entries
            .values()
            .filter(|e| e.phase == Phase::Pending)
            .filter(|e| {
                let frame = &e.buffered.frame;
                frame.source == overheard.source &&
                    frame.destination == overheard.destination &&
                    frame
                        .source_route()
                        .is_some_and(|(left, buffered)| buffered.len() == hops.len() && segments_left < left)
            })
            .map(MaintenanceEntry::link)
            .collect();

        let removed: usize = links.into_iter().map(|link| state.remove_link(link)).sum();
        if removed > 0 {
            trace!(removed, "passive acknowledgement");
        }
        removed
    }

    /// Processes every entry whose deadline passed, in deadline order. `metric` confirms
    /// whether an exhausted frame means the link is broken.
    pub fn sweep(&self, now: Instant, metric: &dyn LinkMetric) -> Vec<MaintenanceEvent> {
        let config = self.config.load();
        let timeout = config.retransmission_timeout;
        let max = config.retransmission_count;

        let mut state = self.state.write();
        let due: Vec<u16> = state.deadlines.range(..=(now, u64::MAX)).map(|(_, id)| *id).collect();

        let mut events = Vec::new();
        for id in due {
            // Removed by an earlier link failure in this sweep.
            let Some(entry) = state.entries.get_mut(&id) else { continue };
            let out_iface = entry.buffered.out_iface;
            let next_deadline = entry.deadline + timeout;

            let phase = entry.phase;
            match phase {
                Phase::Scheduled { tracked: true } => {
                    entry.phase = Phase::Pending;
                    events.push(MaintenanceEvent::Transmit { frame: entry.buffered.frame.clone(), out_iface });
                    state.reschedule(id, next_deadline);
                }
                Phase::Scheduled { tracked: false } => {
                    if let Some(entry) = state.remove(id) {
                        events.push(MaintenanceEvent::Transmit { frame: entry.buffered.frame, out_iface });
                    }
                }
                Phase::Pending if entry.retransmissions < max => {
                    entry.retransmissions += 1;
                    let attempt = entry.retransmissions;
                    events.push(MaintenanceEvent::Retransmit { frame: entry.buffered.frame.clone(), out_iface, attempt });
                    state.reschedule(id, next_deadline);
                }
                Phase::Pending => {
                    let Some(entry) = state.remove(id) else { continue };
                    let (out_iface, next_hop) = entry.link();

                    if !metric.confirms_failure(&out_iface, &next_hop) {
                        trace!(id, %next_hop, "frame unacknowledged, link still usable");
                        continue;
                    }

                    let dropped = state.remove_link((out_iface, next_hop));
                    debug!(id, %out_iface, %next_hop, dropped, "link failure");
                    events.push(MaintenanceEvent::LinkFailure(LinkFailure {
                        out_iface,
                        next_hop,
                        frame: entry.buffered.frame,
                        in_iface: entry.buffered.in_iface,
                        dropped,
                    }));
                }
            }
        }

        events
    }

    /// Returns the earliest deadline in the buffer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.read().deadlines.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Returns a copy of every entry, in deadline order.
    pub fn snapshot(&self) -> Vec<MaintenanceRecord> {
        let state = self.state.read();
        state
            .deadlines
            .values()
            .filter_map(|id| state.entries.get(id))
            .map(|e| MaintenanceRecord {
                id: e.buffered.id,
                out_iface: e.buffered.out_iface,
                next_hop: e.buffered.next_hop(),
                retransmissions: e.retransmissions,
                deadline: e.deadline,
            })
            .collect()
    }
}
