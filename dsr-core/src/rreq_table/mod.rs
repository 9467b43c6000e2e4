use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use dsr_common::{constants::MAX_TTL, path::is_link_disjoint, Address};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    config::{ConfigHandle, DsrConfig},
    policy::{DuplicateRule, ReplyArbitration},
};

mod arbitration;
use arbitration::Arbitration;
pub use arbitration::ReplyCandidate;

/// Answer of [`RouteRequestTable::is_discovery_allowed_now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Send a route request with this TTL.
    Proceed { ttl: u8 },
    /// A request is outstanding, wait for its reply.
    Wait,
    /// Every retry went unanswered.
    GaveUp,
}

/// Answer of [`RouteRequestTable::should_forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    /// First copy of the request seen by this node.
    First,
    /// A later copy the duplicate rule lets through.
    Again,
    /// Dropped as a duplicate.
    Suppressed,
}

impl Forwarding {
    pub const fn is_forward(self) -> bool {
        !matches!(self, Self::Suppressed)
    }

    pub const fn is_first(self) -> bool {
        matches!(self, Self::First)
    }
}

/// Work produced by [`RouteRequestTable::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RreqTableAction {
    /// Re-issue the route request for `destination`.
    Retry { destination: Address, ttl: u8 },
    /// Discovery of `destination` was abandoned.
    GaveUp { destination: Address },
    /// Answer the request picked at the end of a reply window.
    Reply(ReplyCandidate),
}

/// A snapshot of the discovery state for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub destination: Address,
    /// Whether a route request is outstanding.
    pub discovering: bool,
    /// Route requests sent in the current discovery.
    pub attempts: u16,
    /// TTL of the last route request.
    pub ttl: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscoveryState {
    Idle,
    Waiting { ttl: u8, deadline: Instant, attempts: u16 },
    GaveUp,
}

/// Discovery throttle for one destination.
#[derive(Debug)]
struct DiscoveryEntry {
    state: DiscoveryState,
    last_used: Instant,
}

impl DiscoveryEntry {
    fn evaluate(&mut self, now: Instant, config: &DsrConfig) -> Discovery {
        self.last_used = now;

        match self.state {
            DiscoveryState::Idle | DiscoveryState::GaveUp => {
                let ttl = next_ttl(None, config.routediscovery_expanding_ring_search);
                self.state = DiscoveryState::Waiting {
                    ttl,
                    deadline: now + backoff(config.routediscovery_timeout, 0),
                    attempts: 1,
                };
                Discovery::Proceed { ttl }
            }
            DiscoveryState::Waiting { deadline, .. } if now < deadline => Discovery::Wait,
            DiscoveryState::Waiting { attempts, .. } if attempts > config.routediscovery_maximum_retries => {
                self.state = DiscoveryState::GaveUp;
                Discovery::GaveUp
            }
            DiscoveryState::Waiting { ttl, attempts, .. } => {
                let ttl = next_ttl(Some(ttl), config.routediscovery_expanding_ring_search);
                self.state = DiscoveryState::Waiting {
                    ttl,
                    deadline: now + backoff(config.routediscovery_timeout, attempts),
                    attempts: attempts + 1,
                };
                Discovery::Proceed { ttl }
            }
        }
    }

    #[inline]
    fn is_due(&self, now: Instant) -> bool {
        matches!(self.state, DiscoveryState::Waiting { deadline, .. } if now >= deadline)
    }
}

/// TTL of the next request. Flooding unless the expanding ring search is on, in which case it
/// goes 1, 2, 4, ... 128, 255.
fn next_ttl(previous: Option<u8>, expanding_ring: bool) -> u8 {
    if !expanding_ring {
        return MAX_TTL;
    }

    match previous {
        None | Some(0) => 1,
        Some(ttl) if ttl >= 128 => MAX_TTL,
        Some(ttl) => ttl * 2,
    }
}

/// `initial * 2^attempts`.
fn backoff(initial: Duration, attempts: u16) -> Duration {
    initial.saturating_mul(1u32 << attempts.min(16))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RequestKey {
    identification: u16,
    target: Address,
}

/// What is known about one route request.
#[derive(Debug)]
struct RequestRecord {
    best_weight: u32,
    /// Previous hops this request was forwarded for.
    neighbors: Vec<Address>,
    /// Routes already answered by this node as target.
    replied: Vec<Vec<Address>>,
    arbitration: Option<Arbitration>,
}

impl RequestRecord {
    fn new(best_weight: u32) -> Self {
        Self { best_weight, neighbors: Vec::new(), replied: Vec::new(), arbitration: None }
    }
}

/// The route requests recently seen from one initiator, oldest first.
#[derive(Debug)]
struct RequestCache {
    records: FxHashMap<RequestKey, RequestRecord>,
    order: VecDeque<RequestKey>,
    last_used: Instant,
}

impl RequestCache {
    fn new(now: Instant) -> Self {
        Self { records: FxHashMap::default(), order: VecDeque::new(), last_used: now }
    }

    /// Returns the record for `key`, creating it and evicting the oldest record beyond
    /// `capacity` if needed.
    fn record(&mut self, key: RequestKey, capacity: usize, init: impl FnOnce() -> RequestRecord) -> (&mut RequestRecord, bool) {
        let created = !self.records.contains_key(&key);
        if created {
            while self.order.len() >= capacity.max(1) {
                if let Some(oldest) = self.order.pop_front() {
                    self.records.remove(&oldest);
                }
            }
            self.order.push_back(key);
        }

        (self.records.entry(key).or_insert_with(init), created)
    }
}

#[derive(Debug, Default)]
struct TableState {
    discoveries: FxHashMap<Address, DiscoveryEntry>,
    requests: FxHashMap<Address, RequestCache>,
}

/// Identifies a route request: who started it, its identification and what it looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId {
    pub initiator: Address,
    pub identification: u16,
    pub target: Address,
}

/// Throttles route discoveries, suppresses duplicate route requests and arbitrates which
/// requests a target answers.
#[derive(Debug)]
pub struct RouteRequestTable {
    state: RwLock<TableState>,
    config: ConfigHandle,
}

impl RouteRequestTable {
    pub fn new(config: ConfigHandle) -> Self {
        Self { state: RwLock::new(TableState::default()), config }
    }

    /// Decides whether a route discovery for `dest` may start now.
    pub fn is_discovery_allowed_now(&self, dest: Address, now: Instant) -> Discovery {
        let config = self.config.load();
        let mut state = self.state.write();
        let entry = state
            .discoveries
            .entry(dest)
            .or_insert_with(|| DiscoveryEntry { state: DiscoveryState::Idle, last_used: now });

        let decision = entry.evaluate(now, &config);
        trace!(%dest, ?decision, "route discovery throttle");
        decision
    }

    /// A reply for `dest` arrived, the next discovery starts from scratch.
    pub fn got_reply(&self, dest: &Address) -> bool {
        match self.state.write().discoveries.get_mut(dest) {
            Some(entry) => {
                entry.state = DiscoveryState::Idle;
                true
            }
            None => false,
        }
    }

    /// Returns true if a discovery for `dest` is waiting for a reply.
    pub fn is_discovering(&self, dest: &Address) -> bool {
        self.state
            .read()
            .discoveries
            .get(dest)
            .is_some_and(|e| matches!(e.state, DiscoveryState::Waiting { .. }))
    }

    /// Returns true if the request was seen before.
    pub fn is_duplicate(&self, id: &RequestId) -> bool {
        let key = RequestKey { identification: id.identification, target: id.target };
        self.state.read().requests.get(&id.initiator).is_some_and(|cache| cache.records.contains_key(&key))
    }

    /// Remembers the request. Returns false if it was already known.
    pub fn record(&self, id: &RequestId, now: Instant) -> bool {
        let capacity = self.config.load().rreq_table.request_table_ids;
        let mut state = self.state.write();
        let cache = state.requests.entry(id.initiator).or_insert_with(|| RequestCache::new(now));
        cache.last_used = now;

        let key = RequestKey { identification: id.identification, target: id.target };
        cache.record(key, capacity, || RequestRecord::new(u32::MAX)).1
    }

    /// Decides whether an intermediate node forwards the request, according to the configured
    /// [`DuplicateRule`]. `weight` is the weight of the request's route including the hop to
    /// this node, `previous_hop` the neighbor it came from.
    ///
    /// Exactly one caller gets [`Forwarding::First`] for a request, however many copies arrive
    /// concurrently.
    pub fn should_forward(&self, id: &RequestId, weight: u32, previous_hop: Address, now: Instant) -> Forwarding {
        let config = self.config.load();
        let mut state = self.state.write();
        let cache = state.requests.entry(id.initiator).or_insert_with(|| RequestCache::new(now));
        cache.last_used = now;

        let key = RequestKey { identification: id.identification, target: id.target };
        let (record, created) =
            cache.record(key, config.rreq_table.request_table_ids, || RequestRecord::new(weight));
        if created {
            if config.duplicate_rule == DuplicateRule::NeighborFanOut {
                record.neighbors.push(previous_hop);
            }
            return Forwarding::First;
        }

        let again = match config.duplicate_rule {
            DuplicateRule::Identification => false,
            DuplicateRule::BetterWeight => {
                if weight < record.best_weight {
                    record.best_weight = weight;
                    true
                } else {
                    false
                }
            }
            DuplicateRule::NeighborFanOut => {
                if record.neighbors.contains(&previous_hop) ||
                    weight > record.best_weight ||
                    record.neighbors.len() >= config.rreq_table.neighbor_list_max_len
                {
                    false
                } else {
                    record.neighbors.push(previous_hop);
                    record.best_weight = weight;
                    true
                }
            }
        };

        if again {
            Forwarding::Again
        } else {
            Forwarding::Suppressed
        }
    }

    /// Decides whether the target answers `candidate` now, according to the configured
    /// [`ReplyArbitration`]. Deferred candidates are answered later through [`Self::run`].
    pub fn arbitrate_reply(&self, target: Address, candidate: ReplyCandidate, now: Instant) -> bool {
        let config = self.config.load();
        let arbitration = config.arbitration;
        if arbitration == ReplyArbitration::Always {
            return true;
        }

        let mut state = self.state.write();
        let cache = state.requests.entry(candidate.initiator).or_insert_with(|| RequestCache::new(now));
        cache.last_used = now;

        let key = RequestKey { identification: candidate.identification, target };
        let weight = candidate.weight();
        let (record, _) = cache.record(key, config.rreq_table.request_table_ids, || RequestRecord::new(weight));

        match arbitration {
            ReplyArbitration::Always => true,
            ReplyArbitration::LinkDisjoint => {
                let route = candidate.addresses();
                if record.replied.iter().all(|replied| is_link_disjoint(&route, replied)) {
                    record.replied.push(route);
                    true
                } else {
                    false
                }
            }
            ReplyArbitration::Deferred(_) => match record.arbitration.as_mut() {
                None => {
                    let deadline = now + config.rreq_table.reply_window;
                    record.arbitration = Some(Arbitration::new(candidate.addresses(), deadline));
                    true
                }
                Some(window) => {
                    if !window.offer(candidate, config.rreq_table.neighbor_list_max_len) {
                        trace!("reply window closed or full");
                    }
                    false
                }
            },
        }
    }

    /// Collects due work: discovery retries, abandoned discoveries and deferred replies.
    pub fn run(&self, now: Instant) -> Vec<RreqTableAction> {
        let config = self.config.load();
        let mut state = self.state.write();
        let mut actions = Vec::new();

        for (dest, entry) in state.discoveries.iter_mut().filter(|(_, e)| e.is_due(now)) {
            match entry.evaluate(now, &config) {
                Discovery::Proceed { ttl } => actions.push(RreqTableAction::Retry { destination: *dest, ttl }),
                Discovery::GaveUp => {
                    entry.state = DiscoveryState::Idle;
                    actions.push(RreqTableAction::GaveUp { destination: *dest });
                }
                Discovery::Wait => {}
            }
        }

        if let ReplyArbitration::Deferred(selection) = config.arbitration {
            for cache in state.requests.values_mut() {
                for record in cache.records.values_mut() {
                    let Some(window) = record.arbitration.as_mut().filter(|w| w.is_due(now)) else {
                        continue;
                    };
                    if let Some(candidate) = window.close(selection) {
                        actions.push(RreqTableAction::Reply(candidate));
                    }
                }
            }
        }

        actions
    }

    /// Evicts discoveries and request caches unused for the configured cleanup interval.
    pub fn cleanup(&self, now: Instant) -> usize {
        let max_idle = self.config.load().rreq_table.cleanup_interval;
        let mut state = self.state.write();
        let before = state.discoveries.len() + state.requests.len();

        state.discoveries.retain(|_, e| now.saturating_duration_since(e.last_used) < max_idle);
        state.requests.retain(|_, c| now.saturating_duration_since(c.last_used) < max_idle);

        let evicted = before - state.discoveries.len() - state.requests.len();
        if evicted > 0 {
            debug!(evicted, "cleaned up route request table");
        }
        evicted
    }

    /// Number of destinations with discovery state.
    pub fn discoveries(&self) -> usize {
        self.state.read().discoveries.len()
    }

    /// Discovery state per destination, ordered by address.
    pub fn snapshot(&self) -> Vec<DiscoveryRecord> {
        let state = self.state.read();
        let mut records: Vec<_> = state
            .discoveries
            .iter()
            .map(|(dest, entry)| {
                let (discovering, attempts, ttl) = match entry.state {
                    DiscoveryState::Waiting { ttl, attempts, .. } => (true, attempts, ttl),
                    DiscoveryState::Idle | DiscoveryState::GaveUp => (false, 0, 0),
                };
                DiscoveryRecord { destination: *dest, discovering, attempts, ttl }
            })
            .collect();
        records.sort_by_key(|r| r.destination);
        records
    }

    /// Number of requests remembered for `initiator`.
    pub fn requests_from(&self, initiator: &Address) -> usize {
        self.state.read().requests.get(initiator).map_or(0, |cache| cache.records.len())
    }
}
