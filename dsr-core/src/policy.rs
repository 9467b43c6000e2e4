//! Runtime-selectable protocol policies.

/// The protocol flavours this engine can run. Each one is a preset over the policies below, see
/// [`DsrConfig::for_variant`](crate::DsrConfig::for_variant). The link metric is not part of the
/// preset, it is handed to [`RouterBuilder::metric`](crate::RouterBuilder::metric).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVariant {
    /// Plain DSR with a single best route per destination.
    #[default]
    Dsr,
    /// DSR over the ETX metric. Route requests are only forwarded when they improve on the best
    /// weight seen so far.
    EtxDsr,
    /// Multi-path DSR: the target answers every link-disjoint route request.
    Mdsr,
    /// Split multi-path routing: a fast primary route and a maximally disjoint secondary one.
    Smr,
    /// Backup path routing, secondary route chosen by weight and stored in front.
    BackupPathV1,
    /// Backup path routing, secondary route chosen by disjointness.
    BackupPathV2,
}

impl ProtocolVariant {
    /// Returns true if the variant is meant to run over a volatile metric such as
    /// [`Etx`](crate::Etx).
    pub const fn needs_volatile_metric(self) -> bool {
        matches!(self, Self::EtxDsr)
    }
}

/// Where discovered routes are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Whole paths per destination.
    #[default]
    Path,
    /// A shared link graph from which paths are computed.
    Link,
}

/// How a route is picked among the stored paths of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupPolicy {
    /// The most preferred path.
    #[default]
    First,
    /// Rotate through the stored paths on every lookup.
    RoundRobin,
}

/// Which paths a destination keeps when a new one is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Kept sorted by preference. When `keep` is set, the least preferred paths are dropped.
    Sorted { keep: Option<usize> },
    /// Kept in arrival order. When full, the oldest path is evicted.
    InsertionOrder { keep: usize },
    /// Two slots, further paths are refused.
    DualSlot { order: DualSlotOrder },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Sorted { keep: Some(1) }
    }
}

/// Placement of the second path in a [`RetentionPolicy::DualSlot`] cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DualSlotOrder {
    /// The second path goes behind the first.
    Append,
    /// The second path goes in front of the first.
    SecondFirst,
}

/// The rule an intermediate node uses to decide whether to forward a route request it has not
/// seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateRule {
    /// Forward each `(initiator, identification, target)` once.
    #[default]
    Identification,
    /// Forward only requests that strictly improve on the best weight seen.
    BetterWeight,
    /// Forward once per distinct previous hop, as long as the weight does not get worse.
    NeighborFanOut,
}

/// How a target answers the route requests it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyArbitration {
    /// Answer every request.
    #[default]
    Always,
    /// Answer a request only if its route is link-disjoint from every route already answered.
    LinkDisjoint,
    /// Answer the first request at once, collect the others during the reply window and then
    /// answer exactly one of them.
    Deferred(CandidateSelection),
}

/// Selection among the route requests collected during a deferred reply window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSelection {
    /// Fewest nodes in common with the first route, then fewest links, then lowest weight,
    /// then fewest hops.
    MaximallyDisjoint,
    /// Lowest weight, then fewest hops.
    MinimalWeight,
}
