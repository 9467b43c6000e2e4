use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;

use crate::policy::{
    CacheMode, CandidateSelection, DualSlotOrder, DuplicateRule, LookupPolicy, ProtocolVariant,
    ReplyArbitration, RetentionPolicy,
};

/// Blacklist timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistConfig {
    /// How often the blacklist is swept.
    pub cleanup_interval: Duration,
    /// Age after which a probable entry is demoted to questionable.
    pub revert_to_questionable: Duration,
    /// Age after which a questionable entry is forgotten.
    pub expiration: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(10),
            revert_to_questionable: Duration::from_secs(60),
            expiration: Duration::from_secs(120),
        }
    }
}

/// Route request table sizing and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RreqTableConfig {
    /// Number of route request identifications remembered per initiator.
    pub request_table_ids: usize,
    /// Entries unused for this long are evicted.
    pub cleanup_interval: Duration,
    /// Maximum number of distinct previous hops tracked per request.
    pub neighbor_list_max_len: usize,
    /// How long a target collects further requests before picking a secondary route.
    pub reply_window: Duration,
}

impl Default for RreqTableConfig {
    fn default() -> Self {
        Self {
            request_table_ids: 32,
            cleanup_interval: Duration::from_secs(60),
            neighbor_list_max_len: 30,
            reply_window: Duration::from_secs(1),
        }
    }
}

/// Configuration of a DSR node.
#[derive(Debug, Clone, PartialEq)]
pub struct DsrConfig {
    pub variant: ProtocolVariant,
    pub cache_mode: CacheMode,
    pub lookup: LookupPolicy,
    pub retention: RetentionPolicy,
    pub duplicate_rule: DuplicateRule,
    pub arbitration: ReplyArbitration,
    /// Number of retransmissions before a link is declared broken.
    pub retransmission_count: u32,
    /// Time between retransmissions of an unacknowledged frame.
    pub retransmission_timeout: Duration,
    /// How long a packet waits in the send buffer for a route.
    pub sendbuffer_timeout: Duration,
    pub sendbuffer_cleanup_interval: Duration,
    /// Spacing between the frames of a send buffer flush.
    pub sendbuffer_flush_step: Duration,
    /// Initial time to wait for a route reply. Doubles with every retry.
    pub routediscovery_timeout: Duration,
    pub routediscovery_maximum_retries: u16,
    /// Start discoveries with a TTL of 1 and double it on each retry.
    pub routediscovery_expanding_ring_search: bool,
    /// Accept overheard forwarding as an acknowledgement.
    pub routemaintenance_passive_ack: bool,
    /// Ask the next hop for an explicit acknowledgement.
    pub routemaintenance_network_ack: bool,
    pub blacklist: BlacklistConfig,
    pub rreq_table: RreqTableConfig,
    /// How often unreferenced link cache nodes are collected.
    pub link_cache_sweep_interval: Duration,
    /// Maximum number of addresses in a route.
    pub max_route_len: usize,
}

impl Default for DsrConfig {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::Dsr,
            cache_mode: CacheMode::Path,
            lookup: LookupPolicy::First,
            retention: RetentionPolicy::default(),
            duplicate_rule: DuplicateRule::Identification,
            arbitration: ReplyArbitration::Always,
            retransmission_count: 2,
            retransmission_timeout: Duration::from_millis(50),
            sendbuffer_timeout: Duration::from_secs(20),
            sendbuffer_cleanup_interval: Duration::from_secs(1),
            sendbuffer_flush_step: Duration::from_millis(1),
            routediscovery_timeout: Duration::from_secs(1),
            routediscovery_maximum_retries: 3,
            routediscovery_expanding_ring_search: false,
            routemaintenance_passive_ack: false,
            routemaintenance_network_ack: false,
            blacklist: BlacklistConfig::default(),
            rreq_table: RreqTableConfig::default(),
            link_cache_sweep_interval: Duration::from_secs(4),
            max_route_len: dsr_common::constants::MAX_ROUTE_LEN,
        }
    }
}

impl DsrConfig {
    /// Returns the default configuration with the policies of the given protocol variant.
    ///
    /// The preset does not choose the link metric. A [`ProtocolVariant::EtxDsr`] router needs
    /// an [`Etx`](crate::Etx) metric passed to [`RouterBuilder::metric`](crate::RouterBuilder::metric),
    /// otherwise it runs over hop count.
    pub fn for_variant(variant: ProtocolVariant) -> Self {
        let base = Self { variant, ..Default::default() };

        match variant {
            ProtocolVariant::Dsr => base,
            ProtocolVariant::EtxDsr => Self { duplicate_rule: DuplicateRule::BetterWeight, ..base },
            ProtocolVariant::Mdsr => Self {
                retention: RetentionPolicy::InsertionOrder { keep: 2 },
                arbitration: ReplyArbitration::LinkDisjoint,
                ..base
            },
            ProtocolVariant::Smr | ProtocolVariant::BackupPathV2 => Self {
                retention: RetentionPolicy::DualSlot { order: DualSlotOrder::Append },
                duplicate_rule: DuplicateRule::NeighborFanOut,
                arbitration: ReplyArbitration::Deferred(CandidateSelection::MaximallyDisjoint),
                ..base
            },
            ProtocolVariant::BackupPathV1 => Self {
                retention: RetentionPolicy::DualSlot { order: DualSlotOrder::SecondFirst },
                duplicate_rule: DuplicateRule::NeighborFanOut,
                arbitration: ReplyArbitration::Deferred(CandidateSelection::MinimalWeight),
                ..base
            },
        }
    }

    /// Sets the cache mode.
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Sets the lookup policy.
    pub fn with_lookup(mut self, lookup: LookupPolicy) -> Self {
        self.lookup = lookup;
        self
    }

    /// Sets the route cache retention policy.
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the number of retransmissions and the time between them.
    pub fn with_retransmissions(mut self, count: u32, timeout: Duration) -> Self {
        self.retransmission_count = count;
        self.retransmission_timeout = timeout;
        self
    }

    /// Sets the initial route discovery timeout and the number of retries.
    pub fn with_route_discovery(mut self, timeout: Duration, max_retries: u16) -> Self {
        self.routediscovery_timeout = timeout;
        self.routediscovery_maximum_retries = max_retries;
        self
    }

    /// Enables or disables the expanding ring search.
    pub fn with_expanding_ring_search(mut self, enabled: bool) -> Self {
        self.routediscovery_expanding_ring_search = enabled;
        self
    }

    /// Enables or disables passive acknowledgements.
    pub fn with_passive_ack(mut self, enabled: bool) -> Self {
        self.routemaintenance_passive_ack = enabled;
        self
    }

    /// Enables or disables network-layer acknowledgements.
    pub fn with_network_ack(mut self, enabled: bool) -> Self {
        self.routemaintenance_network_ack = enabled;
        self
    }

    /// Sets the send buffer timeout.
    pub fn with_sendbuffer_timeout(mut self, timeout: Duration) -> Self {
        self.sendbuffer_timeout = timeout;
        self
    }

    /// Sets the blacklist timing.
    pub fn with_blacklist(mut self, blacklist: BlacklistConfig) -> Self {
        self.blacklist = blacklist;
        self
    }

    /// Sets the route request table sizing and timing.
    pub fn with_rreq_table(mut self, rreq_table: RreqTableConfig) -> Self {
        self.rreq_table = rreq_table;
        self
    }
}

/// A shared, hot-swappable [`DsrConfig`].
///
/// Every table holds a clone and loads the current configuration at the start of each
/// operation, so a [`store`](Self::store) takes effect on the next call.
#[derive(Debug, Clone)]
pub struct ConfigHandle(Arc<ArcSwap<DsrConfig>>);

impl ConfigHandle {
    pub fn new(config: DsrConfig) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(config)))
    }

    /// Returns the current configuration.
    #[inline]
    pub fn load(&self) -> Arc<DsrConfig> {
        self.0.load_full()
    }

    /// Replaces the configuration.
    pub fn store(&self, config: DsrConfig) {
        self.0.store(Arc::new(config));
    }

    /// Replaces the configuration with a modified copy of the current one.
    pub fn update(&self, f: impl Fn(&mut DsrConfig)) {
        self.0.rcu(|current| {
            let mut next = DsrConfig::clone(current);
            f(&mut next);
            next
        });
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(DsrConfig::default())
    }
}

impl From<DsrConfig> for ConfigHandle {
    fn from(config: DsrConfig) -> Self {
        Self::new(config)
    }
}
