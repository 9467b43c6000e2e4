//! The routing engine of a Dynamic Source Routing (RFC 4728) node.
//!
//! A node keeps five tables, each behind its own lock:
//!
//! - [`Blacklist`]: neighbors suspected of sitting behind a unidirectional link.
//! - [`RouteCache`]: discovered routes, either as whole paths or as a [`LinkCache`] graph.
//! - [`RouteRequestTable`]: discovery throttling, duplicate request suppression and reply
//!   arbitration.
//! - [`MaintenanceBuffer`]: unacknowledged frames, retransmissions and link failure detection.
//! - [`SendBuffer`]: packets waiting for a route.
//!
//! The [`Router`] ties them together and handles every frame. Tables never call into each other;
//! the router acquires at most one table lock at a time.

pub mod blacklist;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod metric;
pub mod policy;
pub mod route_cache;
pub mod rreq_table;
pub mod send_buffer;

mod driver;
mod router;
mod stats;

pub use blacklist::{Blacklist, BlacklistRecord, BlacklistSweep, LinkState};
pub use config::{BlacklistConfig, ConfigHandle, DsrConfig, RreqTableConfig};
pub use driver::{Driver, DriverHandle};
pub use error::{
    BlacklistError, DsrError, ErrorKind, LinkCacheError, MaintenanceError, RouteCacheError,
};
pub use maintenance::{BufferedFrame, LinkFailure, MaintenanceBuffer, MaintenanceEvent, MaintenanceRecord};
pub use metric::{Etx, EtxEstimator, HopCount, LinkMetric, StaticEtx};
pub use policy::{
    CacheMode, CandidateSelection, DualSlotOrder, DuplicateRule, LookupPolicy, ProtocolVariant,
    ReplyArbitration, RetentionPolicy,
};
pub use route_cache::{LinkCache, LinkChange, LinkRecord, RouteCache, RouteRecord};
pub use router::{Router, RouterBuilder};
pub use rreq_table::{Discovery, DiscoveryRecord, Forwarding, ReplyCandidate, RequestId, RouteRequestTable, RreqTableAction};
pub use send_buffer::{SendBuffer, SendBufferRecord};
pub use stats::RouterStats;
