use dsr_common::{Address, PathError};
use thiserror::Error;

/// Coarse classification of every error the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lookup missed. Expected, and usually triggers route discovery.
    NotFound,
    /// A duplicate insert was rejected.
    AlreadyExists,
    /// A bounded table is full.
    ResourceExhausted,
    /// A received frame is malformed. The frame is dropped.
    ProtocolViolation,
    /// An internal consistency check failed. The frame is dropped.
    Invariant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlacklistError {
    #[error("Neighbor {0} is already blacklisted")]
    AlreadyInList(Address),
    #[error("Neighbor {0} is not blacklisted")]
    NotFound(Address),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteCacheError {
    #[error("No route to {0}")]
    NotFound(Address),
    #[error("Path to {0} is already cached")]
    AlreadyExists(Address),
    #[error("Both route slots for {0} are taken")]
    SlotsFull(Address),
    #[error("Path ends at {actual}, expected {expected}")]
    WrongDestination { expected: Address, actual: Address },
    #[error("Link cache error: {0}")]
    LinkCache(#[from] LinkCacheError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkCacheError {
    #[error("Link cache has no node for {0}")]
    Uninitialized(Address),
    #[error("No path to {0}")]
    NoPath(Address),
    #[error("Link {0} -> {1} already exists")]
    AlreadyExists(Address, Address),
    #[error("No link {0} -> {1}")]
    NoSuchLink(Address, Address),
    #[error("Refusing self loop on {0}")]
    SelfLoop(Address),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaintenanceError {
    #[error("Identification {0} is already in use")]
    AlreadyPresent(u16),
    #[error("No frame with identification {0}")]
    NotFound(u16),
}

/// Top-level error of the routing engine.
#[derive(Debug, Error)]
pub enum DsrError {
    #[error("Blacklist error: {0}")]
    Blacklist(#[from] BlacklistError),
    #[error("Route cache error: {0}")]
    RouteCache(#[from] RouteCacheError),
    #[error("Link cache error: {0}")]
    LinkCache(#[from] LinkCacheError),
    #[error("Maintenance buffer error: {0}")]
    Maintenance(#[from] MaintenanceError),
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] dsr_wire::Error),
    #[error("Transport error: {0:?}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),
    #[error("Invariant violated: {0}")]
    Invariant(&'static str),
}

impl DsrError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Blacklist(BlacklistError::AlreadyInList(_)) |
            Self::RouteCache(RouteCacheError::AlreadyExists(_)) |
            Self::Maintenance(MaintenanceError::AlreadyPresent(_)) => ErrorKind::AlreadyExists,
            Self::LinkCache(e) | Self::RouteCache(RouteCacheError::LinkCache(e)) => e.kind(),
            Self::Blacklist(BlacklistError::NotFound(_)) |
            Self::RouteCache(RouteCacheError::NotFound(_)) |
            Self::Maintenance(MaintenanceError::NotFound(_)) => ErrorKind::NotFound,
            Self::RouteCache(RouteCacheError::SlotsFull(_)) => ErrorKind::ResourceExhausted,
            Self::Wire(_) | Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::RouteCache(RouteCacheError::WrongDestination { .. }) |
            Self::Path(_) |
            Self::Transport(_) |
            Self::Invariant(_) => ErrorKind::Invariant,
        }
    }
}

impl LinkCacheError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Uninitialized(_) | Self::NoPath(_) | Self::NoSuchLink(..) => ErrorKind::NotFound,
            Self::AlreadyExists(..) => ErrorKind::AlreadyExists,
            Self::SelfLoop(_) => ErrorKind::Invariant,
        }
    }
}
