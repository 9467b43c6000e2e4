//! Types shared by every dsr crate: node addresses, weighted paths and identification counters.

mod address;
pub use address::{Address, AddressParseError};

mod ident;
pub use ident::IdentificationCounter;

pub mod path;
pub use path::{Path, PathError};

pub mod constants {
    /// Weight of a single hop under the hop-count metric.
    pub const HOP_COUNT_WEIGHT: u16 = 100;
    /// Time-to-live that floods a route request through the whole network.
    pub const MAX_TTL: u8 = 255;
    /// Maximum number of addresses a route request or source route may carry.
    pub const MAX_ROUTE_LEN: usize = 32;
}
