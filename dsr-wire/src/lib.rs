//! The DSR frame model and its binary encoding.

mod frame;
pub use frame::{DsrOption, Frame, Hop, OptionType};

pub mod codec;
pub use codec::{Codec, Error};
