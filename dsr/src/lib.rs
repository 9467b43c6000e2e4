#![doc(issue_tracker_base_url = "https://github.com/chainbound/dsr-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use dsr_common::{constants, path, Address, IdentificationCounter, Path};
pub use dsr_core::*;
pub use dsr_transport::*;
pub use dsr_wire::{codec, DsrOption, Frame, Hop, OptionType};
