//! Types shared between the loopvol driver and the transports that expose it.

pub mod errors;
pub mod types;

pub use errors::{LoopvolError, LoopvolResult};
pub use types::{Capabilities, Scope, VolumeInfo};
