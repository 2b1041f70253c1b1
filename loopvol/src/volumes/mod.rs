//! Volume records and the registry that holds them.
//!
//! - `VolumeRecord` - One managed volume (name, size, mount point, reference count)
//! - `VolumeRegistry` - In-memory map of records behind the driver-wide lock
//! - `constants` - Default size and external tool names

pub(crate) mod config;
pub mod constants;
mod manager;

pub use config::{VolumeRecord, validate_name, validate_size};
pub use manager::{RegistryReadGuard, RegistryWriteGuard, VolumeRegistry};
