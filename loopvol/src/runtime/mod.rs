pub mod constants;
pub(crate) mod core;
pub mod layout;
pub(crate) mod lock;
pub mod metrics;
pub mod options;

pub use self::core::VolumeDriver;
pub use layout::FilesystemLayout;
pub use metrics::DriverMetrics;
pub use options::{CreateOptions, DriverOptions};
