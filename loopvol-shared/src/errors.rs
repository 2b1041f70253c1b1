//! Error type shared by the driver and its transports.

use thiserror::Error;

/// Result alias used across loopvol crates.
pub type LoopvolResult<T> = Result<T, LoopvolError>;

/// Errors surfaced by volume lifecycle operations.
///
/// Transports render these with `Display`; the message is what the caller of
/// a plugin request sees.
#[derive(Debug, Error)]
pub enum LoopvolError {
    /// Operation on a volume name that is not registered.
    #[error("volume {0} not found")]
    NotFound(String),

    /// Volume still has active consumers.
    #[error("volume {name} is currently used by {connections} consumer(s)")]
    InUse { name: String, connections: u32 },

    /// External command exited non-zero or could not be spawned.
    #[error("{command} failed: {output}")]
    ToolFailure { command: String, output: String },

    /// Filesystem create/delete/stat failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Snapshot could not be written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Startup failure: bad snapshot, bad root directory, or root already in use.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Invalid volume name, size, or option.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LoopvolError {
    /// Build a tool failure from a program name, its arguments and output text.
    pub fn tool(program: &str, args: &[String], output: impl Into<String>) -> Self {
        let command = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        LoopvolError::ToolFailure {
            command,
            output: output.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LoopvolError::NotFound(_))
    }

    pub fn is_in_use(&self) -> bool {
        matches!(self, LoopvolError::InUse { .. })
    }
}
