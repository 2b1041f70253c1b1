//! External command invocation.
//!
//! The driver never spawns processes directly; it goes through a
//! [`ToolRunner`] so tests can substitute a recording fake.

use async_trait::async_trait;
use loopvol_shared::{LoopvolError, LoopvolResult};
use std::process::Stdio;
use tokio::process::Command;

/// Capability to run an external command to completion.
///
/// Returns the combined stdout/stderr text on success. A non-zero exit, or a
/// failure to spawn, is reported as [`LoopvolError::ToolFailure`] carrying
/// the command line and its output.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> LoopvolResult<String>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, program: &str, args: &[String]) -> LoopvolResult<String> {
        tracing::debug!(command = program, args = ?args, "Running external command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| LoopvolError::tool(program, args, format!("failed to spawn: {}", e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let text = combined.trim();
            let detail = if text.is_empty() {
                output.status.to_string()
            } else {
                format!("{} ({})", output.status, text)
            };
            return Err(LoopvolError::tool(program, args, detail));
        }

        tracing::trace!(command = program, output = %combined.trim(), "External command finished");
        Ok(combined)
    }
}
