mod process;

pub use process::{SystemToolRunner, ToolRunner};

#[cfg(test)]
pub(crate) use process::fake;
