//! Command-line front end for the volume driver.
//!
//! Each invocation opens the driver, runs one operation and prints the result
//! as JSON. Reference counts live only inside one process, so `mount` and
//! `unmount` here are diagnostic helpers rather than a consumer protocol.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use loopvol::runtime::constants::envs;
use loopvol::{
    CreateOptions, DriverOptions, FilesystemLayout, VolumeDriver, init_logging_with_console,
};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "loopvol", version, about = "Manage loopback-file-backed ext4 volumes")]
struct Cli {
    /// Driver root directory.
    #[arg(long, env = envs::LOOPVOL_ROOT)]
    root: Option<PathBuf>,

    /// Snapshot path (relative paths resolve under the root).
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Size used when `create` gets no `--size`.
    #[arg(long)]
    default_size: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create and format a volume
    Create {
        name: String,
        #[arg(long)]
        size: Option<String>,
    },
    /// Remove an unused volume
    Remove { name: String },
    /// Mount a volume and print its mount point
    Mount { name: String },
    /// Drop one reference to a volume
    Unmount { name: String },
    /// Print a volume's mount point
    Path { name: String },
    /// Show one volume
    Get { name: String },
    /// List all volumes
    List,
    /// Show driver capabilities
    Capabilities,
}

impl Cli {
    fn driver_options(&self) -> DriverOptions {
        let mut options = DriverOptions::default();
        if let Some(root) = &self.root {
            options.root_dir = root.clone();
        }
        if let Some(state_file) = &self.state_file {
            options.state_file = state_file.clone();
        }
        if let Some(size) = &self.default_size {
            options.default_size = size.clone();
        }
        options
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let options = cli.driver_options();

    let layout = FilesystemLayout::new(options.root_dir.clone(), &options.state_file);
    layout
        .prepare()
        .with_context(|| format!("preparing root {}", options.root_dir.display()))?;
    init_logging_with_console(&layout)?;

    let driver = VolumeDriver::from_layout(options, layout)?;

    let output = match cli.command {
        Command::Create { name, size } => {
            driver.create(&name, CreateOptions { size }).await?;
            json!({ "Name": name })
        }
        Command::Remove { name } => {
            driver.remove(&name).await?;
            json!({ "Name": name })
        }
        Command::Mount { name } => {
            let mountpoint = driver.mount(&name).await?;
            json!({ "Mountpoint": mountpoint })
        }
        Command::Unmount { name } => {
            driver.unmount(&name).await?;
            json!({ "Name": name })
        }
        Command::Path { name } => {
            let mountpoint = driver.path(&name).await?;
            json!({ "Mountpoint": mountpoint })
        }
        Command::Get { name } => json!({ "Volume": driver.get(&name).await? }),
        Command::List => json!({ "Volumes": driver.list().await? }),
        Command::Capabilities => json!({ "Capabilities": driver.capabilities() }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
