//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uipilot::RunConfig;

#[derive(Parser)]
#[command(name = "uipilot")]
#[command(about = "Scripted UI automation for single-page web apps")]
#[command(version)]
pub(crate) struct Cli {
    /// JSON run configuration (timings, site profile, paths)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Execute a plan file
    Run {
        /// JSON array of action records
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Build and execute the create-project plan from a free-text goal
    CreateProject {
        /// e.g. "create a project named Foo"
        #[arg(short, long)]
        goal: String,

        /// App URL the plan starts from
        #[arg(long, default_value = uipilot::goal::DEFAULT_APP_URL)]
        url: String,

        /// Print the plan as JSON instead of running it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
pub(crate) struct Overrides {
    /// Persistent browser profile directory
    #[arg(long, global = true)]
    pub profile: Option<PathBuf>,

    /// Session storage-state file
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Diagnostics output directory
    #[arg(long, global = true)]
    pub captures: Option<PathBuf>,

    /// Run Chrome without a window
    #[arg(long, global = true)]
    pub headless: bool,

    /// Debug port of a Chrome to attach to; 0 disables attaching
    #[arg(long, global = true)]
    pub attach_port: Option<u16>,
}

impl Overrides {
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(dir) = &self.profile {
            config.profile_dir = dir.clone();
        }
        if let Some(file) = &self.state {
            config.state_file = file.clone();
        }
        if let Some(dir) = &self.captures {
            config.capture_dir = dir.clone();
        }
        if self.headless {
            config.browser.headless = true;
        }
        match self.attach_port {
            Some(0) => config.browser.attach_port = None,
            Some(port) => config.browser.attach_port = Some(port),
            None => {}
        }
    }
}
