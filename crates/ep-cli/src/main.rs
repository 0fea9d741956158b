//! echpilot CLI
//!
//! Terminal front-end for the tunnel client:
//! - Connect with a profile and supervise the tunnel core
//! - Pick the best relay endpoint, or probe a single one
//! - Manage profiles and configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ep_cli::commands;
use ep_core::config;

#[derive(Parser)]
#[command(name = "echpilot")]
#[command(author, version, about = "ECH tunnel client with latency-based endpoint selection")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "ECHPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the profile store
    #[arg(long, global = true, env = "ECHPILOT_PROFILES")]
    profiles: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tunnel core and stay connected until interrupted
    #[command(alias = "up")]
    Connect {
        /// Profile id or name (defaults to the current profile)
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Measure candidate endpoints and report the best one
    Select {
        /// Endpoint list file, one per line (defaults to the current profile's list)
        file: Option<PathBuf>,
    },

    /// Measure TCP connect latency to one endpoint
    Probe {
        /// Host or host:port
        target: String,

        /// Port used when the target has none
        #[arg(short, long, default_value_t = 443)]
        port: u16,

        /// Timeout in seconds
        #[arg(short, long, default_value_t = 2.0)]
        timeout: f64,
    },

    /// Manage connection profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List profiles
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a profile (defaults to the current one)
    Show {
        /// Profile id or name
        profile: Option<String>,
    },
    /// Make a profile current
    Use {
        /// Profile id or name
        profile: String,
    },
    /// Copy the current profile under a new name
    Add {
        /// Name for the new profile
        name: String,
    },
    /// Remove the current profile
    #[command(alias = "rm")]
    Remove,
    /// Rename the current profile
    Rename {
        /// New name
        name: String,
    },
    /// Set a field of the current profile
    Set {
        /// Field: name, server, listen, token, ip_list, routing, auto_best
        field: String,
        /// New value
        value: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Show the current configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Get a configuration value
    Get {
        /// Dotted key, e.g. selector.top_n
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Dotted key, e.g. selector.top_n
        key: String,
        /// New value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let profiles_path = cli
        .profiles
        .clone()
        .unwrap_or_else(config::default_profiles_path);

    match cli.command {
        Commands::Connect { profile } => {
            let app_config = commands::load_app_config(cli.config.as_ref())?;
            commands::connect_command(&app_config, &profiles_path, profile.as_deref()).await?;
        }

        Commands::Select { file } => {
            let app_config = commands::load_app_config(cli.config.as_ref())?;
            commands::select_command(&app_config, &profiles_path, file.as_ref()).await?;
        }

        Commands::Probe {
            target,
            port,
            timeout,
        } => {
            let timeout = Duration::try_from_secs_f64(timeout)
                .map_err(|e| anyhow::anyhow!("Invalid timeout {}: {}", timeout, e))?;
            if !commands::probe_command(&target, port, timeout).await? {
                std::process::exit(1);
            }
        }

        Commands::Profile { action } => match action {
            ProfileAction::List { json } => commands::profile_list(&profiles_path, json)?,
            ProfileAction::Show { profile } => {
                commands::profile_show(&profiles_path, profile.as_deref())?
            }
            ProfileAction::Use { profile } => commands::profile_use(&profiles_path, &profile)?,
            ProfileAction::Add { name } => commands::profile_add(&profiles_path, &name)?,
            ProfileAction::Remove => commands::profile_remove(&profiles_path)?,
            ProfileAction::Rename { name } => commands::profile_rename(&profiles_path, &name)?,
            ProfileAction::Set { field, value } => {
                commands::profile_set(&profiles_path, &field, &value)?
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Path => commands::config_path(cli.config.as_ref())?,
            ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
            ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force)?,
            ConfigAction::Get { key } => commands::config_get(cli.config.as_ref(), &key)?,
            ConfigAction::Set { key, value } => {
                commands::config_set(cli.config.as_ref(), &key, &value)?
            }
        },
    }

    Ok(())
}
