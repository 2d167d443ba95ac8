//! Kiln CLI - asset build pipeline for small static sites.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kiln_build::{BuildTask, Kind};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Asset build pipeline for small static sites")]
#[command(version)]
pub struct Cli {
    /// Task to run (defaults to `build`)
    #[command(subcommand)]
    task: Option<Task>,

    /// Path to kiln.toml config file
    #[arg(short, long, default_value = "kiln.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Task {
    /// Alias for build
    Default,

    /// Build every asset kind
    Build,

    /// Rebuild pages
    #[command(name = "build:html")]
    BuildHtml,

    /// Rebuild stylesheets
    #[command(name = "build:css")]
    BuildCss,

    /// Rebuild scripts
    #[command(name = "build:js")]
    BuildJs,

    /// Rebuild images
    #[command(name = "build:images")]
    BuildImages,

    /// Build, then rebuild each kind as its sources change
    #[command(name = "build:watch")]
    BuildWatch,

    /// Build, then audit the site through a public tunnel
    Psi,

    /// Audit the current output through a public tunnel
    #[command(name = "psi-ngrok")]
    PsiNgrok,

    /// Remove the whole output tree
    Clean,

    /// Preview the output tree locally
    Serve {
        /// Do not open browser
        #[arg(long)]
        no_open: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let config = commands::load_config(&cli.config)?;

    match cli.task.unwrap_or(Task::Default) {
        Task::Default | Task::Build => commands::build::run(config, BuildTask::All).await?,
        Task::BuildHtml => commands::build::run(config, BuildTask::Kind(Kind::Html)).await?,
        Task::BuildCss => commands::build::run(config, BuildTask::Kind(Kind::Css)).await?,
        Task::BuildJs => commands::build::run(config, BuildTask::Kind(Kind::Js)).await?,
        Task::BuildImages => {
            commands::build::run(config, BuildTask::Kind(Kind::Images)).await?
        }
        Task::BuildWatch => commands::watch::run(config).await?,
        Task::Psi => {
            commands::build::run(config.clone(), BuildTask::All).await?;
            commands::psi::run(config).await?;
        }
        Task::PsiNgrok => commands::psi::run(config).await?,
        Task::Clean => commands::clean::run(config).await?,
        Task::Serve { no_open } => commands::serve::run(config, !no_open).await?,
    }

    Ok(())
}
