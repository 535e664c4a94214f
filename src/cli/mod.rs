use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::ConfigLoader;
use crate::storage;

pub mod commands;

use self::commands::{
    ControlArgs, EvidenceArgs, FrameworkArgs, PeopleArgs, PolicyArgs, TaskArgs, VendorArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "complytui",
    version,
    about = "Keyboard-first console for compliance registers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over COMPLYTUI_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over COMPLYTUI_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive console (default)
    Tui,
    /// Manage compliance frameworks
    Framework(FrameworkArgs),
    /// Manage controls within a framework
    Control(ControlArgs),
    /// Manage control tasks
    Task(TaskArgs),
    /// Manage organization policies
    Policy(PolicyArgs),
    /// Manage third-party vendors
    Vendor(VendorArgs),
    /// Manage organization members
    People(PeopleArgs),
    /// Manage evidence files attached to tasks
    Evidence(EvidenceArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("COMPLYTUI_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("COMPLYTUI_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;

    let config = Arc::new(config);
    let command = cli.command.unwrap_or(Commands::Tui);
    match command {
        Commands::Tui => {
            let mut app = App::new(config.clone(), storage.clone())?;
            commands::run_tui(&mut app)
        }
        Commands::Framework(args) => commands::handle_framework(&storage, args),
        Commands::Control(args) => commands::handle_control(&storage, args),
        Commands::Task(args) => commands::handle_task(&storage, args),
        Commands::Policy(args) => commands::handle_policy(config, &storage, args),
        Commands::Vendor(args) => commands::handle_vendor(&storage, args),
        Commands::People(args) => commands::handle_people(&storage, args),
        Commands::Evidence(args) => commands::handle_evidence(&storage, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
