use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use toolbox_host::{HostConfig, Registry};
use tracing::info;

mod builtins;
mod logging;
mod run;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,

    /// Config file (default: <config dir>/toolbox/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every descriptor once and print what was registered
    Check,
    /// Load descriptors, start services and route events read from stdin
    Run {
        /// Publish commands to the remote registration API after loading
        #[arg(long)]
        register: bool,
    },
    /// Write an example config and descriptor directories
    Init,
}

fn config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(HostConfig::config_path()?),
    }
}

fn init(path: &Path) -> anyhow::Result<()> {
    // Never overwrite an existing config file
    if path.exists() {
        anyhow::bail!(
            "Config file already exists at {}. Edit it manually or delete it to create a new one.",
            path.display()
        );
    }

    let config = HostConfig::example();
    config.save(path)?;
    if let Some(base) = path.parent() {
        for root in config.paths.resolved_against(base).roots() {
            std::fs::create_dir_all(&root)?;
        }
    }

    eprintln!("Config file created at: {}", path.display());
    eprintln!("Add descriptor manifests to the category directories next to it.");
    Ok(())
}

/// Build a registry with the builtin handlers and the configured sources
pub(crate) fn build_registry(config: &HostConfig) -> Registry {
    let mut builder = Registry::builder()
        .paths(config.paths.clone())
        .catalog(builtins::catalog())
        .bindings(builtins::bindings(config));
    for name in &config.sources.names {
        builder = builder.source(name.clone(), Default::default());
    }
    builder.build()
}

fn check(config: &HostConfig) -> anyhow::Result<()> {
    let registry = build_registry(config);
    let ok = registry.load();
    registry.stop_services();

    let live = registry.snapshot();
    println!("slash commands:  {}", join(live.slash_commands.keys()));
    println!("beta commands:   {}", join(live.beta_commands.keys()));
    println!("context menus:   {}", join(live.context_menus.keys()));
    println!("text commands:   {}", join(live.text_commands.keys()));
    println!(
        "events:          {}",
        join(live.events.iter().map(|(name, listeners)| format!("{} ({})", name, listeners.len())))
    );
    println!("interactions:    {}", join(live.interactions.keys()));
    println!(
        "services:        {}",
        join(live.services.values().map(|service| format!(
            "{} [{}{}]",
            service.id(),
            service.expression(),
            if service.autostart() { ", autostart" } else { "" }
        )))
    );

    if !ok {
        anyhow::bail!("Failed to load descriptors");
    }
    Ok(())
}

fn join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: std::fmt::Display,
{
    let joined: Vec<String> = items.into_iter().map(|item| item.to_string()).collect();
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined.join(", ")
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let path = config_path(&cli)?;
    if let Commands::Init = cli.command {
        return init(&path);
    }

    let config = HostConfig::load_from(&path)?;
    let _guard = logging::init_logging(config.logging.file, cli.debug)?;
    info!("Using config {}", path.display());

    match cli.command {
        Commands::Check => check(&config),
        Commands::Run { register } => run::run(config, register).await,
        Commands::Init => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
