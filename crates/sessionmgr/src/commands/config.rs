//! Config command - inspect and initialize configuration.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use sessionmgr_config::{self, SessionmgrConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Write the effective configuration to a config file
    Init {
        /// Destination (defaults to the user config file)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the user config file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(&ctx.config),
        ConfigCommand::Init { path, force } => cmd_init(&ctx.config, path, force),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(config: &SessionmgrConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_init(config: &SessionmgrConfig, path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => sessionmgr_config::xdg_config_path()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?,
    };

    if path.exists() && !force {
        println!("Config file already exists: {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    sessionmgr_config::save_config(config, &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_path() -> Result<()> {
    match sessionmgr_config::xdg_config_path() {
        Some(path) => println!("{}", path.display()),
        None => println!("Could not determine config directory"),
    }
    Ok(())
}
