use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

use rma_agent::config::WarnLevel;
use rma_agent::RuntimeConfig;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate an agent runtime config for common mistakes
    Check {
        /// YAML file to check (default: the built-in config)
        #[arg(env = "AGENT_RUNTIME_CONFIG")]
        path: Option<PathBuf>,
    },

    /// Print the effective agent runtime config as YAML
    Show {
        #[arg(env = "AGENT_RUNTIME_CONFIG")]
        path: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Check { path } => check(path),
        ConfigSubcommand::Show { path } => show(path),
    }
}

fn load(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(p) => RuntimeConfig::load(p)
            .with_context(|| format!("failed to load runtime config {}", p.display()))?,
        None => RuntimeConfig::builtin()?,
    };
    Ok(config)
}

fn check(path: Option<PathBuf>) -> Result<()> {
    let config = load(path.as_ref())?;
    let source = path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in".to_string());

    let warnings = config.validate();
    let mut errors = 0;
    for w in &warnings {
        let tag = match w.level {
            WarnLevel::Error => {
                errors += 1;
                "error"
            }
            WarnLevel::Warning => "warning",
        };
        println!("[{tag}] {}", w.message);
    }

    if errors > 0 {
        bail!("{source}: {errors} error(s) in runtime config");
    }
    let names: Vec<&str> = config.agents.iter().map(|a| a.agent_name.as_str()).collect();
    println!("{source}: ok ({} agents: {})", names.len(), names.join(", "));
    Ok(())
}

fn show(path: Option<PathBuf>) -> Result<()> {
    let config = load(path.as_ref())?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
