use std::path::{Path, PathBuf};
use std::{io::Write, str::FromStr};

use chrono::Local;
use clap::Parser;
use eyre::{Context, Result};
use log::LevelFilter;

use chatbridge_models::configuration::Configuration;

/// Terminal chat client for streaming backends.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Command {
    /// Configuration file. When omitted, the first existing candidate of
    /// $XDG_CONFIG_HOME/chatbridge/config.toml,
    /// ~/.config/chatbridge/config.toml and ~/.chatbridge.toml is used.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Command {
    /// Parses the command line and resolves the configuration. Running
    /// without a config file anywhere yields the built-in defaults.
    pub fn get_config() -> Result<Configuration> {
        let cmd = Self::parse();
        match cmd.config.or_else(default_config_path) {
            Some(path) => load_configuration(&path).wrap_err("loading configuration"),
            None => Ok(Configuration::default()),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg).join("chatbridge/config.toml"));
    }
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(&home).join(".config/chatbridge/config.toml"));
        candidates.push(PathBuf::from(&home).join(".chatbridge.toml"));
    }
    candidates.into_iter().find(|path| path.exists())
}

pub fn load_configuration(path: &Path) -> Result<Configuration> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).wrap_err("parsing configuration")
}

pub fn init_logger(config: &Configuration) -> Result<()> {
    let log = &config.log;

    let log_file: Box<dyn std::io::Write + Send + 'static> = if let Some(file) = &log.file {
        Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(file.append)
                .open(&file.path)
                .wrap_err(format!("opening log file {}", file.path))?,
        )
    } else {
        Box::new(std::io::stderr())
    };

    let log_level = LevelFilter::from_str(log.level.as_deref().unwrap_or("info"))?;

    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}/{}:{} {} [{}] - {}",
                record.module_path().unwrap_or("unknown"),
                basename(record.file().unwrap_or("unknown")),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(log_file))
        .filter(None, log_level)
        .try_init()?;

    Ok(())
}

pub fn basename(path: &str) -> String {
    path.split('/').last().unwrap_or(path).to_string()
}
