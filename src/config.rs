//! Application configuration: environment variables layered over an optional
//! `.toml` file, parsed with `clap` so the binary also accepts CLI flags.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::CoreError;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "betterbot", about = "Prediction-market trading control plane")]
pub struct Cli {
    /// Path to an optional TOML config file layered under environment variables.
    #[arg(long, env = "BETTERBOT_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "BETTERBOT_DB_PATH", default_value = "./betterbot.db")]
    pub database_path: String,

    #[arg(long, env = "BETTERBOT_BANKROLL", default_value_t = 10_000.0)]
    pub default_bankroll: f64,

    #[arg(long, env = "BETTERBOT_KELLY_FRACTION", default_value_t = 0.25)]
    pub default_kelly_fraction: f64,

    #[arg(long, env = "BETTERBOT_DRY_RUN", default_value_t = true)]
    pub dry_run: bool,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

/// Optional `.toml` overlay. Every field is optional; only what's present
/// overrides the environment-derived default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub database_path: Option<String>,
    pub default_bankroll: Option<f64>,
    pub default_kelly_fraction: Option<f64>,
    pub dry_run: Option<bool>,
}

/// The assembled runtime configuration used throughout the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub default_bankroll: f64,
    pub default_kelly_fraction: f64,
    pub dry_run: bool,
    pub log_filter: String,
}

impl Config {
    /// Loads `.env`, parses CLI/env args, then layers an optional TOML file
    /// on top of them (file values win over CLI/env defaults, matching the
    /// "environment variables plus an optional layered .toml file" contract).
    pub fn load() -> Result<Self, CoreError> {
        dotenv::dotenv().ok();
        let cli = <Cli as clap::Parser>::parse();
        Self::from_cli(cli)
    }

    pub fn from_cli(cli: Cli) -> Result<Self, CoreError> {
        let mut config = Config {
            database_path: cli.database_path,
            default_bankroll: cli.default_bankroll,
            default_kelly_fraction: cli.default_kelly_fraction,
            dry_run: cli.dry_run,
            log_filter: cli.log_filter,
        };

        if let Some(path) = cli.config {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                CoreError::Invalid(format!("cannot read config file {}: {e}", path.display()))
            })?;
            let file: FileConfig = toml::from_str(&contents)
                .map_err(|e| CoreError::Invalid(format!("invalid config file: {e}")))?;

            if let Some(v) = file.database_path {
                config.database_path = v;
            }
            if let Some(v) = file.default_bankroll {
                config.default_bankroll = v;
            }
            if let Some(v) = file.default_kelly_fraction {
                config.default_kelly_fraction = v;
            }
            if let Some(v) = file.dry_run {
                config.dry_run = v;
            }
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./betterbot.db".to_string(),
            default_bankroll: 10_000.0,
            default_kelly_fraction: 0.25,
            dry_run: true,
            log_filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overlay_wins_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("betterbot.toml");
        std::fs::write(&path, "default_bankroll = 5000.0\ndry_run = false\n").unwrap();

        let cli = Cli {
            config: Some(path),
            database_path: "./betterbot.db".into(),
            default_bankroll: 10_000.0,
            default_kelly_fraction: 0.25,
            dry_run: true,
            log_filter: "info".into(),
        };

        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.default_bankroll, 5000.0);
        assert!(!config.dry_run);
        assert_eq!(config.default_kelly_fraction, 0.25);
    }

    #[test]
    fn missing_file_field_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("betterbot.toml");
        std::fs::write(&path, "dry_run = false\n").unwrap();

        let cli = Cli {
            config: Some(path),
            database_path: "./betterbot.db".into(),
            default_bankroll: 10_000.0,
            default_kelly_fraction: 0.25,
            dry_run: true,
            log_filter: "info".into(),
        };

        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.default_bankroll, 10_000.0);
        assert!(!config.dry_run);
    }
}
