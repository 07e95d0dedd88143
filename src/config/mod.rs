//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU64, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::DEFAULT_EXPIRES_IN_SECS;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "dashcache";
const ENV_PREFIX: &str = "DASHCACHE";

/// Command-line arguments for the dashcache binary.
#[derive(Debug, Parser)]
#[command(name = "dashcache", version, about = "Dashboard cache event replay")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DASHCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Replay a JSON-lines cache event log and print the resulting caches.
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub overrides: ReplayOverrides,

    /// Event log to replay, one JSON event per line.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReplayOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the expiry applied when an event carries none.
    #[arg(long = "cache-default-expires-in-seconds", value_name = "SECONDS")]
    pub default_expires_in_seconds: Option<u64>,

    /// Toggle dropping of superseded request answers.
    #[arg(
        long = "cache-fencing",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub fencing: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_expires_in_seconds: NonZeroU64,
    pub fencing: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Replay(args) => raw.apply_replay_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_replay_overrides(&mut self, overrides: &ReplayOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.default_expires_in_seconds {
            self.cache.default_expires_in_seconds = Some(seconds);
        }
        if let Some(fencing) = overrides.fencing {
            self.cache.fencing = Some(fencing);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_expires_in_seconds = non_zero_u64(
        cache
            .default_expires_in_seconds
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        "cache.default_expires_in_seconds",
    )?;

    Ok(CacheSettings {
        default_expires_in_seconds,
        fencing: cache.fencing.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_expires_in_seconds: Option<u64>,
    fencing: Option<bool>,
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_apply_without_any_source() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert!(matches!(settings.logging.format, LogFormat::Compact));
        assert_eq!(settings.cache.default_expires_in_seconds.get(), 3600);
        assert!(settings.cache.fencing);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("info".to_string());
        raw.cache.default_expires_in_seconds = Some(60);

        let overrides = ReplayOverrides {
            log_level: Some("debug".to_string()),
            default_expires_in_seconds: Some(120),
            fencing: Some(false),
            ..Default::default()
        };

        raw.apply_replay_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.cache.default_expires_in_seconds.get(), 120);
        assert!(!settings.cache.fencing);
    }

    #[test]
    fn zero_expiry_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.default_expires_in_seconds = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero expiry must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.default_expires_in_seconds",
                ..
            }
        ));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("chatty".to_string());

        let err = Settings::from_raw(raw).expect_err("bad level must fail");
        assert!(matches!(err, LoadError::Invalid { key: "logging.level", .. }));
    }

    #[test]
    fn config_file_is_read_and_cli_wins() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config file");
        writeln!(
            file,
            "[logging]\njson = true\n\n[cache]\ndefault_expires_in_seconds = 30\nfencing = false"
        )
        .expect("write config");

        let path = file.path().to_string_lossy().into_owned();
        let args = CliArgs::parse_from([
            "dashcache",
            "--config-file",
            path.as_str(),
            "replay",
            "--cache-default-expires-in-seconds",
            "45",
            "events.jsonl",
        ]);
        let settings = load(&args).expect("settings load");

        assert!(matches!(settings.logging.format, LogFormat::Json));
        assert_eq!(settings.cache.default_expires_in_seconds.get(), 45);
        assert!(!settings.cache.fencing);
    }

    #[test]
    fn parse_replay_arguments() {
        let args = CliArgs::parse_from([
            "dashcache",
            "replay",
            "--log-json",
            "true",
            "--cache-fencing",
            "no",
            "/tmp/events.jsonl",
        ]);

        match args.command {
            Command::Replay(replay) => {
                assert_eq!(replay.file, std::path::Path::new("/tmp/events.jsonl"));
                assert_eq!(replay.overrides.log_json, Some(true));
                assert_eq!(replay.overrides.fencing, Some(false));
            }
        }
    }
}
