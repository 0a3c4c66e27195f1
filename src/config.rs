use std::sync::Arc;
use std::{env, fs, path::PathBuf};

use anyhow::Result;
use directories::ProjectDirs;
use serde::Deserialize;

pub const DEFAULT_INTAKE_WORKERS: usize = 4;
pub const DEFAULT_PRIORITY_CAPACITY_BYTES: usize = 15 * 1024 * 1024;
pub const DEFAULT_DEAD_LETTER_CAPACITY_MB: usize = 10;
pub const DEFAULT_SINK_PATH: &str = "all_logs.log";
pub const DEFAULT_BUS_ADDR: &str = "127.0.0.1:9514";

/// Which sink the drain worker writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    File,
    Console,
}

impl SinkKind {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("file") {
            Some(SinkKind::File)
        } else if s.eq_ignore_ascii_case("console") {
            Some(SinkKind::Console)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub intake_workers: usize,
    pub priority_capacity_bytes: usize,
    pub dead_letter_capacity_mb: usize,
    pub sink: SinkKind,
    pub sink_path: PathBuf,
    pub bus_addr: Arc<str>,
    pub app_config_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_intake_workers")]
    intake_workers: usize,
    #[serde(default = "default_priority_capacity_bytes")]
    priority_capacity_bytes: usize,
    #[serde(default = "default_dead_letter_capacity_mb")]
    dead_letter_capacity_mb: usize,
    #[serde(default = "default_sink")]
    sink: String,
    #[serde(default = "default_sink_path")]
    sink_path: PathBuf,
    #[serde(default = "default_bus_addr")]
    bus_addr: String,
    #[serde(default)]
    app_config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration: an explicit TOML path, else the default config
    /// file when present, else built-in defaults; environment variables
    /// override whatever was read.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut cfg = if let Some(path) = path {
            let raw = fs::read_to_string(path)?;
            Config::from_raw(toml::from_str::<RawConfig>(&raw)?)?
        } else {
            let default_path = default_config_path();
            if default_path.exists() {
                let raw = fs::read_to_string(&default_path)?;
                Config::from_raw(toml::from_str::<RawConfig>(&raw)?)?
            } else {
                Self::defaults()
            }
        };

        maybe_env_usize(&mut cfg.intake_workers, "INTAKE_WORKERS");
        maybe_env_usize(&mut cfg.priority_capacity_bytes, "PRIORITY_CAPACITY_BYTES");
        maybe_env_usize(&mut cfg.dead_letter_capacity_mb, "DEAD_LETTER_CAPACITY_MB");
        if let Ok(v) = env::var("SINK") {
            if let Some(kind) = SinkKind::parse(&v) {
                cfg.sink = kind;
            }
        }
        if let Ok(v) = env::var("SINK_PATH") {
            if !v.trim().is_empty() {
                cfg.sink_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("BUS_ADDR") {
            if !v.trim().is_empty() {
                cfg.bus_addr = v.into();
            }
        }
        if let Ok(v) = env::var("APP_CONFIG_PATH") {
            if !v.trim().is_empty() {
                cfg.app_config_path = PathBuf::from(v);
            }
        }

        validate(&cfg)?;
        Ok(cfg)
    }

    pub fn defaults() -> Self {
        Self {
            intake_workers: DEFAULT_INTAKE_WORKERS,
            priority_capacity_bytes: DEFAULT_PRIORITY_CAPACITY_BYTES,
            dead_letter_capacity_mb: DEFAULT_DEAD_LETTER_CAPACITY_MB,
            sink: SinkKind::File,
            sink_path: PathBuf::from(DEFAULT_SINK_PATH),
            bus_addr: DEFAULT_BUS_ADDR.into(),
            app_config_path: default_app_config_path(),
        }
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let sink = SinkKind::parse(&raw.sink).ok_or_else(|| {
            anyhow::anyhow!("unknown sink kind {:?} (expected file or console)", raw.sink)
        })?;
        Ok(Self {
            intake_workers: raw.intake_workers,
            priority_capacity_bytes: raw.priority_capacity_bytes,
            dead_letter_capacity_mb: raw.dead_letter_capacity_mb,
            sink,
            sink_path: raw.sink_path,
            bus_addr: raw.bus_addr.into(),
            app_config_path: raw.app_config_path.unwrap_or_else(default_app_config_path),
        })
    }
}

fn validate(cfg: &Config) -> Result<()> {
    if cfg.intake_workers == 0 {
        anyhow::bail!("intake_workers must be at least 1");
    }
    if cfg.priority_capacity_bytes == 0 {
        anyhow::bail!("priority_capacity_bytes must be non-zero");
    }
    if cfg.dead_letter_capacity_mb == 0 {
        anyhow::bail!("dead_letter_capacity_mb must be non-zero");
    }
    if cfg.bus_addr.trim().is_empty() {
        anyhow::bail!("bus_addr is required");
    }
    Ok(())
}

fn default_config_path() -> PathBuf {
    default_state_dir().join("config.toml")
}

fn default_app_config_path() -> PathBuf {
    default_state_dir().join("app_config.json")
}

fn default_state_dir() -> PathBuf {
    ProjectDirs::from("com", "logfunnel", "logfunnel")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".logfunnel"))
}

fn default_intake_workers() -> usize {
    DEFAULT_INTAKE_WORKERS
}

fn default_priority_capacity_bytes() -> usize {
    DEFAULT_PRIORITY_CAPACITY_BYTES
}

fn default_dead_letter_capacity_mb() -> usize {
    DEFAULT_DEAD_LETTER_CAPACITY_MB
}

fn default_sink() -> String {
    "file".into()
}

fn default_sink_path() -> PathBuf {
    PathBuf::from(DEFAULT_SINK_PATH)
}

fn default_bus_addr() -> String {
    DEFAULT_BUS_ADDR.into()
}

fn maybe_env_usize(val: &mut usize, key: &str) {
    if let Ok(v) = env::var(key) {
        if let Ok(n) = v.parse::<usize>() {
            *val = n;
        }
    }
}
