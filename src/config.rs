use anyhow::{Context, Result, bail};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::cache::{CacheConfig, DEFAULT_TTL};
use crate::ytdlp::{DEFAULT_PROGRAM, DEFAULT_TIMEOUT};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/media-downloader-env";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound for every `*_SECS` key (thirty days).
pub const MAX_SECS: u64 = 30 * 24 * 60 * 60;

/// Values present in a `KEY=VALUE` config file; anything unset falls back to
/// the defaults in [`ServiceConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp_path: Option<PathBuf>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_sweep_secs: Option<u64>,
    pub extract_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub ytdlp_path: PathBuf,
    pub extract_timeout: Duration,
    pub cache: CacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ytdlp_path: PathBuf::from(DEFAULT_PROGRAM),
            extract_timeout: DEFAULT_TIMEOUT,
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env_config(cfg: EnvConfig) -> Self {
        let defaults = Self::default();
        let ttl = cfg
            .cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL);
        let mut cache = CacheConfig::with_ttl(ttl);
        if let Some(secs) = cfg.cache_sweep_secs {
            cache.sweep_interval = Duration::from_secs(secs);
        }
        Self {
            host: cfg.host.unwrap_or(defaults.host),
            port: cfg.port.unwrap_or(defaults.port),
            ytdlp_path: cfg.ytdlp_path.unwrap_or(defaults.ytdlp_path),
            extract_timeout: cfg
                .extract_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.extract_timeout),
            cache,
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let key = key.trim();
            let value = value_raw.trim().trim_matches('"');
            match key {
                "HOST" => {
                    if !value.is_empty() {
                        cfg.host = Some(value.to_string());
                    }
                }
                "PORT" => cfg.port = Some(parse_number(key, value, path)?),
                "YTDLP_PATH" => {
                    if !value.is_empty() {
                        cfg.ytdlp_path = Some(PathBuf::from(value));
                    }
                }
                "CACHE_TTL_SECS" => cfg.cache_ttl_secs = Some(parse_secs(key, value, path)?),
                "CACHE_SWEEP_SECS" => cfg.cache_sweep_secs = Some(parse_secs(key, value, path)?),
                "EXTRACT_TIMEOUT_SECS" => {
                    cfg.extract_timeout_secs = Some(parse_secs(key, value, path)?)
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

fn parse_number<T>(key: &str, value: &str, path: &Path) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Parsing {key} from {}", path.display()))
}

/// A positive number of seconds no larger than [`MAX_SECS`].
fn parse_secs(key: &str, value: &str, path: &Path) -> Result<u64> {
    let secs: u64 = parse_number(key, value, path)?;
    if secs == 0 || secs > MAX_SECS {
        bail!(
            "{key} in {} must be between 1 and {MAX_SECS} seconds, got {secs}",
            path.display()
        );
    }
    Ok(secs)
}

pub fn load_service_config() -> Result<ServiceConfig> {
    load_service_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

/// Reads `path` if it exists. A missing file yields the defaults.
pub fn load_service_config_from(path: impl AsRef<Path>) -> Result<ServiceConfig> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(ServiceConfig::from_env_config(cfg))
}
