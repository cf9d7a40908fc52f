use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::RateLimitConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} is set but {1} is not; TLS needs both")]
    IncompleteTls(&'static str, &'static str),
}

/// Per-category limits applied to each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub code: RateLimitConfig,
    pub chat: RateLimitConfig,
    pub file: RateLimitConfig,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            code: RateLimitConfig::new(50, Duration::from_secs(1)),
            chat: RateLimitConfig::new(20, Duration::from_secs(60)),
            file: RateLimitConfig::new(30, Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub tls: Option<TlsPaths>,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3002,
            data_dir: None,
            tls: None,
            limits: Limits::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tls = match (get("DEVSYNC_TLS_CERT"), get("DEVSYNC_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::IncompleteTls("DEVSYNC_TLS_CERT", "DEVSYNC_TLS_KEY"))
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteTls("DEVSYNC_TLS_KEY", "DEVSYNC_TLS_CERT"))
            }
        };

        Ok(Config {
            host: parse_or(&get, "DEVSYNC_HOST", defaults.host)?,
            port: parse_or(&get, "PORT", defaults.port)?,
            data_dir: get("DEVSYNC_DATA_DIR").map(PathBuf::from),
            tls,
            limits: Limits {
                code: limit_or(
                    &get,
                    "DEVSYNC_CODE_LIMIT",
                    "DEVSYNC_CODE_WINDOW_MS",
                    defaults.limits.code,
                )?,
                chat: limit_or(
                    &get,
                    "DEVSYNC_CHAT_LIMIT",
                    "DEVSYNC_CHAT_WINDOW_MS",
                    defaults.limits.chat,
                )?,
                file: limit_or(
                    &get,
                    "DEVSYNC_FILE_LIMIT",
                    "DEVSYNC_FILE_WINDOW_MS",
                    defaults.limits.file,
                )?,
            },
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn limit_or<G>(
    get: &G,
    max_key: &'static str,
    window_key: &'static str,
    default: RateLimitConfig,
) -> Result<RateLimitConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let max_requests = parse_or(get, max_key, default.max_requests)?;
    let window_ms = parse_or(get, window_key, default.window.as_millis() as u64)?;
    if window_ms == 0 {
        return Err(ConfigError::Invalid {
            key: window_key,
            value: "0".into(),
        });
    }
    Ok(RateLimitConfig::new(max_requests, Duration::from_millis(window_ms)))
}
