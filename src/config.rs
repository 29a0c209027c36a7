//! Process configuration, read once at startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use reqwest::Url;

pub const DEFAULT_UPSTREAM_URL: &str = "https://dados.mobilidade.rio/gps/sppo";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ITEMS: usize = 500;

/// What the collector needs to know about the upstream feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: Url,
    pub timeout: Duration,
    /// Hard cap on records returned per request.
    pub max_items: usize,
    /// Zone used when rendering normalized timestamps.
    pub timezone: Tz,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_UPSTREAM_URL).expect("default upstream URL is valid"),
            timeout: DEFAULT_TIMEOUT,
            max_items: DEFAULT_MAX_ITEMS,
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_file_path: String,
    pub feed: FeedConfig,
}

impl Config {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = match var("UPSTREAM_URL") {
            Some(raw) => Url::parse(raw.trim()).with_context(|| format!("UPSTREAM_URL={raw}"))?,
            None => FeedConfig::default().url,
        };
        let timeout = parsed::<u64>(&var, "UPSTREAM_TIMEOUT_SECS")?
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        let max_items = parsed::<usize>(&var, "MAX_ITEMS")?.unwrap_or(DEFAULT_MAX_ITEMS);
        if max_items == 0 {
            bail!("MAX_ITEMS must be greater than zero");
        }
        let timezone = match var("FEED_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("FEED_TIMEZONE={name}: {e}"))?,
            None => Tz::UTC,
        };

        Ok(Self {
            host: parsed(&var, "HOST")?.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: parsed(&var, "PORT")?.unwrap_or(DEFAULT_PORT),
            log_file_path: var("LOG_FILE_PATH")
                .unwrap_or_else(|| "logs/onibus_rio.log".to_string()),
            feed: FeedConfig {
                url,
                timeout,
                max_items,
                timezone,
            },
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key}={raw}"))
        })
        .transpose()
}
