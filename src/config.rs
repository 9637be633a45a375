use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Result, WrapErr};
use log::debug;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::source::SourceKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub source: SourceKind,
    pub default_language: String,
    pub ytdlp_path: String,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            source: SourceKind::TranscriptApi,
            default_language: "en".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_delay_secs: f64,
    pub jitter_min_secs: f64,
    pub jitter_max_secs: f64,
    /// Random pause before the first track listing request
    pub pre_request_delay: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay_secs: 2.0,
            jitter_min_secs: 1.0,
            jitter_max_secs: 3.0,
            pre_request_delay: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub calls: usize,
    pub period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls: 50,
            period_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Plain-text list, one `host:port` per line
    pub list_url: Option<String>,
    pub proxies: Vec<String>,
    pub refresh_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            list_url: None,
            proxies: Vec::new(),
            refresh_secs: 3600,
            fetch_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Disk,
    Redis,
    None,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub ttl_secs: u64,
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ttl_secs: 86_400,
            redis_url: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    /// Load config from ~/.config/ytxd/config.toml if it exists
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).wrap_err_with(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay environment settings, looked up through `get`
    pub fn apply_env_with(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("YTXD_HOST") {
            self.host = host;
        }
        if let Some(port) = get("YTXD_PORT") {
            self.port = port.trim().parse().wrap_err("parsing YTXD_PORT")?;
        }
        if let Some(source) = get("YTXD_SOURCE") {
            self.source = source.parse()?;
        }
        if let Some(url) = get("YTXD_PROXY_LIST_URL") {
            self.proxy.list_url = Some(url);
        }
        if let Some(list) = get("YTXD_PROXIES") {
            self.proxy.proxies = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(url) = get("REDIS_URL") {
            self.cache.redis_url = Some(url);
            self.cache.backend = CacheBackend::Redis;
        } else if let Some(host) = get("REDIS_HOST") {
            let port = get("REDIS_PORT").unwrap_or_else(|| "6379".to_string());
            let mut url = Url::parse(&format!("redis://{}:{}/", host.trim(), port.trim()))
                .wrap_err("building redis URL from REDIS_HOST/REDIS_PORT")?;
            if let Some(password) = get("REDIS_PASSWORD") {
                // Url percent-encodes the userinfo
                url.set_password(Some(&password))
                    .map_err(|()| eyre::eyre!("cannot set REDIS_PASSWORD on {url}"))?;
            }
            self.cache.redis_url = Some(url.to_string());
            self.cache.backend = CacheBackend::Redis;
        }

        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("ytxd")
        .join("config.toml")
}
