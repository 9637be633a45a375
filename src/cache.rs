//! Transcript cache keyed by video and language.
//!
//! Purely an optimization: every backend may forget entries at any time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::{CacheBackend, CacheConfig};

pub fn cache_key(video_id: &str, language: &str) -> String {
    format!("transcript:{video_id}:{language}")
}

#[async_trait]
pub trait TranscriptCache: Send + Sync {
    async fn get(&self, video_id: &str, language: &str) -> Option<String>;

    async fn put(&self, video_id: &str, language: &str, text: &str, ttl: Duration);
}

pub async fn from_config(config: &CacheConfig) -> Result<Arc<dyn TranscriptCache>> {
    let cache: Arc<dyn TranscriptCache> = match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Disk => Arc::new(DiskCache::new(cache_dir())),
        CacheBackend::Redis => {
            let url = config.redis_url.as_deref().unwrap_or("redis://127.0.0.1:6379/");
            Arc::new(RedisCache::connect(url).await?)
        }
        CacheBackend::None => Arc::new(NullCache),
    };
    Ok(cache)
}

/// Never stores anything
#[derive(Debug, Default)]
pub struct NullCache;

#[async_trait]
impl TranscriptCache for NullCache {
    async fn get(&self, _video_id: &str, _language: &str) -> Option<String> {
        None
    }

    async fn put(&self, _video_id: &str, _language: &str, _text: &str, _ttl: Duration) {}
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptCache for MemoryCache {
    async fn get(&self, video_id: &str, language: &str) -> Option<String> {
        let key = cache_key(video_id, language);
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some((text, expires)) if Instant::now() < *expires => {
                    debug!("Cache hit: {key}");
                    return Some(text.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired; drop it
        self.entries.write().await.remove(&key);
        None
    }

    async fn put(&self, video_id: &str, language: &str, text: &str, ttl: Duration) {
        let key = cache_key(video_id, language);
        let now = Instant::now();
        let expires = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 86_400));
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, exp)| *exp > now);
        entries.insert(key, (text.to_string(), expires));
    }
}

fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("ytxd")
        .join("transcripts")
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    text: String,
    expires_at: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One JSON file per transcript
#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, video_id: &str, language: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", escape(video_id), escape(language)))
    }
}

/// Bytes outside `[A-Za-z0-9_]` become `%XX`, so distinct keys never share a file
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[async_trait]
impl TranscriptCache for DiskCache {
    async fn get(&self, video_id: &str, language: &str) -> Option<String> {
        let path = self.path(video_id, language);
        let data = tokio::fs::read_to_string(&path).await.ok()?;
        let entry: DiskEntry = serde_json::from_str(&data).ok()?;
        if entry.expires_at <= unix_now() {
            debug!("Cache expired: {}", path.display());
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        debug!("Cache hit: {}", path.display());
        Some(entry.text)
    }

    async fn put(&self, video_id: &str, language: &str, text: &str, ttl: Duration) {
        let path = self.path(video_id, language);
        let entry = DiskEntry {
            text: text.to_string(),
            expires_at: unix_now().saturating_add(ttl.as_secs()),
        };
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let data = serde_json::to_string_pretty(&entry)?;
            tokio::fs::write(&path, data).await?;
            Ok::<_, eyre::Report>(())
        }
        .await;
        match result {
            Ok(()) => debug!("Cached transcript: {}", path.display()),
            Err(e) => warn!("Failed to cache transcript at {}: {e}", path.display()),
        }
    }
}

/// Shared cache in a redis server, entries expire through SETEX
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).wrap_err("parsing redis URL")?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .wrap_err("connecting to redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl TranscriptCache for RedisCache {
    async fn get(&self, video_id: &str, language: &str) -> Option<String> {
        let key = cache_key(video_id, language);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<String>> =
            redis::cmd("GET").arg(&key).query_async(&mut conn).await;
        match result {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Redis GET {key} failed: {e}");
                None
            }
        }
    }

    async fn put(&self, video_id: &str, language: &str, text: &str, ttl: Duration) {
        let key = cache_key(video_id, language);
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let result: redis::RedisResult<()> = redis::cmd("SETEX")
            .arg(&key)
            .arg(secs)
            .arg(text)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!("Redis SETEX {key} failed: {e}");
        }
    }
}
