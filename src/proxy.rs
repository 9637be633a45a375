//! Rotating pool of outbound HTTP proxies.
//!
//! The pool is either a fixed list from configuration or a plain-text list
//! (`host:port` per line) fetched from a remote URL. A remote list is
//! re-fetched when the cursor runs off its end or when it has gone stale.
//! Fetch failures leave the pool empty, which means "connect directly".

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::ProxyConfig;

#[derive(Debug, Clone)]
enum ProxySource {
    Static,
    Remote { url: String, timeout: Duration },
}

#[derive(Debug, Default)]
struct PoolState {
    proxies: Vec<String>,
    cursor: usize,
    fetched_at: Option<Instant>,
}

#[derive(Debug)]
pub struct ProxyPool {
    source: ProxySource,
    ttl: Duration,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// A pool that always hands out "no proxy"
    pub fn direct() -> Self {
        Self::fixed(Vec::new())
    }

    pub fn fixed(proxies: Vec<String>) -> Self {
        Self {
            source: ProxySource::Static,
            ttl: Duration::MAX,
            state: Mutex::new(PoolState {
                proxies,
                cursor: 0,
                fetched_at: Some(Instant::now()),
            }),
        }
    }

    pub fn remote(url: impl Into<String>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            source: ProxySource::Remote {
                url: url.into(),
                timeout,
            },
            ttl,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Configured proxies take precedence over a remote list
    pub fn from_config(config: &ProxyConfig) -> Self {
        if !config.proxies.is_empty() {
            return Self::fixed(config.proxies.clone());
        }
        match &config.list_url {
            Some(url) => Self::remote(
                url.clone(),
                Duration::from_secs(config.refresh_secs),
                Duration::from_secs(config.fetch_timeout_secs),
            ),
            None => Self::direct(),
        }
    }

    /// Next proxy in round-robin order, or `None` to connect directly
    pub async fn next_proxy(&self) -> Option<String> {
        let mut state = self.state.lock().await;

        let stale = state
            .fetched_at
            .is_none_or(|at| at.elapsed() >= self.ttl);
        // An empty list is only retried once stale, so a dead list source
        // does not cost a fetch timeout on every request
        let exhausted = !state.proxies.is_empty() && state.cursor >= state.proxies.len();
        if stale || exhausted {
            self.reload(&mut state).await;
        }

        let proxy = state.proxies.get(state.cursor).cloned();
        if proxy.is_some() {
            state.cursor += 1;
        }
        proxy
    }

    /// Replace the pool wholesale and rewind the cursor
    pub async fn refresh(&self) {
        let mut state = self.state.lock().await;
        self.reload(&mut state).await;
    }

    async fn reload(&self, state: &mut PoolState) {
        match &self.source {
            ProxySource::Static => {}
            ProxySource::Remote { url, timeout } => {
                state.proxies = fetch_proxy_list(url, *timeout).await;
                state.fetched_at = Some(Instant::now());
                debug!("Proxy pool refreshed from {url}: {} entries", state.proxies.len());
            }
        }
        state.cursor = 0;
    }
}

async fn fetch_proxy_list(url: &str, timeout: Duration) -> Vec<String> {
    let result = async {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        client.get(url).send().await?.error_for_status()?.text().await
    }
    .await;

    match result {
        Ok(body) => parse_proxy_list(&body),
        Err(e) => {
            warn!("Error fetching proxy list from {url}: {e}");
            Vec::new()
        }
    }
}

fn parse_proxy_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Turn a pool entry into a URL reqwest and yt-dlp accept
pub fn proxy_url(entry: &str) -> String {
    if entry.contains("://") {
        entry.to_string()
    } else {
        format!("http://{entry}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, routing::get};

    async fn serve_list(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/http.txt",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    body
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/http.txt"), hits)
    }

    #[test]
    fn test_parse_proxy_list() {
        let body = "1.1.1.1:80\n\n  2.2.2.2:8080  \n# comment\n";
        assert_eq!(parse_proxy_list(body), vec!["1.1.1.1:80", "2.2.2.2:8080"]);
    }

    #[test]
    fn test_proxy_url() {
        assert_eq!(proxy_url("1.1.1.1:80"), "http://1.1.1.1:80");
        assert_eq!(proxy_url("socks5://1.1.1.1:1080"), "socks5://1.1.1.1:1080");
    }

    #[tokio::test]
    async fn test_fixed_pool_round_robin() {
        let pool = ProxyPool::fixed(vec!["a:1".into(), "b:2".into(), "c:3".into()]);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(pool.next_proxy().await.unwrap());
        }
        assert_eq!(seen, vec!["a:1", "b:2", "c:3", "a:1", "b:2"]);
    }

    #[tokio::test]
    async fn test_empty_pool_means_direct() {
        let pool = ProxyPool::direct();
        assert_eq!(pool.next_proxy().await, None);
        assert!(pool.state.lock().await.proxies.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_rewinds_cursor() {
        let pool = ProxyPool::fixed(vec!["a:1".into(), "b:2".into()]);
        assert_eq!(pool.next_proxy().await.as_deref(), Some("a:1"));
        pool.refresh().await;
        assert_eq!(pool.next_proxy().await.as_deref(), Some("a:1"));
    }

    #[tokio::test]
    async fn test_unreachable_list_degrades_to_direct() {
        let pool = ProxyPool::remote(
            "http://127.0.0.1:9/http.txt",
            Duration::from_secs(3600),
            Duration::from_secs(1),
        );
        assert_eq!(pool.next_proxy().await, None);
    }

    #[tokio::test]
    async fn test_remote_list_refetched_when_exhausted() {
        let (url, hits) = serve_list("1.1.1.1:80\n2.2.2.2:80\n").await;
        let pool = ProxyPool::remote(url, Duration::from_secs(3600), Duration::from_secs(5));

        assert_eq!(pool.next_proxy().await.as_deref(), Some("1.1.1.1:80"));
        assert_eq!(pool.next_proxy().await.as_deref(), Some("2.2.2.2:80"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(pool.next_proxy().await.as_deref(), Some("1.1.1.1:80"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_list_refetched() {
        let (url, hits) = serve_list("1.1.1.1:80\n2.2.2.2:80\n").await;
        let pool = ProxyPool::remote(url, Duration::ZERO, Duration::from_secs(5));

        pool.next_proxy().await;
        pool.next_proxy().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
