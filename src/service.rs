//! Request-independent transcript operations shared by the HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use log::{debug, info};

use crate::cache::{self, NullCache, TranscriptCache};
use crate::config::Config;
use crate::error::CaptionError;
use crate::limiter::RateLimiter;
use crate::output;
use crate::proxy::ProxyPool;
use crate::retry::{Retrier, RetryPolicy};
use crate::source::{self, CaptionSource};
use crate::{CaptionEvent, CaptionTrack, VideoReference};

pub struct TranscriptService {
    source: Arc<dyn CaptionSource>,
    retrier: Retrier,
    cache: Arc<dyn TranscriptCache>,
    cache_ttl: Duration,
    pre_request_delay: bool,
}

impl TranscriptService {
    pub fn new(
        source: Arc<dyn CaptionSource>,
        retrier: Retrier,
        cache: Arc<dyn TranscriptCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            source,
            retrier,
            cache,
            cache_ttl,
            pre_request_delay: false,
        }
    }

    /// Pause for a random jitter before the first track listing request
    pub fn with_pre_request_delay(mut self, enabled: bool) -> Self {
        self.pre_request_delay = enabled;
        self
    }

    /// A service with no cache, proxies or call limit around `source`
    pub fn uncached(source: Arc<dyn CaptionSource>, policy: RetryPolicy) -> Self {
        let retrier = Retrier::new(
            policy,
            Arc::new(RateLimiter::unlimited()),
            Arc::new(ProxyPool::direct()),
        );
        Self::new(source, retrier, Arc::new(NullCache), Duration::ZERO)
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let source = source::build(config);
        let limiter = RateLimiter::new(config.rate_limit.calls, config.rate_limit.period());
        let proxies = ProxyPool::from_config(&config.proxy);
        let retrier = Retrier::new(
            RetryPolicy::from(&config.retry),
            Arc::new(limiter),
            Arc::new(proxies),
        );
        let cache = cache::from_config(&config.cache).await?;
        info!(
            "Caption source: {}, cache: {:?}, {} attempts per fetch",
            source.name(),
            config.cache.backend,
            config.retry.attempts
        );
        Ok(Self::new(source, retrier, cache, config.cache.ttl())
            .with_pre_request_delay(config.retry.pre_request_delay))
    }

    pub async fn list_tracks(&self, video: &VideoReference) -> Result<Vec<CaptionTrack>, CaptionError> {
        if self.pre_request_delay {
            let delay = self.retrier.policy().jitter();
            debug!("Waiting {delay:?} before listing tracks of {}", video.id());
            tokio::time::sleep(delay).await;
        }

        let source = &self.source;
        self.retrier
            .run("list tracks", |proxy| async move {
                source.list_tracks(video, proxy.as_deref()).await
            })
            .await
    }

    pub async fn fetch_events(
        &self,
        video: &VideoReference,
        language: &str,
    ) -> Result<Vec<CaptionEvent>, CaptionError> {
        let source = &self.source;
        let events = self
            .retrier
            .run("fetch transcript", |proxy| async move {
                source.fetch_transcript(video, language, proxy.as_deref()).await
            })
            .await?;

        if events.is_empty() {
            return Err(CaptionError::no_captions(video.id(), language));
        }
        Ok(events)
    }

    /// Plain-text transcript, served from the cache when possible
    pub async fn cached_transcript(
        &self,
        video: &VideoReference,
        language: &str,
    ) -> Result<String, CaptionError> {
        if let Some(text) = self.cache.get(video.id(), language).await {
            debug!("Transcript {}:{language} served from cache", video.id());
            return Ok(text);
        }

        let events = self.fetch_events(video, language).await?;
        let text = output::render_text(&events);
        self.cache
            .put(video.id(), language, &text, self.cache_ttl)
            .await;
        Ok(text)
    }
}
