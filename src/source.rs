//! Caption backends and the pieces they share.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::eyre;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::CaptionError;
use crate::proxy::proxy_url;
use crate::{CaptionEvent, CaptionTrack, VideoReference};

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can enumerate and download caption tracks for a video.
///
/// `proxy` is the pool entry the call should egress through, `None` for a
/// direct connection.
#[async_trait]
pub trait CaptionSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_tracks(
        &self,
        video: &VideoReference,
        proxy: Option<&str>,
    ) -> Result<Vec<CaptionTrack>, CaptionError>;

    async fn fetch_transcript(
        &self,
        video: &VideoReference,
        language: &str,
        proxy: Option<&str>,
    ) -> Result<Vec<CaptionEvent>, CaptionError>;
}

/// Which backend a deployment talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// InnerTube player API with timedtext XML
    TranscriptApi,
    /// Player response embedded in the watch page, json3 captions
    MetadataLibrary,
    /// yt-dlp metadata dump, json3 captions
    MediaExtractor,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::TranscriptApi => write!(f, "transcript-api"),
            SourceKind::MetadataLibrary => write!(f, "metadata-library"),
            SourceKind::MediaExtractor => write!(f, "media-extractor"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transcript-api" => Ok(SourceKind::TranscriptApi),
            "metadata-library" => Ok(SourceKind::MetadataLibrary),
            "media-extractor" => Ok(SourceKind::MediaExtractor),
            other => Err(eyre!(
                "unknown caption source '{other}' (expected transcript-api, metadata-library or media-extractor)"
            )),
        }
    }
}

pub fn build(config: &Config) -> Arc<dyn CaptionSource> {
    match config.source {
        SourceKind::TranscriptApi => Arc::new(crate::youtube::InnerTubeSource::new()),
        SourceKind::MetadataLibrary => Arc::new(crate::watch_page::WatchPageSource::new()),
        SourceKind::MediaExtractor => {
            Arc::new(crate::ytdlp::YtDlpSource::new(config.ytdlp_path.clone()))
        }
    }
}

/// HTTP client with browser-like headers, optionally routed through a proxy
pub fn http_client(proxy: Option<&str>) -> Result<reqwest::Client, CaptionError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT);
    if let Some(entry) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url(entry))
            .map_err(|e| CaptionError::Transport(format!("bad proxy {entry}: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| CaptionError::Unknown(format!("building HTTP client: {e}")))
}

/// GET a URL and return the body, mapping upstream statuses to caption errors
pub async fn get_text(
    client: &reqwest::Client,
    url: &str,
    video_id: &str,
) -> Result<String, CaptionError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(CaptionError::from_status(status, video_id));
    }
    Ok(resp.text().await?)
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs", default)]
    start_ms: f64,
    #[serde(rename = "dDurationMs", default)]
    duration_ms: f64,
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse YouTube's `fmt=json3` caption payload
pub fn parse_json3(body: &str) -> Result<Vec<CaptionEvent>, CaptionError> {
    let doc: Json3 = serde_json::from_str(body)
        .map_err(|e| CaptionError::Unknown(format!("error parsing json3 captions: {e}")))?;

    Ok(doc
        .events
        .into_iter()
        .filter_map(|event| {
            let text: String = event.segs?.into_iter().map(|s| s.utf8).collect();
            let text = text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(CaptionEvent {
                text,
                start: event.start_ms / 1000.0,
                duration: event.duration_ms / 1000.0,
            })
        })
        .collect())
}

/// Append or replace the `fmt` query parameter of a caption URL
pub fn with_format(url: &str, fmt: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let (base, query) = url.split_once('?').unwrap_or((url, ""));
    parts.extend(query.split('&').filter(|p| !p.is_empty() && !p.starts_with("fmt=")));
    let fmt_param = format!("fmt={fmt}");
    parts.push(&fmt_param);
    format!("{base}?{}", parts.join("&"))
}

/// Pick a track by language code, preferring human-authored captions
pub fn select_track<'a, T>(
    tracks: &'a [T],
    language: &str,
    key: impl Fn(&T) -> (&str, bool),
) -> Option<&'a T> {
    tracks
        .iter()
        .find(|t| key(t) == (language, false))
        .or_else(|| tracks.iter().find(|t| key(t).0 == language))
}
