//! Captions read from the player response embedded in the watch page.
//!
//! One request less than the InnerTube route: the page already carries
//! `ytInitialPlayerResponse`, and its caption URLs are fetched as json3.

use std::sync::LazyLock;

use async_trait::async_trait;
use log::debug;
use regex::Regex;

use crate::error::CaptionError;
use crate::source::{self, CaptionSource};
use crate::youtube::PlayerResponse;
use crate::{CaptionEvent, CaptionTrack, VideoReference};

static PLAYER_RESPONSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)ytInitialPlayerResponse\s*=\s*(\{.+?\})\s*;\s*(?:var\s|</script>|const\s|let\s)")
        .expect("static player response pattern")
});

#[derive(Debug, Default)]
pub struct WatchPageSource;

impl WatchPageSource {
    pub fn new() -> Self {
        Self
    }

    async fn player(
        &self,
        client: &reqwest::Client,
        video: &VideoReference,
    ) -> Result<PlayerResponse, CaptionError> {
        let watch_url = format!("{}&hl=en", video.watch_url());
        debug!("Fetching watch page: {watch_url}");
        let html = source::get_text(client, &watch_url, video.id()).await?;
        extract_player_response(&html, video.id())
    }
}

fn extract_player_response(html: &str, video_id: &str) -> Result<PlayerResponse, CaptionError> {
    if html.contains("g-recaptcha") {
        return Err(CaptionError::RateLimited);
    }
    let caps = PLAYER_RESPONSE.captures(html).ok_or_else(|| {
        CaptionError::Unknown(format!("no player response in watch page of {video_id}"))
    })?;
    serde_json::from_str(&caps[1])
        .map_err(|e| CaptionError::Unknown(format!("error decoding player response: {e}")))
}

#[async_trait]
impl CaptionSource for WatchPageSource {
    fn name(&self) -> &'static str {
        "metadata-library"
    }

    async fn list_tracks(
        &self,
        video: &VideoReference,
        proxy: Option<&str>,
    ) -> Result<Vec<CaptionTrack>, CaptionError> {
        let client = source::http_client(proxy)?;
        self.player(&client, video).await?.tracks(video.id())
    }

    async fn fetch_transcript(
        &self,
        video: &VideoReference,
        language: &str,
        proxy: Option<&str>,
    ) -> Result<Vec<CaptionEvent>, CaptionError> {
        let client = source::http_client(proxy)?;
        let track = self.player(&client, video).await?.find_track(video.id(), language)?;
        let url = source::with_format(&track.base_url, "json3");
        let body = source::get_text(&client, &url, video.id()).await?;
        source::parse_json3(&body)
    }
}
