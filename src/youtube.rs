use async_trait::async_trait;
use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::error::CaptionError;
use crate::source::{self, CaptionSource};
use crate::{CaptionEvent, CaptionTrack, VideoReference};

const CLIENT_VERSION: &str = "2.20241126.01.00";

#[derive(Debug, Deserialize)]
pub(crate) struct PlayerResponse {
    #[serde(rename = "playabilityStatus")]
    playability_status: Option<PlayabilityStatus>,
    captions: Option<CaptionsData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaptionsData {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    player_captions_tracklist_renderer: Option<CaptionTracklistRenderer>,
}

#[derive(Debug, Deserialize)]
struct CaptionTracklistRenderer {
    #[serde(rename = "captionTracks")]
    caption_tracks: Option<Vec<PlayerCaptionTrack>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PlayerCaptionTrack {
    #[serde(rename = "baseUrl")]
    pub(crate) base_url: String,
    #[serde(rename = "languageCode")]
    pub(crate) language_code: String,
    name: Option<TrackName>,
    kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TrackName {
    #[serde(rename = "simpleText")]
    simple_text: Option<String>,
    runs: Option<Vec<TextRun>>,
}

#[derive(Debug, Clone, Deserialize)]
struct TextRun {
    text: String,
}

impl PlayerCaptionTrack {
    pub(crate) fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }

    fn display_name(&self) -> String {
        self.name
            .as_ref()
            .and_then(|n| {
                n.simple_text
                    .clone()
                    .or_else(|| n.runs.as_ref()?.first().map(|r| r.text.clone()))
            })
            .unwrap_or_else(|| self.language_code.clone())
    }

    fn to_track(&self) -> CaptionTrack {
        CaptionTrack {
            language_code: self.language_code.clone(),
            display_name: self.display_name(),
            is_auto_generated: self.is_generated(),
        }
    }
}

impl PlayerResponse {
    /// Fail unless the player says the video can be watched
    pub(crate) fn check_playable(&self, video_id: &str) -> Result<(), CaptionError> {
        let Some(ps) = &self.playability_status else {
            return Ok(());
        };
        let status = ps.status.as_deref().unwrap_or("OK");
        let reason = ps.reason.as_deref().unwrap_or("");
        let lowered = reason.to_lowercase();

        match status {
            "OK" => Ok(()),
            "ERROR" => Err(CaptionError::NotFound(video_id.to_string())),
            "LOGIN_REQUIRED" if lowered.contains("not a bot") => Err(CaptionError::RateLimited),
            "LOGIN_REQUIRED" | "UNPLAYABLE" | "AGE_CHECK_REQUIRED" => {
                debug!("Video {video_id} not playable ({status}): {reason}");
                Err(CaptionError::Forbidden(video_id.to_string()))
            }
            other => Err(CaptionError::Unknown(format!(
                "video {video_id} has playability status {other}: {reason}"
            ))),
        }
    }

    /// Raw caption tracks; an empty list means the video has none
    pub(crate) fn caption_tracks(&self) -> Vec<PlayerCaptionTrack> {
        self.captions
            .as_ref()
            .and_then(|c| c.player_captions_tracklist_renderer.as_ref())
            .and_then(|r| r.caption_tracks.clone())
            .unwrap_or_default()
    }

    /// Manual tracks first, then auto-generated ones
    pub(crate) fn tracks(&self, video_id: &str) -> Result<Vec<CaptionTrack>, CaptionError> {
        self.check_playable(video_id)?;
        let raw = self.caption_tracks();
        if raw.is_empty() {
            return Err(CaptionError::no_captions(video_id, "any"));
        }
        let (generated, manual): (Vec<_>, Vec<_>) = raw.iter().partition(|t| t.is_generated());
        Ok(manual
            .into_iter()
            .chain(generated)
            .map(PlayerCaptionTrack::to_track)
            .collect())
    }

    /// The track to download for `language`
    pub(crate) fn find_track(
        &self,
        video_id: &str,
        language: &str,
    ) -> Result<PlayerCaptionTrack, CaptionError> {
        self.check_playable(video_id)?;
        let raw = self.caption_tracks();
        source::select_track(&raw, language, |t| (t.language_code.as_str(), t.is_generated()))
            .cloned()
            .ok_or_else(|| CaptionError::no_captions(video_id, language))
    }
}

/// Captions via the InnerTube player endpoint, the way YouTube's own web
/// client discovers them.
#[derive(Debug, Default)]
pub struct InnerTubeSource;

impl InnerTubeSource {
    pub fn new() -> Self {
        Self
    }

    async fn player(
        &self,
        client: &reqwest::Client,
        video: &VideoReference,
    ) -> Result<PlayerResponse, CaptionError> {
        // The watch page carries the InnerTube key
        let watch_url = video.watch_url();
        debug!("Fetching watch page: {watch_url}");
        let page_html = source::get_text(client, &watch_url, video.id()).await?;
        if page_html.contains("g-recaptcha") {
            return Err(CaptionError::RateLimited);
        }
        let api_key = extract_api_key(&page_html)?;
        debug!("Extracted InnerTube API key: {api_key}");

        // InnerTube player endpoint
        let player_url =
            format!("https://www.youtube.com/youtubei/v1/player?key={api_key}&prettyPrint=false");
        let body = serde_json::json!({
            "context": {
                "client": {
                    "hl": "en",
                    "gl": "US",
                    "clientName": "WEB",
                    "clientVersion": CLIENT_VERSION
                }
            },
            "videoId": video.id()
        });

        let resp = client.post(&player_url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CaptionError::from_status(status, video.id()));
        }
        resp.json()
            .await
            .map_err(|e| CaptionError::Unknown(format!("error decoding player response: {e}")))
    }
}

#[async_trait]
impl CaptionSource for InnerTubeSource {
    fn name(&self) -> &'static str {
        "transcript-api"
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
        debug!("Using caption track: lang={} generated={}", track.language_code, track.is_generated());

        // Timedtext XML for the chosen track
        let caption_url = track.base_url.replace("&fmt=srv3", "");
        let caption_xml = source::get_text(&client, &caption_url, video.id()).await?;
        parse_caption_xml(&caption_xml)
    }
}

fn extract_api_key(html: &str) -> Result<String, CaptionError> {
    let re = Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#)
        .map_err(|e| CaptionError::Unknown(e.to_string()))?;
    if let Some(caps) = re.captures(html) {
        return Ok(caps[1].to_string());
    }

    // Older pages
    let re2 = Regex::new(r#"innertubeApiKey\s*[=:]\s*"([^"]+)""#)
        .map_err(|e| CaptionError::Unknown(e.to_string()))?;
    if let Some(caps) = re2.captures(html) {
        return Ok(caps[1].to_string());
    }

    Err(CaptionError::Unknown(
        "could not extract InnerTube API key from watch page".to_string(),
    ))
}

fn parse_caption_xml(xml: &str) -> Result<Vec<CaptionEvent>, CaptionError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut events = Vec::new();
    let mut current_start: Option<f64> = None;
    let mut current_dur: Option<f64> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"text" => {
                let mut start = None;
                let mut dur = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"start" => {
                            start = String::from_utf8_lossy(&attr.value).parse::<f64>().ok();
                        }
                        b"dur" => {
                            dur = String::from_utf8_lossy(&attr.value).parse::<f64>().ok();
                        }
                        _ => {}
                    }
                }
                current_start = start;
                // Final caption lines sometimes omit `dur`
                current_dur = dur.or(Some(0.0));
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::Text(ref e)) => {
                if let (Some(start), Some(dur)) = (current_start.take(), current_dur.take()) {
                    let raw_text = e.unescape().unwrap_or_default().to_string();
                    let text = html_escape::decode_html_entities(&raw_text).to_string();
                    if !text.trim().is_empty() {
                        events.push(CaptionEvent {
                            text,
                            start,
                            duration: dur,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CaptionError::Unknown(format!("error parsing caption XML: {e}")));
            }
            _ => {}
        }
    }

    Ok(events)
}
