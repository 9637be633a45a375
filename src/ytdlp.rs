use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::CaptionError;
use crate::proxy::proxy_url;
use crate::source::{self, CaptionSource};
use crate::{CaptionEvent, CaptionTrack, VideoReference};

const DUMP_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Default, Deserialize)]
struct InfoDump {
    #[serde(default)]
    subtitles: BTreeMap<String, Vec<SubtitleFormat>>,
    #[serde(default)]
    automatic_captions: BTreeMap<String, Vec<SubtitleFormat>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubtitleFormat {
    ext: Option<String>,
    url: Option<String>,
    name: Option<String>,
}

impl InfoDump {
    /// Manual tracks, then machine tracks in the spoken language(s).
    /// Machine translations of the automatic track are left out.
    fn tracks(&self) -> Vec<CaptionTrack> {
        let manual = self
            .subtitles
            .iter()
            .filter(|(code, _)| code.as_str() != "live_chat")
            .map(|(code, formats)| to_track(code, formats, false));
        let automatic = self
            .automatic_captions
            .iter()
            .filter(|(_, formats)| !is_translation(formats))
            .map(|(code, formats)| to_track(code, formats, true));
        manual.chain(automatic).collect()
    }

    fn json3_url(&self, language: &str) -> Option<&str> {
        json3_in(&self.subtitles, language).or_else(|| json3_in(&self.automatic_captions, language))
    }
}

fn json3_in<'a>(map: &'a BTreeMap<String, Vec<SubtitleFormat>>, language: &str) -> Option<&'a str> {
    map.get(language)?
        .iter()
        .find(|f| f.ext.as_deref() == Some("json3"))
        .and_then(|f| f.url.as_deref())
}

fn is_translation(formats: &[SubtitleFormat]) -> bool {
    formats
        .iter()
        .filter_map(|f| f.url.as_deref())
        .any(|url| url.contains("tlang="))
}

fn to_track(code: &str, formats: &[SubtitleFormat], is_auto_generated: bool) -> CaptionTrack {
    let display_name = formats
        .iter()
        .find_map(|f| f.name.clone())
        .unwrap_or_else(|| code.to_string());
    CaptionTrack {
        language_code: code.to_string(),
        display_name,
        is_auto_generated,
    }
}

/// Classify a failed yt-dlp run by its stderr
fn classify_failure(stderr: &str, video_id: &str) -> CaptionError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("http error 429") || lowered.contains("not a bot") {
        CaptionError::RateLimited
    } else if lowered.contains("private video") || lowered.contains("not available in your country") {
        CaptionError::Forbidden(video_id.to_string())
    } else if lowered.contains("video unavailable") || lowered.contains("does not exist") {
        CaptionError::NotFound(video_id.to_string())
    } else if lowered.contains("unable to download")
        || lowered.contains("timed out")
        || lowered.contains("connection")
        || lowered.contains("proxy")
    {
        CaptionError::Transport(last_line(stderr))
    } else {
        CaptionError::Unknown(last_line(stderr))
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("yt-dlp failed")
        .trim()
        .to_string()
}

/// Captions discovered through a local yt-dlp install
#[derive(Debug)]
pub struct YtDlpSource {
    binary: String,
}

impl YtDlpSource {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn dump(&self, video: &VideoReference, proxy: Option<&str>) -> Result<InfoDump, CaptionError> {
        let url = video.watch_url();
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--dump-single-json", "--skip-download", "--no-warnings", "--no-playlist"]);
        if let Some(entry) = proxy {
            cmd.args(["--proxy", proxy_url(entry).as_str()]);
        }
        cmd.arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {} for {url}", self.binary);
        let output = match tokio::time::timeout(DUMP_TIMEOUT, cmd.output()).await {
            Err(_) => {
                return Err(CaptionError::Transport(format!(
                    "{} timed out after {}s",
                    self.binary,
                    DUMP_TIMEOUT.as_secs()
                )));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaptionError::Unknown(format!(
                    "{} not found. Install it to use the media-extractor source",
                    self.binary
                )));
            }
            Ok(Err(e)) => {
                return Err(CaptionError::Unknown(format!("failed to run {}: {e}", self.binary)));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("{} exited with {}: {stderr}", self.binary, output.status);
            return Err(classify_failure(&stderr, video.id()));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| CaptionError::Unknown(format!("error decoding yt-dlp output: {e}")))
    }
}

#[async_trait]
impl CaptionSource for YtDlpSource {
    fn name(&self) -> &'static str {
        "media-extractor"
    }

    async fn list_tracks(
        &self,
        video: &VideoReference,
        proxy: Option<&str>,
    ) -> Result<Vec<CaptionTrack>, CaptionError> {
        let tracks = self.dump(video, proxy).await?.tracks();
        if tracks.is_empty() {
            return Err(CaptionError::no_captions(video.id(), "any"));
        }
        Ok(tracks)
    }

    async fn fetch_transcript(
        &self,
        video: &VideoReference,
        language: &str,
        proxy: Option<&str>,
    ) -> Result<Vec<CaptionEvent>, CaptionError> {
        let info = self.dump(video, proxy).await?;
        let url = info
            .json3_url(language)
            .ok_or_else(|| CaptionError::no_captions(video.id(), language))?;
        let client = source::http_client(proxy)?;
        let body = source::get_text(&client, url, video.id()).await?;
        source::parse_json3(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"{
        "id": "abc",
        "subtitles": {
            "de": [{"ext": "vtt", "url": "https://x/de.vtt", "name": "German"},
                   {"ext": "json3", "url": "https://x/de.json3", "name": "German"}],
            "live_chat": [{"ext": "json", "url": "https://x/chat"}]
        },
        "automatic_captions": {
            "en": [{"ext": "json3", "url": "https://x/api/timedtext?lang=en&fmt=json3", "name": "English"}],
            "fr": [{"ext": "json3", "url": "https://x/api/timedtext?lang=en&tlang=fr&fmt=json3", "name": "French"}]
        }
    }"#;

    fn dump() -> InfoDump {
        serde_json::from_str(DUMP).unwrap()
    }

    #[test]
    fn test_tracks_from_dump() {
        let tracks = dump().tracks();
        assert_eq!(
            tracks,
            vec![
                CaptionTrack {
                    language_code: "de".into(),
                    display_name: "German".into(),
                    is_auto_generated: false,
                },
                CaptionTrack {
                    language_code: "en".into(),
                    display_name: "English".into(),
                    is_auto_generated: true,
                },
            ]
        );
    }

    #[test]
    fn test_json3_url_prefers_manual() {
        let info = dump();
        assert_eq!(info.json3_url("de"), Some("https://x/de.json3"));
        assert_eq!(
            info.json3_url("en"),
            Some("https://x/api/timedtext?lang=en&fmt=json3")
        );
        assert_eq!(info.json3_url("es"), None);
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Private video. Sign in", "abc"),
            CaptionError::Forbidden("abc".into())
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Video unavailable", "abc"),
            CaptionError::NotFound("abc".into())
        );
        assert_eq!(
            classify_failure("ERROR: unable to download webpage: HTTP Error 429", "abc"),
            CaptionError::RateLimited
        );
        assert!(matches!(
            classify_failure("ERROR: Unable to download webpage: timed out", "abc"),
            CaptionError::Transport(_)
        ));
        assert!(matches!(classify_failure("boom", "abc"), CaptionError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let source = YtDlpSource::new("ytxd-no-such-binary");
        let video = VideoReference::parse("dQw4w9WgXcQ").unwrap();
        let err = source.list_tracks(&video, None).await.unwrap_err();
        assert!(matches!(err, CaptionError::Unknown(msg) if msg.contains("not found")));
    }
}
