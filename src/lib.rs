pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod output;
pub mod proxy;
pub mod retry;
pub mod server;
pub mod service;
pub mod source;
pub mod watch_page;
pub mod youtube;
pub mod ytdlp;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single timed caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionEvent {
    pub text: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
}

impl CaptionEvent {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// One language variant of captions offered for a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptionTrack {
    pub language_code: String,
    pub display_name: String,
    pub is_auto_generated: bool,
}

impl CaptionTrack {
    /// Name shown to users; machine tracks carry a suffix so they can be told apart
    pub fn label(&self) -> String {
        if self.is_auto_generated {
            format!("{} (auto-generated)", self.display_name)
        } else {
            self.display_name.clone()
        }
    }
}

/// A video identifier together with the input it was parsed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoReference {
    id: String,
    url: String,
}

impl VideoReference {
    pub fn parse(input: &str) -> Option<Self> {
        extract_video_id(input).map(|id| Self {
            id,
            url: input.trim().to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

static VIDEO_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Bare 11-character video ID
        r"^([a-zA-Z0-9_-]{11})$",
        // youtube.com/watch?v=ID
        r"youtube\.com/watch\?.*v=([a-zA-Z0-9_-]{11})",
        r"youtu\.be/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/embed/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/shorts/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/live/([a-zA-Z0-9_-]{11})",
        // Anything else carrying an ID after `v=` or a slash
        r"(?:v=|/)([a-zA-Z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static video id pattern"))
    .collect()
});

/// Extract video ID from various YouTube URL formats
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();

    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(input))
        .map(|caps| caps[1].to_string())
}
