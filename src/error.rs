use reqwest::StatusCode;
use thiserror::Error;

/// Failure reported by a caption backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptionError {
    #[error("video {0} not found")]
    NotFound(String),

    #[error("video {0} is private or blocked")]
    Forbidden(String),

    #[error("no captions for video {video_id} in language {language}")]
    NoCaptions { video_id: String, language: String },

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl CaptionError {
    pub fn no_captions(video_id: &str, language: &str) -> Self {
        Self::NoCaptions {
            video_id: video_id.to_string(),
            language: language.to_string(),
        }
    }

    /// Transient failures worth another attempt through a different egress
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transport(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::NoCaptions { .. } => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Transport(_) | Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human readable text shown to API clients
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(_) => "Video unavailable or invalid URL.".to_string(),
            Self::Forbidden(_) => "This video is private or not available in this region.".to_string(),
            Self::NoCaptions { .. } => "No transcript is available for this video in the requested language.".to_string(),
            Self::RateLimited => "Too many requests. Please try again in a few minutes.".to_string(),
            Self::Transport(_) => "Could not reach YouTube. Please check the proxy settings.".to_string(),
            Self::Unknown(msg) => format!("Unexpected error: {msg}"),
        }
    }

    /// Classify a non-success upstream HTTP status
    pub fn from_status(status: StatusCode, video_id: &str) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited,
            StatusCode::FORBIDDEN => Self::Forbidden(video_id.to_string()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Self::NotFound(video_id.to_string()),
            s if s.is_server_error() => Self::Transport(format!("upstream returned {s}")),
            s => Self::Unknown(format!("upstream returned {s}")),
        }
    }
}

impl From<reqwest::Error> for CaptionError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Self::RateLimited;
            }
            if status.is_server_error() {
                return Self::Transport(err.to_string());
            }
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return Self::Transport(err.to_string());
        }
        Self::Unknown(err.to_string())
    }
}
