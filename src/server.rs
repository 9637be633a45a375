//! HTTP endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::CaptionError;
use crate::output::{self, SubtitleFormat};
use crate::service::TranscriptService;
use crate::{CaptionEvent, VideoReference};

#[derive(Clone)]
pub struct AppState {
    service: Arc<TranscriptService>,
    default_language: Arc<str>,
}

impl AppState {
    pub fn new(service: TranscriptService, default_language: &str) -> Self {
        Self {
            service: Arc::new(service),
            default_language: Arc::from(default_language),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get_transcripts", post(get_transcripts))
        .route("/fetch_transcript", post(fetch_transcript))
        .route("/download_transcript", post(download_transcript))
        .route("/get_transcript", post(get_transcript))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<CaptionError> for ApiError {
    fn from(err: CaptionError) -> Self {
        Self {
            status: err.status(),
            message: err.user_message(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_video(input: Option<&str>) -> ApiResult<VideoReference> {
    let input = input
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Please provide a YouTube video URL."))?;
    VideoReference::parse(input).ok_or_else(|| ApiError::bad_request("Invalid URL."))
}

#[derive(Debug, Deserialize)]
pub struct TracksRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Language {
    code: String,
    name: String,
}

#[derive(Debug, Serialize)]
pub struct TracksResponse {
    languages: Vec<Language>,
}

async fn get_transcripts(
    State(state): State<AppState>,
    payload: Result<Json<TracksRequest>, JsonRejection>,
) -> ApiResult<Json<TracksResponse>> {
    let Json(req) = payload?;
    info!("Track listing requested for {:?}", req.url);
    let video = parse_video(req.url.as_deref())?;

    let tracks = state.service.list_tracks(&video).await.map_err(|e| {
        warn!("Listing tracks of {} failed: {e}", video.url());
        ApiError::from(e)
    })?;
    if tracks.is_empty() {
        return Err(CaptionError::no_captions(video.id(), "any").into());
    }

    let languages = tracks
        .iter()
        .map(|t| Language {
            code: t.language_code.clone(),
            name: t.label(),
        })
        .collect();
    Ok(Json(TracksResponse { languages }))
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    video_id: Option<String>,
    url: Option<String>,
    lang_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    transcript: String,
    raw: Vec<CaptionEvent>,
}

/// Every failure here answers 404, whatever its cause
async fn fetch_transcript(
    State(state): State<AppState>,
    payload: Result<Json<FetchRequest>, JsonRejection>,
) -> ApiResult<Json<FetchResponse>> {
    let Json(req) = payload?;
    let video = parse_video(req.video_id.as_deref().or(req.url.as_deref()))?;
    let language = req
        .lang_code
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| state.default_language.to_string());
    info!("Transcript requested for {} ({language})", video.id());

    match state.service.fetch_events(&video, &language).await {
        Ok(events) => Ok(Json(FetchResponse {
            transcript: output::render_text(&events),
            raw: events,
        })),
        Err(e) => {
            warn!("Fetching transcript of {} ({language}) failed: {e}", video.url());
            Err(ApiError::not_found(e.user_message()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    text: String,
    format: Option<String>,
    #[serde(default)]
    raw: Vec<CaptionEvent>,
}

async fn download_transcript(payload: Result<Json<DownloadRequest>, JsonRejection>) -> ApiResult<Response> {
    let Json(req) = payload?;
    let format = SubtitleFormat::parse(req.format.as_deref().unwrap_or("txt"));
    info!("Download requested as {} ({} events)", format.extension(), req.raw.len());
    let body = output::render(&format, &req.text, &req.raw);

    let headers = [
        (header::CONTENT_TYPE, "text/plain".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", format.file_name()),
        ),
    ];
    Ok((headers, body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CachedRequest {
    video_url: Option<String>,
    language_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CachedResponse {
    transcript: String,
}

async fn get_transcript(
    State(state): State<AppState>,
    payload: Result<Json<CachedRequest>, JsonRejection>,
) -> ApiResult<Json<CachedResponse>> {
    let Json(req) = payload?;
    info!("Cached transcript requested for {:?}", req.video_url);
    let video = parse_video(req.video_url.as_deref())?;
    let language = req
        .language_code
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| state.default_language.to_string());

    let transcript = state
        .service
        .cached_transcript(&video, &language)
        .await
        .map_err(|e| {
            warn!("Cached transcript of {} ({language}) failed: {e}", video.url());
            ApiError::from(e)
        })?;
    Ok(Json(CachedResponse { transcript }))
}
