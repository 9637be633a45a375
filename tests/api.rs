use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;

use ytxd::cache::MemoryCache;
use ytxd::error::CaptionError;
use ytxd::limiter::RateLimiter;
use ytxd::proxy::ProxyPool;
use ytxd::retry::{Retrier, RetryPolicy};
use ytxd::server::{self, AppState};
use ytxd::service::TranscriptService;
use ytxd::source::CaptionSource;
use ytxd::{CaptionEvent, CaptionTrack, VideoReference};

/// Answers every call with the same canned outcome and counts the calls
struct FakeSource {
    calls: AtomicUsize,
    outcome: Result<Vec<CaptionEvent>, CaptionError>,
    tracks: Vec<CaptionTrack>,
}

impl FakeSource {
    fn ok(events: Vec<CaptionEvent>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(events),
            tracks: vec![
                CaptionTrack {
                    language_code: "en".into(),
                    display_name: "English".into(),
                    is_auto_generated: false,
                },
                CaptionTrack {
                    language_code: "de".into(),
                    display_name: "German".into(),
                    is_auto_generated: true,
                },
            ],
        })
    }

    fn failing(err: CaptionError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Err(err),
            tracks: Vec::new(),
        })
    }

    fn without_tracks() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(Vec::new()),
            tracks: Vec::new(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptionSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list_tracks(
        &self,
        _video: &VideoReference,
        _proxy: Option<&str>,
    ) -> Result<Vec<CaptionTrack>, CaptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()?;
        Ok(self.tracks.clone())
    }

    async fn fetch_transcript(
        &self,
        _video: &VideoReference,
        _language: &str,
        _proxy: Option<&str>,
    ) -> Result<Vec<CaptionEvent>, CaptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

fn event(text: &str, start: f64, duration: f64) -> CaptionEvent {
    CaptionEvent {
        text: text.to_string(),
        start,
        duration,
    }
}

fn quick_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        initial_delay: Duration::from_millis(10),
        jitter: (Duration::ZERO, Duration::ZERO),
    }
}

fn app(source: Arc<FakeSource>) -> axum::Router {
    let service = TranscriptService::uncached(source, quick_policy(3));
    server::router(AppState::new(service, "en"))
}

fn cached_app(source: Arc<FakeSource>) -> axum::Router {
    let retrier = Retrier::new(
        quick_policy(3),
        Arc::new(RateLimiter::unlimited()),
        Arc::new(ProxyPool::direct()),
    );
    let service = TranscriptService::new(
        source,
        retrier,
        Arc::new(MemoryCache::new()),
        Duration::from_secs(3600),
    );
    server::router(AppState::new(service, "en"))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

#[tokio::test]
async fn test_download_txt() {
    let resp = app(FakeSource::ok(vec![]))
        .oneshot(post_json("/download_transcript", json!({"text": "hello", "format": "txt"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=transcript.txt"
    );
    assert_eq!(body_text(resp).await, "hello");
}

#[tokio::test]
async fn test_download_srt() {
    let body = json!({
        "text": "ignored",
        "format": "srt",
        "raw": [{"text": "hi", "start": 0.0, "duration": 1.5}],
    });
    let resp = app(FakeSource::ok(vec![]))
        .oneshot(post_json("/download_transcript", body))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=transcript.srt"
    );
    assert_eq!(body_text(resp).await, "1\n00:00:00,000 --> 00:00:01,500\nhi\n\n");
}

#[tokio::test]
async fn test_download_vtt() {
    let body = json!({
        "format": "vtt",
        "raw": [{"text": "hi", "start": 65.4, "duration": 1.0}],
    });
    let resp = app(FakeSource::ok(vec![]))
        .oneshot(post_json("/download_transcript", body))
        .await
        .unwrap();

    assert_eq!(
        body_text(resp).await,
        "WEBVTT\n\n00:01:05.400 --> 00:01:06.400\nhi\n\n"
    );
}

#[tokio::test]
async fn test_download_unsafe_format_name() {
    let body = json!({"text": "hello", "format": "../../x"});
    let resp = app(FakeSource::ok(vec![]))
        .oneshot(post_json("/download_transcript", body))
        .await
        .unwrap();

    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=transcript.txt"
    );
    assert_eq!(body_text(resp).await, "hello");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let req = Request::builder()
        .method("POST")
        .uri("/get_transcript")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app(FakeSource::ok(vec![])).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn test_unparseable_url_is_bad_request() {
    let source = FakeSource::ok(vec![event("a", 0.0, 1.0)]);
    let resp = app(source.clone())
        .oneshot(post_json("/get_transcript", json!({"video_url": "https://example.com/nope"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await, json!({"error": "Invalid URL."}));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_missing_url_is_bad_request() {
    let resp = app(FakeSource::ok(vec![]))
        .oneshot(post_json("/get_transcripts", json!({})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_transcript_is_cached() {
    let source = FakeSource::ok(vec![event("first", 0.0, 1.0), event("second", 1.0, 1.0)]);
    let app = cached_app(source.clone());
    let body = json!({"video_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "language_code": "en"});

    let first = app.clone().oneshot(post_json("/get_transcript", body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await;

    let second = app.oneshot(post_json("/get_transcript", body)).await.unwrap();
    let second = body_json(second).await;

    assert_eq!(first, json!({"transcript": "first\nsecond"}));
    assert_eq!(first, second);
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_exhausts_attempts() {
    let source = FakeSource::failing(CaptionError::RateLimited);
    let resp = app(source.clone())
        .oneshot(post_json("/get_transcript", json!({"video_url": "dQw4w9WgXcQ"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(body_json(resp).await["error"].is_string());
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_terminal_errors_map_to_status() {
    let cases = [
        (CaptionError::NotFound("dQw4w9WgXcQ".into()), StatusCode::NOT_FOUND),
        (CaptionError::Forbidden("dQw4w9WgXcQ".into()), StatusCode::FORBIDDEN),
        (CaptionError::no_captions("dQw4w9WgXcQ", "en"), StatusCode::NOT_FOUND),
    ];
    for (err, status) in cases {
        let source = FakeSource::failing(err);
        let resp = app(source.clone())
            .oneshot(post_json("/get_transcript", json!({"video_url": "https://youtu.be/dQw4w9WgXcQ"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), status);
        assert_eq!(source.calls(), 1);
    }
}

#[tokio::test]
async fn test_fetch_transcript() {
    let source = FakeSource::ok(vec![event("Hello world", 0.0, 1.5), event("again", 1.5, 2.0)]);
    let resp = app(source)
        .oneshot(post_json("/fetch_transcript", json!({"video_id": "dQw4w9WgXcQ", "lang_code": "en"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["transcript"], "Hello world\nagain");
    assert_eq!(body["raw"][1], json!({"text": "again", "start": 1.5, "duration": 2.0}));
}

#[tokio::test]
async fn test_fetch_transcript_failure_is_not_found() {
    let source = FakeSource::failing(CaptionError::Forbidden("dQw4w9WgXcQ".into()));
    let resp = app(source)
        .oneshot(post_json("/fetch_transcript", json!({"video_id": "dQw4w9WgXcQ"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn test_get_transcripts_lists_languages() {
    let resp = app(FakeSource::ok(vec![]))
        .oneshot(post_json("/get_transcripts", json!({"url": "https://www.youtube.com/shorts/dQw4w9WgXcQ"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({"languages": [
            {"code": "en", "name": "English"},
            {"code": "de", "name": "German (auto-generated)"},
        ]})
    );
}

#[tokio::test(start_paused = true)]
async fn test_get_transcripts_error_statuses() {
    let cases = [
        (CaptionError::NotFound("dQw4w9WgXcQ".into()), StatusCode::NOT_FOUND, 1),
        (CaptionError::no_captions("dQw4w9WgXcQ", "any"), StatusCode::NOT_FOUND, 1),
        (CaptionError::Forbidden("dQw4w9WgXcQ".into()), StatusCode::FORBIDDEN, 1),
        (CaptionError::RateLimited, StatusCode::TOO_MANY_REQUESTS, 3),
        (CaptionError::Transport("reset".into()), StatusCode::INTERNAL_SERVER_ERROR, 3),
        (CaptionError::Unknown("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, 1),
    ];
    for (err, status, attempts) in cases {
        let source = FakeSource::failing(err.clone());
        let resp = app(source.clone())
            .oneshot(post_json("/get_transcripts", json!({"url": "https://youtu.be/dQw4w9WgXcQ"})))
            .await
            .unwrap();

        assert_eq!(resp.status(), status, "{err:?}");
        assert!(body_json(resp).await["error"].is_string(), "{err:?}");
        assert_eq!(source.calls(), attempts, "{err:?}");
    }
}

#[tokio::test]
async fn test_get_transcripts_without_tracks_is_not_found() {
    let source = FakeSource::without_tracks();
    let resp = app(source.clone())
        .oneshot(post_json("/get_transcripts", json!({"url": "dQw4w9WgXcQ"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_json(resp).await["error"].is_string());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_get_transcript_unknown_error_is_server_error() {
    let source = FakeSource::failing(CaptionError::Unknown("boom".into()));
    let resp = app(source)
        .oneshot(post_json("/get_transcript", json!({"video_url": "dQw4w9WgXcQ"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(resp).await["error"].is_string());
}
