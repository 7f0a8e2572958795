//! JSON and file endpoints over a [`DayAggregator`].
//!
//! Routes:
//! - `GET /api/days` day summaries, newest first
//! - `GET /api/events/:year/:month/:day` events of one day
//! - `GET /api/files/:year/:month/:day/:filename` raw image or clip bytes,
//!   honouring single `Range: bytes=` requests
//! - `DELETE /api/files/:year/:month/:day` remove one day
//! - `GET /api/debug` layout probe of the storage root
//! - `GET /health`

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::aggregator::DayAggregator;
use crate::config::ViewerConfig;
use crate::error::Error;
use crate::models::{DayDate, DaySummary, Event};
use crate::runtime;
use crate::storage::{self, DirectoryStore, FsStore, LayoutProbe};
use crate::util;

const MODULE_NAME: &str = "snapview";
const FILE_CACHE_CONTROL: &str = "public, max-age=3600";

pub struct AppState<S> {
    pub days: Arc<DayAggregator<S>>,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            days: Arc::clone(&self.days),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S> AppState<S> {
    pub fn new(days: DayAggregator<S>, shutdown: CancellationToken) -> Self {
        Self {
            days: Arc::new(days),
            shutdown,
        }
    }
}

pub fn build_router<S: DirectoryStore + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/days", get(list_days::<S>))
        .route("/api/events/:year/:month/:day", get(day_events::<S>))
        .route("/api/files/:year/:month/:day", delete(delete_day::<S>))
        .route("/api/files/:year/:month/:day/:filename", get(serve_file::<S>))
        .route("/api/debug", get(debug_layout::<S>))
        .route("/health", get(health::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the filesystem tree at `config.root` until SIGINT/SIGTERM.
pub async fn serve(config: ViewerConfig, bind: SocketAddr) -> anyhow::Result<()> {
    let store = FsStore::new(&config.root);
    let root = config.root.clone();
    let shutdown = CancellationToken::new();
    let app = build_router(AppState::new(DayAggregator::new(store, config), shutdown.clone()));

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        root = %root.display(),
        "snapview listening"
    );

    let signals = tokio::spawn(runtime::cancel_on_signal(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server terminated unexpectedly")?;
    signals.abort();
    Ok(())
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidDate(_) | Error::InvalidFileName(_) => ApiError::BadRequest(err.to_string()),
            Error::StoreUnavailable { .. } | Error::Cancelled => {
                ApiError::Unavailable(err.to_string())
            }
            Error::UnknownTimezone(_) | Error::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn day_from_path(year: &str, month: &str, day: &str) -> Result<DayDate, ApiError> {
    DayDate::from_segments(year, month, day)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid day {year}/{month}/{day}")))
}

async fn list_days<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<DaySummary>>, ApiError> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.days.list_days(&cancel).await?))
}

async fn day_events<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Path((year, month, day)): Path<(String, String, String)>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let date = day_from_path(&year, &month, &day)?;
    let cancel = state.shutdown.child_token();
    Ok(Json(state.days.get_day(&date, &cancel).await?))
}

async fn delete_day<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Path((year, month, day)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let date = day_from_path(&year, &month, &day)?;
    if state.days.delete_day(&date).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::Internal(format!("failed to delete {date}")))
    }
}

async fn serve_file<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Path((year, month, day, filename)): Path<(String, String, String, String)>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let date = day_from_path(&year, &month, &day)?;
    let opened = state
        .days
        .open_file(&date, &filename)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file not found: {date}/{filename}")))?;
    let len = opened.len;
    let mut reader = opened.reader;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&filename)));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(FILE_CACHE_CONTROL));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    let disposition = format!("inline; filename=\"{}\"", header_safe(&filename));
    headers.insert(header::CONTENT_DISPOSITION, header_value(disposition)?);

    let requested = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    match requested.map_or(ByteRange::Full, |value| parse_range(value, len)) {
        ByteRange::Full => {
            headers.insert(header::CONTENT_LENGTH, header_value(len.to_string())?);
            let body = Body::from_stream(ReaderStream::new(reader));
            Ok((StatusCode::OK, headers, body).into_response())
        }
        ByteRange::Partial { start, end } => {
            reader
                .seek(SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::Internal(format!("failed to seek {date}/{filename}: {err}")))?;
            let length = end - start + 1;
            headers.insert(header::CONTENT_LENGTH, header_value(length.to_string())?);
            headers.insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{len}"))?,
            );
            let body = Body::from_stream(ReaderStream::new(reader.take(length)));
            Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
        }
        ByteRange::Unsatisfiable => {
            headers.insert(header::CONTENT_RANGE, header_value(format!("bytes */{len}"))?);
            Ok((StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response())
        }
    }
}

fn header_value(value: String) -> Result<HeaderValue, ApiError> {
    HeaderValue::try_from(value).map_err(|err| ApiError::Internal(format!("invalid header: {err}")))
}

/// Outcome of a `Range` header against a file of known length. Inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Single ranges only. Multi-range and malformed headers fall back to the whole file.
fn parse_range(value: &str, len: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // suffix form: the final `last` bytes
        return match last.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if len == 0 => ByteRange::Unsatisfiable,
            Ok(suffix) => ByteRange::Partial {
                start: len.saturating_sub(suffix),
                end: len - 1,
            },
            Err(_) => ByteRange::Full,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) => Some(end),
            Err(_) => return ByteRange::Full,
        }
    };
    if end.is_some_and(|end| end < start) {
        return ByteRange::Full;
    }
    if start >= len {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial {
        start,
        end: end.map_or(len - 1, |end| end.min(len - 1)),
    }
}

pub fn content_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "mp4" => "video/mp4",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

fn header_safe(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"') || c == ' ' { c } else { '_' })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    module: &'static str,
    version: String,
    timestamp: DateTime<Utc>,
    root: String,
    checks: HealthChecks,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthChecks {
    root_accessible: bool,
    year_directories: Vec<String>,
    errors: Vec<String>,
}

async fn health<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
) -> (StatusCode, Json<HealthResponse>) {
    let store = state.days.store();
    let mut checks = HealthChecks::default();
    match store.probe_root().await {
        Ok(()) => checks.root_accessible = true,
        Err(err) => checks.errors.push(format!("storage root not accessible: {err}")),
    }
    if checks.root_accessible {
        match store.list_entries(std::path::Path::new("")).await {
            Ok(entries) => {
                checks.year_directories = entries
                    .into_iter()
                    .filter(|entry| entry.is_dir)
                    .map(|entry| entry.name)
                    .collect()
            }
            Err(err) => checks.errors.push(format!("failed to read storage root: {err}")),
        }
    }

    let (status, label) = if checks.root_accessible {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "error")
    };
    let body = HealthResponse {
        status: label,
        module: MODULE_NAME,
        version: util::tool_version(),
        timestamp: util::now_utc(),
        root: store.root().display().to_string(),
        checks,
    };
    (status, Json(body))
}

async fn debug_layout<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<LayoutProbe>, ApiError> {
    let root = state.days.store().root().to_path_buf();
    let probe = tokio::task::spawn_blocking(move || storage::probe_layout(&root))
        .await
        .map_err(|err| ApiError::Internal(format!("layout probe failed: {err}")))?;
    Ok(Json(probe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("a_01_20241225143000.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn disposition_names_stay_ascii() {
        assert_eq!(header_safe("Hof Süd_01.jpg"), "Hof S_d_01.jpg");
        assert_eq!(header_safe("a\"b.mp4"), "a_b.mp4");
    }

    #[test]
    fn range_headers_resolve_against_the_file_length() {
        assert_eq!(parse_range("bytes=0-3", 4096), ByteRange::Partial { start: 0, end: 3 });
        assert_eq!(parse_range("bytes=100-", 4096), ByteRange::Partial { start: 100, end: 4095 });
        assert_eq!(parse_range("bytes=4000-9999", 4096), ByteRange::Partial { start: 4000, end: 4095 });
        assert_eq!(parse_range("bytes=-96", 4096), ByteRange::Partial { start: 4000, end: 4095 });
        assert_eq!(parse_range("bytes=-10000", 4096), ByteRange::Partial { start: 0, end: 4095 });
        assert_eq!(parse_range("bytes=4096-", 4096), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 4096), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-", 0), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=5-2", 4096), ByteRange::Full);
        assert_eq!(parse_range("bytes=0-1,5-9", 4096), ByteRange::Full);
        assert_eq!(parse_range("items=0-3", 4096), ByteRange::Full);
        assert_eq!(parse_range("bytes=abc", 4096), ByteRange::Full);
    }

    #[test]
    fn library_errors_map_to_statuses() {
        let cases = [
            (Error::InvalidDate("x".into()), StatusCode::BAD_REQUEST),
            (Error::InvalidFileName("..".into()), StatusCode::BAD_REQUEST),
            (Error::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::Io(std::io::Error::other("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
