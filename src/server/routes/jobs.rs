//! `/api/jobs` handlers: create, list, detail, logs, and artifacts.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::cursor::Cursor;
use crate::errors::ApiError;
use crate::ids::new_job_id;
use crate::jobdoc::{JobDir, JobDocument, Limits, LogLine, Policy, Runner};
use crate::store::{JobStatus, ListFilter, RunnerKind};
use crate::time::{format_rfc3339_millis, now_rfc3339_millis, now_truncated_to_secs};

use crate::server::app::AppState;

static URL_HOST_RE: OnceLock<Regex> = OnceLock::new();

fn url_host_re() -> &'static Regex {
    URL_HOST_RE.get_or_init(|| Regex::new(r"https?://([^/\s]+)").expect("valid regex"))
}

fn request_meta() -> (String, String) {
    (crate::ids::new_request_id(), now_rfc3339_millis())
}

// ---------------------------------------------------------------------
// POST /api/jobs
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobCreateRequest {
    command: String,
    #[serde(default)]
    policy: Option<Policy>,
    #[serde(default)]
    runner: Option<RunnerKind>,
}

#[derive(Debug, Serialize)]
struct LinksView {
    #[serde(rename = "self")]
    self_: String,
    logs: String,
    artifacts: String,
}

/// A job's summary shape, shared by the create response and list items.
/// Envelope fields (`request_id`, `server_time_utc`) live only on the
/// response that embeds this, never per-item.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    job_id: String,
    status: JobStatus,
    command: String,
    created_at: String,
    links: LinksView,
}

#[derive(Debug, Serialize)]
struct JobCreateResponse {
    #[serde(flatten)]
    summary: JobSummary,
    request_id: String,
    server_time_utc: String,
}

/// Extract every `http(s)://HOST` host from `command`, lowercased.
fn extract_hosts(command: &str) -> Vec<String> {
    url_host_re()
        .captures_iter(command)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

fn check_allowlist(command: &str, policy: &Policy) -> Result<(), ApiError> {
    let Some(allowlist) = &policy.allowlist_domains else {
        return Ok(());
    };
    let allowlist: Vec<String> = allowlist.iter().map(|h| h.to_ascii_lowercase()).collect();
    for host in extract_hosts(command) {
        if !allowlist.contains(&host) {
            return Err(ApiError::PolicyDenied(format!(
                "host '{host}' is not in the allowlist"
            )));
        }
    }
    Ok(())
}

pub async fn create_job(
    Extension(state): Extension<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: JobCreateRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::validation(format!("invalid request body: {err}")))?;

    if req.command.trim().is_empty() {
        return Err(ApiError::validation_field("command must not be empty", "command"));
    }

    if let Some(policy) = &req.policy {
        check_allowlist(&req.command, policy)?;
    }

    let job_id = new_job_id();
    let created_at = now_truncated_to_secs();
    let runner = Runner::requested_only(req.runner);

    state
        .store
        .insert_queued(&job_id, &req.command, created_at, req.runner, None)
        .await
        .map_err(ApiError::Internal)?;

    let job_dir = JobDir::new(&state.jobs_dir, &job_id);
    job_dir.ensure_dirs().await.map_err(ApiError::Internal)?;
    let doc = JobDocument::new_skeleton(
        job_id.clone(),
        req.command.clone(),
        created_at,
        req.policy,
        runner,
    );
    job_dir.write_document(&doc).await.map_err(ApiError::Internal)?;

    let (request_id, server_time_utc) = request_meta();
    let summary = JobSummary {
        job_id: job_id.clone(),
        status: JobStatus::Queued,
        command: req.command,
        created_at: format_rfc3339_millis(created_at),
        links: LinksView {
            self_: format!("/api/jobs/{job_id}"),
            logs: format!("/api/jobs/{job_id}/logs"),
            artifacts: format!("/api/jobs/{job_id}/artifacts"),
        },
    };

    Ok((
        StatusCode::CREATED,
        Json(JobCreateResponse {
            summary,
            request_id,
            server_time_utc,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------
// GET /api/jobs
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct JobListResponse {
    items: Vec<JobSummary>,
    next_cursor: Option<String>,
    request_id: String,
    server_time_utc: String,
}

pub async fn list_jobs(
    Extension(state): Extension<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !body.is_empty() {
        return Err(ApiError::validation("GET /api/jobs does not accept a request body"));
    }

    let status = params
        .get("status")
        .map(|s| s.parse::<JobStatus>())
        .transpose()
        .map_err(|_| ApiError::validation_field("unknown status filter", "status"))?;

    let q = params.get("q").cloned();

    let limit: i64 = match params.get("limit") {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| (1..=200).contains(n))
            .ok_or_else(|| ApiError::validation_field("limit must be an integer in 1..=200", "limit"))?,
        None => 50,
    };

    let cursor = match params.get("cursor") {
        Some(raw) => Some(
            Cursor::decode(raw).map_err(|_| ApiError::validation_field("malformed cursor", "cursor"))?,
        ),
        None => None,
    };

    let page = state
        .store
        .list(ListFilter { status, q }, limit, cursor)
        .await
        .map_err(ApiError::Internal)?;

    let (request_id, server_time_utc) = request_meta();
    let items = page
        .items
        .into_iter()
        .map(|row| JobSummary {
            job_id: row.job_id.clone(),
            status: row.status,
            command: row.command,
            created_at: format_rfc3339_millis(row.created_at),
            links: LinksView {
                self_: format!("/api/jobs/{}", row.job_id),
                logs: format!("/api/jobs/{}/logs", row.job_id),
                artifacts: format!("/api/jobs/{}/artifacts", row.job_id),
            },
        })
        .collect();

    Ok(Json(JobListResponse {
        items,
        next_cursor: page.next_cursor.map(|c| c.encode()),
        request_id,
        server_time_utc,
    })
    .into_response())
}

// ---------------------------------------------------------------------
// GET /api/jobs/{job_id}
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AttemptView {
    attempt_id: String,
    status: crate::jobdoc::AttemptStatus,
    started_at: String,
    finished_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct ArtifactView {
    name: String,
    content_type: String,
    size_bytes: u64,
}

#[derive(Debug, Serialize)]
struct LimitsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_runtime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_mb: Option<u64>,
}

impl From<&Limits> for LimitsView {
    fn from(limits: &Limits) -> Self {
        Self {
            max_runtime_seconds: limits.max_runtime_seconds.or(limits.time_limit_seconds),
            max_output_mb: limits.max_output_mb,
        }
    }
}

#[derive(Debug, Serialize)]
struct PolicyView {
    #[serde(skip_serializing_if = "Option::is_none")]
    allowlist_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limits: Option<LimitsView>,
}

#[derive(Debug, Serialize)]
struct JobDetailResponse {
    job_id: String,
    status: JobStatus,
    command: String,
    created_at: String,
    completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<PolicyView>,
    runner: Runner,
    attempts: Vec<AttemptView>,
    artifacts_manifest: Vec<ArtifactView>,
    links: crate::jobdoc::Links,
    request_id: String,
    server_time_utc: String,
}

async fn load_document(state: &AppState, job_id: &str) -> Result<JobDocument, ApiError> {
    state
        .store
        .get(job_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound(format!("job '{job_id}' not found")))?;

    JobDir::new(&state.jobs_dir, job_id)
        .read_document()
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job '{job_id}' not found")))
}

pub async fn get_job(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let doc = load_document(&state, &job_id).await?;

    let policy = doc.policy.as_ref().map(|p| PolicyView {
        allowlist_domains: p.allowlist_domains.clone(),
        limits: p.limits.as_ref().map(LimitsView::from),
    });

    let attempts = doc
        .attempts
        .iter()
        .map(|a| AttemptView {
            attempt_id: a.attempt_id.clone(),
            status: a.status,
            started_at: format_rfc3339_millis(a.started_at),
            finished_at: a.finished_at.map(format_rfc3339_millis),
        })
        .collect();

    let artifacts_manifest = doc
        .artifacts_manifest
        .iter()
        .map(|a| ArtifactView {
            name: a.name.clone(),
            content_type: a.content_type.clone(),
            size_bytes: a.size_bytes,
        })
        .collect();

    let (request_id, server_time_utc) = request_meta();
    Ok(Json(JobDetailResponse {
        job_id: doc.job_id,
        status: doc.status,
        command: doc.command,
        created_at: format_rfc3339_millis(doc.created_at),
        completed_at: doc.completed_at.map(format_rfc3339_millis),
        policy,
        runner: doc.runner,
        attempts,
        artifacts_manifest,
        links: doc.links,
        request_id,
        server_time_utc,
    })
    .into_response())
}

// ---------------------------------------------------------------------
// GET /api/jobs/{job_id}/logs
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LogLineView {
    ts: String,
    level: &'static str,
    message: String,
}

impl From<&LogLine> for LogLineView {
    fn from(line: &LogLine) -> Self {
        Self {
            ts: format_rfc3339_millis(line.ts),
            level: match line.stream {
                crate::jobdoc::LogStream::Stderr => "error",
                crate::jobdoc::LogStream::Stdout => "info",
            },
            message: line.line.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    lines: Vec<LogLineView>,
    cursor: String,
    request_id: String,
    server_time_utc: String,
}

fn tail(mut lines: Vec<LogLineView>, n: usize) -> Vec<LogLineView> {
    if lines.len() > n {
        lines = lines.split_off(lines.len() - n);
    }
    lines
}

pub async fn get_logs(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let doc = load_document(&state, &job_id).await?;

    if doc.attempts.is_empty() {
        return Err(ApiError::LogsUnavailable(format!(
            "job '{job_id}' has not produced any attempts yet"
        )));
    }

    let attempt_id = match params.get("attempt_id") {
        Some(id) => id.clone(),
        None => doc.last_attempt().expect("checked non-empty above").attempt_id.clone(),
    };

    let stream_mode = params
        .get("stream")
        .map(|s| s.as_str())
        .unwrap_or("0");
    let stream_mode = matches!(stream_mode, "1");

    let tail_n: usize = match params.get("tail") {
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=10_000).contains(n))
            .ok_or_else(|| ApiError::validation_field("tail must be an integer in 1..=10000", "tail"))?,
        None => 200,
    };

    let job_dir = JobDir::new(&state.jobs_dir, &job_id);
    let log_path = job_dir.attempt_log_path(&attempt_id);
    if !log_path.exists() {
        return Err(ApiError::LogsUnavailable(format!(
            "attempt '{attempt_id}' has no log file yet"
        )));
    }

    let raw_lines = crate::jobdoc::read_log_lines(&log_path)
        .await
        .map_err(ApiError::Internal)?;
    let views: Vec<LogLineView> = raw_lines.iter().map(LogLineView::from).collect();
    let views = tail(views, tail_n);

    if stream_mode {
        let events = stream::iter(views.into_iter().map(|line| {
            Ok::<_, Infallible>(Event::default().json_data(&line).unwrap_or_else(|_| Event::default()))
        }));
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
        let sse = Sse::new(events).keep_alive(KeepAlive::default());
        return Ok((headers, sse).into_response());
    }

    let (request_id, server_time_utc) = request_meta();
    let cursor = format!("logcur_{}", views.len());
    Ok(Json(LogsResponse {
        lines: views,
        cursor,
        request_id,
        server_time_utc,
    })
    .into_response())
}

// ---------------------------------------------------------------------
// GET /api/jobs/{job_id}/artifacts
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ArtifactLinks {
    download_base: String,
}

#[derive(Debug, Serialize)]
struct ArtifactListResponse {
    items: Vec<ArtifactView>,
    links: ArtifactLinks,
    request_id: String,
    server_time_utc: String,
}

pub async fn list_artifacts(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let doc = load_document(&state, &job_id).await?;

    let items = doc
        .artifacts_manifest
        .iter()
        .map(|a| ArtifactView {
            name: a.name.clone(),
            content_type: a.content_type.clone(),
            size_bytes: a.size_bytes,
        })
        .collect();

    let (request_id, server_time_utc) = request_meta();
    Ok(Json(ArtifactListResponse {
        items,
        links: ArtifactLinks {
            download_base: format!("/api/jobs/{job_id}/artifacts"),
        },
        request_id,
        server_time_utc,
    })
    .into_response())
}

// ---------------------------------------------------------------------
// GET /api/jobs/{job_id}/artifacts/{*name}
// ---------------------------------------------------------------------

pub async fn download_artifact(
    Extension(state): Extension<AppState>,
    Path((job_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let job_dir = JobDir::new(&state.jobs_dir, &job_id);
    let artifacts_dir = job_dir.artifacts_dir();

    let resolved = crate::jobdoc::resolve_artifact_path(&artifacts_dir, &name)
        .ok_or_else(|| ApiError::NotFound(format!("artifact '{name}' not found")))?;

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| ApiError::NotFound(format!("artifact '{name}' not found")))?;

    let doc = load_document(&state, &job_id).await.ok();
    let content_type = doc
        .as_ref()
        .and_then(|d| d.artifacts_manifest.iter().find(|a| a.name == name))
        .map(|a| a.content_type.clone())
        .unwrap_or_else(|| {
            mime_guess::from_path(&resolved)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string()
        });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        content_type
            .parse()
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    Ok((headers, bytes).into_response())
}
