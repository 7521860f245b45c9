//! Log retrieval endpoints.
//!
//! Log files are newline-delimited JSON written by the logging subsystem into
//! a single directory. Lines that fail to parse are skipped.

use std::io::ErrorKind;
use std::path::PathBuf;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::response::{ApiError, send_ok};

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 10_000;
const LOG_EXTENSION: &str = "log";
const MAX_NAME_LENGTH: usize = 128;

#[derive(Clone)]
pub struct LogsState {
    pub dir: PathBuf,
}

pub fn router(state: LogsState) -> Router {
    Router::new()
        .route("/", get(list_logs))
        .route("/{name}", get(read_log))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub level: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct LogListResponse {
    logs: Vec<String>,
}

#[derive(Serialize)]
struct LogEntriesResponse {
    name: String,
    count: usize,
    entries: Vec<Value>,
}

/// Strip an optional `.log` suffix and reject anything that could leave the log directory.
fn validate_name(name: &str) -> Result<&str, ApiError> {
    let stem = name.strip_suffix(".log").unwrap_or(name);

    if stem.is_empty() || stem.len() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request("Invalid log name"));
    }
    if stem.contains("..")
        || !stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ApiError::bad_request("Invalid log name"));
    }
    Ok(stem)
}

fn level_matches(entry: &Value, level: &str) -> bool {
    match entry.get("level") {
        Some(Value::String(s)) => s.eq_ignore_ascii_case(level),
        Some(Value::Number(n)) => n.to_string() == level,
        _ => false,
    }
}

/// Parse newline-delimited JSON, keeping the last `limit` entries at `level`.
pub fn parse_log_lines(content: &str, level: Option<&str>, limit: usize) -> Vec<Value> {
    let mut skipped = 0usize;

    let mut entries: Vec<Value> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(entry) => Some(entry),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .filter(|entry| level.is_none_or(|level| level_matches(entry, level)))
        .collect();

    if skipped > 0 {
        warn!(skipped, "Skipped malformed log lines");
    }

    let excess = entries.len().saturating_sub(limit);
    entries.drain(..excess);
    entries
}

async fn list_logs(State(state): State<LogsState>) -> Result<Response, ApiError> {
    let mut dir = match tokio::fs::read_dir(&state.dir).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(send_ok(LogListResponse { logs: Vec::new() }, StatusCode::OK));
        }
        Err(e) => return Err(ApiError::internal("Failed to list logs", e)),
    };

    let mut logs = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ApiError::internal("Failed to list logs", e))?
    {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            logs.push(stem.to_string());
        }
    }
    logs.sort();

    Ok(send_ok(LogListResponse { logs }, StatusCode::OK))
}

async fn read_log(
    State(state): State<LogsState>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Response, ApiError> {
    let stem = validate_name(&name)?;
    let path = state.dir.join(format!("{}.{}", stem, LOG_EXTENSION));

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("No such log file"));
        }
        Err(e) => return Err(ApiError::internal("Failed to read log", e)),
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let entries = parse_log_lines(&content, query.level.as_deref(), limit);

    Ok(send_ok(
        LogEntriesResponse {
            name: stem.to_string(),
            count: entries.len(),
            entries,
        },
        StatusCode::OK,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = r#"{"level":"info","msg":"started"}
not json
{"level":"error","msg":"boom"}

{"level":"INFO","msg":"request"}
{"level":30,"msg":"pino style"}
"#;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let entries = parse_log_lines(CONTENT, None, DEFAULT_LIMIT);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["msg"], "started");
    }

    #[test]
    fn test_level_filter_is_case_insensitive() {
        let entries = parse_log_lines(CONTENT, Some("info"), DEFAULT_LIMIT);
        let messages: Vec<&str> = entries.iter().filter_map(|e| e["msg"].as_str()).collect();
        assert_eq!(messages, ["started", "request"]);
    }

    #[test]
    fn test_numeric_level() {
        let entries = parse_log_lines(CONTENT, Some("30"), DEFAULT_LIMIT);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["msg"], "pino style");
    }

    #[test]
    fn test_limit_keeps_latest() {
        let entries = parse_log_lines(CONTENT, None, 2);
        let messages: Vec<&str> = entries.iter().filter_map(|e| e["msg"].as_str()).collect();
        assert_eq!(messages, ["request", "pino style"]);
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("app").ok(), Some("app"));
        assert_eq!(validate_name("app.log").ok(), Some("app"));
        assert_eq!(validate_name("app-2026.10.19").ok(), Some("app-2026.10.19"));
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("../secrets").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a b").is_err());
    }
}
