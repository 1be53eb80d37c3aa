//! Per-attempt NDJSON log lines.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub ts: DateTime<Utc>,
    pub job_id: String,
    pub attempt_id: String,
    pub stream: LogStream,
    pub line: String,
}

/// Append `lines` to `path`, one JSON object per line, creating the file (and
/// any missing parent directory) if necessary.
pub async fn append_log_lines(path: &Path, lines: &[LogLine]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    for line in lines {
        let mut encoded = serde_json::to_vec(line)?;
        encoded.push(b'\n');
        file.write_all(&encoded).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Read every well-formed line from an NDJSON log file. Blank lines are
/// skipped silently; lines that fail to parse are skipped with a warning —
/// neither condition fails the read.
pub async fn read_log_lines(path: &Path) -> Result<Vec<LogLine>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut lines = Vec::new();
    for raw in contents.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(trimmed) {
            Ok(line) => lines.push(line),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping malformed log line");
            }
        }
    }
    Ok(lines)
}
