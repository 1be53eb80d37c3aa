//! Keyset pagination cursor.
//!
//! Encodes the `(created_at, job_id)` key of the last row on a page as
//! `base64url(utf8("<created_at ISO>|<job_id>"))`, unpadded. Decoders tolerate
//! both the unpadded form this system emits and a padded form a client might
//! round-trip through a generic base64 library.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};

/// The decoded keyset position: the Store's `(created_at, job_id)` ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub job_id: String,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, job_id: impl Into<String>) -> Self {
        Self {
            created_at,
            job_id: job_id.into(),
        }
    }

    /// Encode as `base64url(utf8("<created_at ISO>|<job_id>"))`, unpadded.
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.created_at.to_rfc3339(), self.job_id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Decode a cursor string, tolerating both padded and unpadded base64url.
    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .or_else(|_| URL_SAFE.decode(s))
            .context("cursor is not valid base64url")?;
        let raw = String::from_utf8(bytes).context("cursor is not valid utf-8")?;
        let (ts, job_id) = raw
            .split_once('|')
            .ok_or_else(|| anyhow!("cursor is missing the '|' separator"))?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .context("cursor timestamp is not RFC 3339")?
            .with_timezone(&Utc);
        if job_id.is_empty() {
            return Err(anyhow!("cursor job_id is empty"));
        }
        Ok(Cursor::new(created_at, job_id))
    }
}
