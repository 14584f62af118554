//! Durable result log — one JSON line per terminal job.
//!
//! The log is append-only under a single writer lock, flushed per record, so
//! a run that dies mid-way loses at most the record being written. Feeding
//! the same log back into a new run makes it resumable: contact URLs that
//! already have a terminal record are skipped.

use crate::submit::SubmissionOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Terminal record for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// The root site the job started from.
    pub root: String,
    /// The contact URL the submission targeted.
    pub url: String,
    /// Discovery score of the contact URL.
    pub score: i32,
    /// Outcome, when the attempt produced a verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SubmissionOutcome>,
    /// Error text, when retries exhausted without a verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn for_outcome(root: &str, url: &str, score: i32, outcome: SubmissionOutcome) -> Self {
        Self {
            root: root.to_string(),
            url: url.to_string(),
            score,
            outcome: Some(outcome),
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn for_error(root: &str, url: &str, score: i32, error: &str) -> Self {
        Self {
            root: root.to_string(),
            url: url.to_string(),
            score,
            outcome: None,
            error: Some(error.to_string()),
            finished_at: Utc::now(),
        }
    }
}

/// Append-only NDJSON result log.
pub struct ResultLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl ResultLog {
    /// Open (or create) the log at `path` for appending.
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open result log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Append one record and flush it to disk.
    pub async fn append(&self, record: &ResultRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to encode result record")?;
        let mut file = self.file.lock().await;
        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contact URLs with a terminal record in the log at `path`. Unparseable
    /// lines (a crash mid-write) are skipped, not fatal.
    pub fn completed_urls(path: &Path) -> Result<HashSet<String>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read result log {}", path.display()))
            }
        };

        let mut completed = HashSet::new();
        for line in BufReader::new(file).lines() {
            let line = line.unwrap_or_default();
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ResultRecord>(&line) {
                Ok(record) => {
                    completed.insert(record.url);
                }
                Err(e) => tracing::debug!("skipping unparseable result line: {e}"),
            }
        }
        Ok(completed)
    }
}
