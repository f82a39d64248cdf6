//! Append-only per-turn audit log.
//!
//! One JSON object per line in `<log_dir>/session-YYYY-MM-DD.jsonl`, one file
//! per UTC calendar day. The log is a product artifact and is written
//! regardless of `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::core::types::SessionTurn;

pub const SCHEMA_VERSION: u32 = 1;

/// One audit-log line.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord<'a> {
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub goal: &'a str,
    pub model: &'a str,
    pub shell: &'a str,
    pub working_directory: Option<&'a Path>,
    pub step: u32,
    #[serde(flatten)]
    pub turn: &'a SessionTurn,
    pub returncode: Option<i32>,
    pub duration_seconds: Option<f64>,
    /// The raw `complete` flag of the decision that produced the turn.
    pub decision_complete: bool,
}

/// Writer for the daily audit files under one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("session-{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append `record` to the file for its timestamp's UTC date.
    pub fn append(&self, record: &TurnRecord<'_>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create log dir {}", self.dir.display()))?;
        let path = self.path_for(record.timestamp.date_naive());
        let mut line = serde_json::to_string(record).context("serialize turn record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        Ok(path)
    }
}
