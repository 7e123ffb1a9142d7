//! Diagnostic reports for unexpected failures.
//!
//! A report bundles the failure message, a snapshot of the property file
//! when it is readable, and the recent log lines. It is written as JSON into
//! the logs directory for the user to forward.

use crate::error::Result;
use crate::transaction::TransactionResult;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File name prefix of written reports.
pub const REPORT_PREFIX: &str = "report_";

/// Reports kept in the logs directory; older ones are pruned.
pub const MAX_REPORTS: usize = 5;

/// Everything a maintainer needs to look at a failed transaction.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub created_at: String,
    pub version: String,
    pub target: PathBuf,
    pub result: TransactionResult,
    /// File content, when readable without privileges.
    pub snapshot: Option<String>,
    pub recent_log: Vec<String>,
}

impl DiagnosticReport {
    /// Assemble a report for `target`.
    pub fn new(target: &Path, result: TransactionResult, recent_log: Vec<String>) -> Self {
        Self {
            created_at: Local::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            target: target.to_path_buf(),
            result,
            snapshot: std::fs::read_to_string(target).ok(),
            recent_log,
        }
    }

    /// Write the report into `dir` and prune old reports.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let name = format!(
            "{}{}.json",
            REPORT_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S%.3f")
        );
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        prune_reports(dir, MAX_REPORTS)?;
        Ok(path)
    }
}

/// Delete all but the `keep` newest reports in `dir`.
pub fn prune_reports(dir: &Path, keep: usize) -> Result<usize> {
    let mut reports: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(REPORT_PREFIX) && n.ends_with(".json"))
        })
        .map(|e| e.into_path())
        .collect();

    // Timestamped names sort chronologically.
    reports.sort();
    let excess = reports.len().saturating_sub(keep);
    for old in &reports[..excess] {
        std::fs::remove_file(old)?;
    }
    Ok(excess)
}
