// Read side of the reports directory

use super::{artifact_file_name, ARTIFACT_PREFIX};
use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// A persisted report artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ReportArtifact {
    pub filename: String,
    pub created: DateTime<Local>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// All `inspection_report_*` artifacts, newest first. A missing directory
    /// lists as empty.
    pub fn list(&self) -> Result<Vec<ReportArtifact>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.starts_with(ARTIFACT_PREFIX) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let created = meta.created().or_else(|_| meta.modified())?;
            artifacts.push(ReportArtifact {
                filename,
                created: DateTime::<Local>::from(created),
                size: meta.len(),
            });
        }

        artifacts.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(artifacts)
    }

    /// Resolve the artifact for `report_id` with the given extension.
    ///
    /// Both parts are restricted to a safe character set so the result can
    /// never escape the reports directory.
    pub fn locate(&self, report_id: &str, extension: &str) -> Result<PathBuf> {
        let valid_extension =
            !extension.is_empty() && extension.chars().all(|c| c.is_ascii_alphanumeric());
        if !is_safe_component(report_id) || !valid_extension {
            debug!("Rejected report lookup for id {:?} ext {:?}", report_id, extension);
            return Err(Error::NotFound(format!("report {}", report_id)));
        }

        let path = self.dir.join(artifact_file_name(report_id, extension));
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::NotFound(format!(
                "report {} ({})",
                report_id, extension
            )))
        }
    }
}

fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
