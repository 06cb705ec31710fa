//! Inspection report aggregation
//!
//! A report is built from a [`HistorySnapshot`], never from the live history,
//! so concurrent appends cannot tear the view it summarizes. Rendering is
//! delegated to [`ReportWriter`] sinks, one artifact per enabled writer.

mod store;
mod writers;

pub use store::{ReportArtifact, ReportStore};
pub use writers::{severity_for, JsonReportWriter, ReportWriter, TextDocumentWriter};

use crate::error::{Error, Result};
use crate::history::{DetectionSummary, HistorySnapshot};
use crate::types::Detection;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// File name prefix shared by every persisted artifact.
pub const ARTIFACT_PREFIX: &str = "inspection_report_";

/// Caller-supplied key/value metadata (location, inspector, notes, ...).
pub type ReportMetadata = Map<String, Value>;

/// Kind of artifact a writer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Document,
    StructuredData,
}

/// Which artifacts a generation call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Document,
    StructuredData,
    Both,
}

impl ReportFormat {
    pub fn includes(&self, kind: ArtifactKind) -> bool {
        match self {
            ReportFormat::Both => true,
            ReportFormat::Document => kind == ArtifactKind::Document,
            ReportFormat::StructuredData => kind == ArtifactKind::StructuredData,
        }
    }
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "pdf" | "txt" => Ok(ReportFormat::Document),
            "structured-data" | "structured_data" | "json" => Ok(ReportFormat::StructuredData),
            "both" => Ok(ReportFormat::Both),
            other => Err(Error::InvalidFormat(other.to_string())),
        }
    }
}

/// An immutable inspection report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    #[serde(skip)]
    pub report_id: String,
    #[serde(skip)]
    pub created_at: DateTime<Local>,
    pub metadata: ReportMetadata,
    pub detections: Vec<Detection>,
    pub summary: DetectionSummary,
}

/// Result of one generation call: the id used and the artifacts written,
/// keyed by file extension.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedReport {
    pub report_id: String,
    pub files: BTreeMap<String, PathBuf>,
}

pub struct ReportAggregator {
    reports_dir: PathBuf,
    writers: Vec<Arc<dyn ReportWriter>>,
    // Serializes id allocation so two calls in the same second never share an id.
    allocation: Mutex<()>,
}

impl ReportAggregator {
    /// Aggregator with no writers; add sinks with [`ReportAggregator::with_writer`].
    pub fn new(reports_dir: impl Into<PathBuf>) -> Result<Self> {
        let reports_dir = reports_dir.into();
        fs::create_dir_all(&reports_dir)?;
        Ok(Self {
            reports_dir,
            writers: Vec::new(),
            allocation: Mutex::new(()),
        })
    }

    /// Aggregator with the built-in document and structured-data writers.
    pub fn standard(
        reports_dir: impl Into<PathBuf>,
        enable_document: bool,
        enable_structured: bool,
    ) -> Result<Self> {
        let mut aggregator = Self::new(reports_dir)?;
        if enable_document {
            aggregator = aggregator.with_writer(Arc::new(TextDocumentWriter::new()));
        }
        if enable_structured {
            aggregator = aggregator.with_writer(Arc::new(JsonReportWriter::new()));
        }
        Ok(aggregator)
    }

    pub fn with_writer(mut self, writer: Arc<dyn ReportWriter>) -> Self {
        self.writers.push(writer);
        self
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    pub fn store(&self) -> ReportStore {
        ReportStore::new(self.reports_dir.clone())
    }

    /// Build a report from `snapshot` and persist one artifact per enabled
    /// writer matching `format`.
    pub fn generate(
        &self,
        snapshot: &HistorySnapshot,
        metadata: ReportMetadata,
        format: ReportFormat,
    ) -> Result<GeneratedReport> {
        if snapshot.is_empty() {
            return Err(Error::NoData);
        }

        let writers: Vec<_> = self
            .writers
            .iter()
            .filter(|w| format.includes(w.kind()))
            .cloned()
            .collect();
        if writers.is_empty() {
            return Err(Error::Configuration(format!(
                "no enabled report writer for format {:?}",
                format
            )));
        }

        let _guard = self.allocation.lock();
        let created_at = Local::now();
        let report_id = self.allocate_id(&created_at);
        let report = build_report(report_id.clone(), created_at, snapshot, metadata);

        let mut files = BTreeMap::new();
        for writer in writers {
            let path = self
                .reports_dir
                .join(artifact_file_name(&report_id, writer.extension()));
            writer.write(&report, &path)?;
            info!("Report artifact written: {}", path.display());
            files.insert(writer.extension().to_string(), path);
        }

        Ok(GeneratedReport { report_id, files })
    }

    // Second-resolution ids get a numeric suffix when any artifact of that id
    // already exists; artifacts are never overwritten.
    fn allocate_id(&self, created_at: &DateTime<Local>) -> String {
        let base = created_at.format("%Y%m%d_%H%M%S").to_string();
        let mut candidate = base.clone();
        let mut suffix = 2u32;
        while self.id_taken(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        if candidate != base {
            warn!("Report id {} already used, allocated {}", base, candidate);
        }
        candidate
    }

    fn id_taken(&self, report_id: &str) -> bool {
        self.writers.iter().any(|w| {
            self.reports_dir
                .join(artifact_file_name(report_id, w.extension()))
                .exists()
        })
    }
}

pub fn artifact_file_name(report_id: &str, extension: &str) -> String {
    format!("{}{}.{}", ARTIFACT_PREFIX, report_id, extension)
}

fn build_report(
    report_id: String,
    created_at: DateTime<Local>,
    snapshot: &HistorySnapshot,
    mut metadata: ReportMetadata,
) -> Report {
    metadata.insert("report_id".to_string(), Value::String(report_id.clone()));
    metadata.insert(
        "timestamp".to_string(),
        Value::String(created_at.to_rfc3339()),
    );
    metadata.insert("total_detections".to_string(), Value::from(snapshot.len()));

    Report {
        report_id,
        created_at,
        metadata,
        detections: snapshot.to_vec(),
        summary: snapshot.summary(),
    }
}
