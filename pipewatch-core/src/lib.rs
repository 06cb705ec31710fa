pub mod error;
pub mod history;
pub mod report;
pub mod types;

pub use error::{Error, Result};
pub use history::{summarize, DetectionHistory, DetectionSummary, HistorySnapshot};
pub use report::{
    GeneratedReport, Report, ReportAggregator, ReportArtifact, ReportFormat, ReportMetadata,
    ReportStore, ReportWriter,
};
pub use types::{BoundingBox, Detection};
