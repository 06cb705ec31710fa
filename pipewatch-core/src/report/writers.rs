use super::{ArtifactKind, Report};
use crate::error::Result;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Maximum number of individual findings listed in the document body.
const MAX_DOCUMENT_FINDINGS: usize = 50;

/// Sink that renders a [`Report`] into one persisted artifact.
pub trait ReportWriter: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    /// File extension, without the leading dot.
    fn extension(&self) -> &'static str;

    fn write(&self, report: &Report, path: &Path) -> Result<()>;
}

/// Pretty-printed `{metadata, detections, summary}`.
#[derive(Debug, Default)]
pub struct JsonReportWriter;

impl JsonReportWriter {
    pub fn new() -> Self {
        Self
    }
}

impl ReportWriter for JsonReportWriter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::StructuredData
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn write(&self, report: &Report, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(report)?;
        fs::write(path, body)?;
        Ok(())
    }
}

/// Plain-text inspection document.
#[derive(Debug, Default)]
pub struct TextDocumentWriter;

impl TextDocumentWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, report: &Report) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render_into(report, &mut out);
        out
    }

    fn render_into(&self, report: &Report, out: &mut String) -> std::fmt::Result {
        writeln!(out, "PIPELINE INSPECTION REPORT")?;
        writeln!(out, "==========================")?;
        writeln!(out)?;

        writeln!(out, "Inspection Details")?;
        writeln!(out, "------------------")?;
        writeln!(out, "{:<18}{}", "Report ID:", report.report_id)?;
        writeln!(
            out,
            "{:<18}{}",
            "Date & Time:",
            report.created_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(out, "{:<18}{}", "Location:", meta_text(report, "location"))?;
        writeln!(out, "{:<18}{}", "Inspector:", meta_text(report, "inspector"))?;
        writeln!(out, "{:<18}{}", "Total Detections:", report.detections.len())?;
        if let Some(notes) = report.metadata.get("notes").and_then(|v| v.as_str()) {
            if !notes.is_empty() {
                writeln!(out, "{:<18}{}", "Notes:", notes)?;
            }
        }
        writeln!(out)?;

        writeln!(out, "Detected Defects")?;
        writeln!(out, "----------------")?;
        writeln!(out, "{:<22}{:<8}{}", "Defect Type", "Count", "Severity")?;
        for (class_name, count) in &report.summary.by_class {
            writeln!(
                out,
                "{:<22}{:<8}{}",
                title_case(class_name),
                count,
                severity_for(class_name)
            )?;
        }
        writeln!(out)?;

        writeln!(out, "Detailed Findings")?;
        writeln!(out, "-----------------")?;
        writeln!(
            out,
            "{:<5}{:<22}{:<12}{:<10}{}",
            "#", "Type", "Confidence", "Position", "Time"
        )?;
        for (i, det) in report.detections.iter().take(MAX_DOCUMENT_FINDINGS).enumerate() {
            let position = det
                .position
                .map(|p| format!("{:.1}m", p))
                .unwrap_or_else(|| "N/A".to_string());
            writeln!(
                out,
                "{:<5}{:<22}{:<12}{:<10}{}",
                i + 1,
                title_case(&det.class_name),
                format!("{:.2}%", det.confidence * 100.0),
                position,
                det.captured_at.format("%H:%M:%S")
            )?;
        }
        if report.detections.len() > MAX_DOCUMENT_FINDINGS {
            writeln!(
                out,
                "(showing first {} of {} findings)",
                MAX_DOCUMENT_FINDINGS,
                report.detections.len()
            )?;
        }
        writeln!(out)?;

        writeln!(
            out,
            "Average confidence: {:.2}%  Highest: {:.2}%  Lowest: {:.2}%",
            report.summary.average_confidence * 100.0,
            report.summary.highest_confidence * 100.0,
            report.summary.lowest_confidence * 100.0
        )?;
        writeln!(
            out,
            "Generated by Pipewatch | {}",
            report.created_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        Ok(())
    }
}

impl ReportWriter for TextDocumentWriter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Document
    }

    fn extension(&self) -> &'static str {
        "txt"
    }

    fn write(&self, report: &Report, path: &Path) -> Result<()> {
        fs::write(path, self.render(report))?;
        Ok(())
    }
}

/// Severity rating for a defect class.
pub fn severity_for(class_name: &str) -> &'static str {
    match class_name.to_ascii_lowercase().as_str() {
        "leak" => "Critical",
        "crack" | "corrosion" => "High",
        "rust" | "foreign_object" => "Medium",
        "sediment" => "Low",
        _ => "Unknown",
    }
}

fn meta_text(report: &Report, key: &str) -> String {
    match report.metadata.get(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Null) | None => "N/A".to_string(),
        Some(serde_json::Value::String(_)) => "N/A".to_string(),
        Some(other) => other.to_string(),
    }
}

fn title_case(class_name: &str) -> String {
    class_name
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
