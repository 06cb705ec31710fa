// Server configuration: defaults, TOML file, PIPEWATCH_* environment, CLI flags

use anyhow::{bail, Context};
use clap::Parser;
use pipewatch_core::history::DEFAULT_HISTORY_CAPACITY;
use pipewatch_eye::config::DEFAULT_DEFECT_CLASSES;
use pipewatch_eye::EyeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "PIPEWATCH_";

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "pipewatch-server", about = "Pipeline inspection video analytics server", version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "PIPEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,

    /// USB index, stream URL, or stub:// source
    #[arg(long)]
    pub camera_source: Option<String>,

    #[arg(long)]
    pub model_path: Option<String>,

    #[arg(long)]
    pub reports_dir: Option<PathBuf>,

    #[arg(long)]
    pub confidence_threshold: Option<f64>,

    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    pub camera_source: String,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,

    pub model_path: String,
    pub fallback_model_path: String,
    pub confidence_threshold: f64,
    pub iou_threshold: f64,
    pub defect_classes: Vec<String>,

    pub reports_dir: PathBuf,
    pub enable_document_report: bool,
    pub enable_json_report: bool,

    pub log_level: String,
    /// Maximum retained detections, 0 for unbounded
    pub history_capacity: usize,

    pub frame_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub max_consecutive_failures: u32,
    pub jpeg_quality: u8,

    /// USB indices probed by /api/cameras/list are 0..probe_max_index
    pub probe_max_index: u32,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let eye = EyeConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            camera_source: eye.camera_source,
            camera_width: eye.resolution.0,
            camera_height: eye.resolution.1,
            camera_fps: eye.frame_rate,
            model_path: eye.model_path.to_string_lossy().into_owned(),
            fallback_model_path: eye.fallback_model_path.to_string_lossy().into_owned(),
            confidence_threshold: eye.confidence_threshold,
            iou_threshold: eye.iou_threshold,
            defect_classes: DEFAULT_DEFECT_CLASSES.iter().map(|s| s.to_string()).collect(),
            reports_dir: PathBuf::from("reports"),
            enable_document_report: true,
            enable_json_report: true,
            log_level: "info".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            frame_interval_ms: 33,
            read_timeout_ms: 2_000,
            retry_delay_ms: 100,
            max_consecutive_failures: 50,
            jpeg_quality: eye.jpeg_quality,
            probe_max_index: 5,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    /// Resolve the effective configuration for a command line.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_cli(cli);
        if let Err(e) = config.validate() {
            bail!("Invalid configuration: {}", e);
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            bail!("Config path must not contain '..': {}", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `PIPEWATCH_<KEY>` overrides. Values that fail to parse are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key)).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(v) = var("PORT").and_then(|v| v.parse().ok()) {
            self.port = v;
        }
        if let Some(v) = var("CAMERA_SOURCE") {
            self.camera_source = v;
        }
        if let Some(v) = var("CAMERA_WIDTH").and_then(|v| v.parse().ok()) {
            self.camera_width = v;
        }
        if let Some(v) = var("CAMERA_HEIGHT").and_then(|v| v.parse().ok()) {
            self.camera_height = v;
        }
        if let Some(v) = var("CAMERA_FPS").and_then(|v| v.parse().ok()) {
            self.camera_fps = v;
        }
        if let Some(v) = var("MODEL_PATH") {
            self.model_path = v;
        }
        if let Some(v) = var("FALLBACK_MODEL_PATH") {
            self.fallback_model_path = v;
        }
        if let Some(v) = var("CONFIDENCE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.confidence_threshold = v;
        }
        if let Some(v) = var("IOU_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.iou_threshold = v;
        }
        if let Some(v) = var("DEFECT_CLASSES") {
            self.defect_classes = split_list(&v);
        }
        if let Some(v) = var("REPORTS_DIR") {
            self.reports_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ENABLE_DOCUMENT_REPORT").and_then(|v| parse_flag(&v)) {
            self.enable_document_report = v;
        }
        if let Some(v) = var("ENABLE_JSON_REPORT").and_then(|v| parse_flag(&v)) {
            self.enable_json_report = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("HISTORY_CAPACITY").and_then(|v| v.parse().ok()) {
            self.history_capacity = v;
        }
        if let Some(v) = var("FRAME_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.frame_interval_ms = v;
        }
        if let Some(v) = var("READ_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.read_timeout_ms = v;
        }
        if let Some(v) = var("RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.retry_delay_ms = v;
        }
        if let Some(v) = var("MAX_CONSECUTIVE_FAILURES").and_then(|v| v.parse().ok()) {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = var("JPEG_QUALITY").and_then(|v| v.parse().ok()) {
            self.jpeg_quality = v;
        }
        if let Some(v) = var("PROBE_MAX_INDEX").and_then(|v| v.parse().ok()) {
            self.probe_max_index = v;
        }
        if let Some(v) = var("CORS_ORIGINS") {
            self.cors_origins = split_list(&v);
        }
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(source) = &cli.camera_source {
            self.camera_source = source.clone();
        }
        if let Some(model) = &cli.model_path {
            self.model_path = model.clone();
        }
        if let Some(dir) = &cli.reports_dir {
            self.reports_dir = dir.clone();
        }
        if let Some(threshold) = cli.confidence_threshold {
            self.confidence_threshold = threshold;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port must be non-zero".to_string());
        }

        if self.host.trim().is_empty() {
            return Err("Host must not be empty".to_string());
        }

        self.eye_config().validate()?;

        if self.frame_interval_ms == 0 {
            return Err("Frame interval must be at least 1 ms".to_string());
        }

        if self.read_timeout_ms == 0 {
            return Err("Read timeout must be at least 1 ms".to_string());
        }

        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be at least 1".to_string());
        }

        if !self.enable_document_report && !self.enable_json_report {
            return Err("At least one report format must be enabled".to_string());
        }

        Ok(())
    }

    pub fn eye_config(&self) -> EyeConfig {
        EyeConfig {
            camera_source: self.camera_source.clone(),
            resolution: (self.camera_width, self.camera_height),
            frame_rate: self.camera_fps,
            model_path: PathBuf::from(&self.model_path),
            fallback_model_path: PathBuf::from(&self.fallback_model_path),
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            class_names: self.defect_classes.clone(),
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
