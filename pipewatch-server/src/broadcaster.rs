// Per-session frame streaming over the shared video source

use crate::config::ServerConfig;
use crate::services::SharedSource;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use pipewatch_core::Detection;
use pipewatch_eye::{encode_jpeg, Frame, InferenceEngine};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const OPEN_FAILED_MESSAGE: &str = "Failed to open camera";
pub const READ_FAILED_MESSAGE: &str = "Failed to read frame";
pub const PROCESS_FAILED_MESSAGE: &str = "Failed to process frame";

pub type SessionId = String;

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub connected_at: DateTime<Local>,
    pub frames_sent: u64,
}

/// One message on the streaming channel.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Frame {
        frame: String,
        detections: Vec<Detection>,
        timestamp: String,
    },
    Error {
        error: String,
    },
}

impl StreamMessage {
    pub fn error(message: impl Into<String>) -> Self {
        StreamMessage::Error { error: message.into() }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("send failed: {0}")]
pub struct SinkError(pub String);

/// Where a session's messages go; a WebSocket in production.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, message: StreamMessage) -> Result<(), SinkError>;
}

/// Why a session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    OpenFailed,
    SendFailed,
    TooManyFailures,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub frame_interval: Duration,
    pub read_timeout: Duration,
    pub retry_delay: Duration,
    pub max_consecutive_failures: u32,
    pub jpeg_quality: u8,
}

impl StreamSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            read_timeout: config.read_timeout(),
            retry_delay: config.retry_delay(),
            max_consecutive_failures: config.max_consecutive_failures,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

pub struct StreamBroadcaster {
    source: Arc<SharedSource>,
    engine: Arc<InferenceEngine>,
    settings: StreamSettings,
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
}

impl StreamBroadcaster {
    pub fn new(source: Arc<SharedSource>, engine: Arc<InferenceEngine>, settings: StreamSettings) -> Self {
        Self {
            source,
            engine,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn register(&self) -> SessionId {
        let id = Uuid::new_v4().to_string();
        self.sessions.write().insert(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                connected_at: Local::now(),
                frames_sent: 0,
            },
        );
        info!("Stream session connected: {} ({} active)", id, self.session_count());
        id
    }

    /// Remove a session. Returns false if it was already gone.
    pub fn unregister(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            info!("Stream session disconnected: {} ({} active)", session_id, self.session_count());
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }

    /// Stream frames to `sink` until it fails or the source gives up, then
    /// drop the session from the registry.
    pub async fn run_session<S>(&self, session_id: &str, sink: &mut S) -> SessionEnd
    where
        S: FrameSink + ?Sized,
    {
        let end = self.stream(session_id, sink).await;
        debug!("Session {} ended: {:?}", session_id, end);
        self.unregister(session_id);
        end
    }

    async fn stream<S>(&self, session_id: &str, sink: &mut S) -> SessionEnd
    where
        S: FrameSink + ?Sized,
    {
        let source = self.source.clone();
        let opened = match tokio::task::spawn_blocking(move || source.ensure_open()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = opened {
            warn!("Session {}: camera unavailable: {}", session_id, reason);
            let _ = sink.send(StreamMessage::error(OPEN_FAILED_MESSAGE)).await;
            return SessionEnd::OpenFailed;
        }

        let mut failures = 0u32;
        loop {
            let started = Instant::now();

            let outcome = match self.read_frame().await {
                Ok(frame) => self.render(frame).await.map_err(|reason| (PROCESS_FAILED_MESSAGE, reason)),
                Err(reason) => Err((READ_FAILED_MESSAGE, reason)),
            };

            match outcome {
                Ok(message) => {
                    failures = 0;
                    if let Err(e) = sink.send(message).await {
                        debug!("Session {}: {}", session_id, e);
                        return SessionEnd::SendFailed;
                    }
                    if let Some(info) = self.sessions.write().get_mut(session_id) {
                        info.frames_sent += 1;
                    }
                }
                Err((message, reason)) => {
                    failures += 1;
                    debug!("Session {}: {} ({})", session_id, message, reason);
                    if sink.send(StreamMessage::error(message)).await.is_err() {
                        return SessionEnd::SendFailed;
                    }
                    if failures >= self.settings.max_consecutive_failures {
                        warn!(
                            "Session {}: giving up after {} consecutive failures",
                            session_id, failures
                        );
                        return SessionEnd::TooManyFailures;
                    }
                    tokio::time::sleep(self.settings.retry_delay).await;
                    continue;
                }
            }

            let elapsed = started.elapsed();
            if elapsed < self.settings.frame_interval {
                tokio::time::sleep(self.settings.frame_interval - elapsed).await;
            }
        }
    }

    async fn read_frame(&self) -> Result<Frame, String> {
        self.source.read_timeout(self.settings.read_timeout).await
    }

    /// Detect, annotate and encode one frame off the async workers.
    async fn render(&self, frame: Frame) -> Result<StreamMessage, String> {
        let engine = self.engine.clone();
        let quality = self.settings.jpeg_quality;
        let task = tokio::task::spawn_blocking(move || -> Result<StreamMessage, String> {
            let detections = match engine.detect(&frame, None) {
                Ok(detections) => detections,
                Err(e) => {
                    warn!("Detection skipped for frame: {}", e);
                    Vec::new()
                }
            };
            let annotated = engine.annotate(&frame, &detections);
            let jpeg = encode_jpeg(&annotated, quality).map_err(|e| e.to_string())?;
            Ok(StreamMessage::Frame {
                frame: STANDARD.encode(jpeg),
                detections,
                timestamp: Local::now().to_rfc3339(),
            })
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(format!("render task failed: {}", e)),
        }
    }
}
