//! pipewatch-server: HTTP and WebSocket front end for pipeline inspection
//!
//! Streams annotated frames from one shared video source to any number of
//! viewers and exposes camera control, detection history and reporting.

pub mod broadcaster;
pub mod config;
pub mod http;
pub mod services;
pub mod websocket;

pub use broadcaster::{FrameSink, SessionEnd, StreamBroadcaster, StreamMessage, StreamSettings};
pub use config::{Cli, ServerConfig};
pub use http::{create_router, AppState};
pub use services::{Services, SharedSource};
