//! # Nubra Hub
//!
//! The backend relay server (`/convert`, `/chat`, `/health`) with its rate
//! limiter, CORS and validation layers, the completion providers it forwards
//! to, the SQLite storage area, and the HTTP client the assistant uses to
//! reach a relay.

pub mod api;
pub mod client;
pub mod middleware;
pub mod prompts;
pub mod providers;
pub mod storage;
pub mod validation;

pub use client::HttpBackend;
pub use storage::SqliteStorage;
