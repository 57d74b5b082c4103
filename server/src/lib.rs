//! Live chat backend: conversation registry, message ledger and the
//! assistant/human handoff behind an axum API.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handoff;
pub mod messages;
pub mod notify;
pub mod registry;
pub mod storage;
pub mod store;
pub mod templates;
pub mod types;

pub use app::{router, run, AppState};
pub use error::{ChatError, ChatResult};
