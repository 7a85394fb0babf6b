//! HTTP surface for the LLM gateway: middleware pipeline, chat
//! orchestrators, admin operations, and metrics.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod chat_stream;
pub mod config;
pub mod error_response;
pub mod metrics;
pub mod quota;
pub mod rate_limiting;
pub mod request_log;
pub mod state;
