#![deny(missing_docs)]

//! Core library for Docsmith: chunked, parallel documentation generation.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Language-model handlers and the model registry.
pub mod models;
/// Document processing pipeline.
pub mod processing;
/// Fixed-delay retry policy shared by retryable units.
pub mod retry;
/// Result store abstraction and implementations.
pub mod store;
