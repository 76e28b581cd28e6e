//! veloxann-server — HTTP front-end for the veloxann engine.
//!
//! Request handling lives here; all search and insert logic lives in
//! `veloxann-core`.

/// HTTP API layer: Axum router, handlers, and wire models.
pub mod api;
