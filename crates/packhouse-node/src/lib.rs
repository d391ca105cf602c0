//! # Packhouse Node
//!
//! HTTP front end serving git repositories over the smart HTTP protocol.
//!
//! ```text
//!   git client ── HTTP ──> api (axum) ──> packhouse_git::Session ──> MemoryStore
//!                           │                     │
//!                  request body chunks      PacketSink (ChannelSink)
//!                  (gzip decoded)           streamed response body
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin packhouse-node -- --listen-addr 127.0.0.1:8080
//! git clone http://127.0.0.1:8080/demo.git
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Router, handlers and the repository registry
//! - [`config`] - Node configuration (YAML file + environment)
//! - [`observability`] - Structured logging
//! - [`validation`] - Repository name validation

pub mod api;
pub mod config;
pub mod observability;
pub mod stream;
pub mod validation;
