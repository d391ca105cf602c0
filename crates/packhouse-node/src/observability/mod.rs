//! Logging setup for the node.
//!
//! HTTP request spans come from `tower_http::trace::TraceLayer` in
//! [`crate::api::create_router`].

mod logging;

pub use logging::{filter_directive, init_logging, LogFormat};
