//! Observability for the connection manager
//!
//! Structured logging with `tracing`; lifecycle transitions are also surfaced
//! to callers through [`crate::provider::NotificationObserver`].

pub mod logging;

pub use logging::{parse_level, parse_spans_flag, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{connection_span, request_span};
