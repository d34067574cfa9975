//! Structured logging for the connection manager
//!
//! Settings come from the environment and can be raised by the CLI's `-v`
//! flags:
//!
//! - `LOG_LEVEL`: error, warn, info, debug or trace (default info)
//! - `LOG_FORMAT`: json, pretty or compact (default json)
//! - `LOG_SPANS`: `true` to log span open/close events
//! - `RUST_LOG`: replaces the computed filter entirely
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=debug nats-link sub "orders.>"
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies capped at WARN unless `RUST_LOG` says otherwise
const NOISY_TARGETS: &[&str] = &["async_nats=warn", "tokio=warn", "rustls=warn"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Multi-line, coloured
    Pretty,
    /// Single-line, coloured, no targets
    Compact,
}

impl LogFormat {
    /// Unknown names fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Unknown names fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Only a literal `true` (any case) enables span events
pub fn parse_spans_flag(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("true")
}

/// Resolved logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    /// Filter replacing the level and noise directives, from `RUST_LOG`
    pub filter_override: Option<String>,
    format_explicit: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_spans: false,
            filter_override: None,
            format_explicit: false,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = lookup("LOG_FORMAT");
        Self {
            level: lookup("LOG_LEVEL")
                .map(|level| parse_level(&level))
                .unwrap_or(Level::INFO),
            format: format
                .as_deref()
                .map(LogFormat::parse)
                .unwrap_or(LogFormat::Json),
            include_spans: lookup("LOG_SPANS")
                .map(|spans| parse_spans_flag(&spans))
                .unwrap_or(false),
            filter_override: lookup("RUST_LOG").filter(|filter| !filter.trim().is_empty()),
            format_explicit: format.is_some(),
        }
    }

    /// Apply `-v` (debug) or `-vv` (trace). Verbose runs default to the
    /// compact format unless `LOG_FORMAT` chose one.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let level = match verbose {
            0 => return self,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        // Level ordering is by verbosity, TRACE being the greatest
        if level > self.level {
            self.level = level;
        }
        if !self.format_explicit {
            self.format = LogFormat::Compact;
        }
        self
    }

    pub fn filter(&self) -> EnvFilter {
        if let Some(directives) = &self.filter_override {
            return EnvFilter::new(directives);
        }
        NOISY_TARGETS
            .iter()
            .fold(EnvFilter::new(self.level.to_string().to_lowercase()), |filter, directive| {
                match directive.parse() {
                    Ok(directive) => filter.add_directive(directive),
                    Err(_) => filter,
                }
            })
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Install the global subscriber. Panics if one is already installed.
    pub fn init(&self) {
        let subscriber = tracing_subscriber::registry().with(self.filter());
        let spans = self.span_events();

        match self.format {
            LogFormat::Json => subscriber
                .with(fmt::layer().json().with_span_events(spans))
                .init(),
            LogFormat::Pretty => subscriber
                .with(fmt::layer().pretty().with_ansi(true).with_span_events(spans))
                .init(),
            LogFormat::Compact => subscriber
                .with(
                    fmt::layer()
                        .compact()
                        .with_ansi(true)
                        .with_target(false)
                        .with_span_events(spans),
                )
                .init(),
        }
    }
}

/// Create a span around one connection attempt
#[macro_export]
macro_rules! connection_span {
    ($($field:tt)*) => {
        tracing::info_span!("nats_connection", $($field)*)
    };
}

/// Create a span around a single request
#[macro_export]
macro_rules! request_span {
    ($($field:tt)*) => {
        tracing::debug_span!("nats_request", $($field)*)
    };
}

pub use {connection_span, request_span};
