//! Logging setup
//!
//! The agent logs through `tracing`. Applications that do not install their
//! own subscriber can call [`setup_logging`]. Frame level traffic is logged on
//! the [`WIRE_TARGET`] target when `AgentConfig::log_wire` is set, so it can be
//! enabled independently, e.g. `RUST_LOG=info,drachtio::wire=trace`.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{AgentError, AgentResult};

/// Tracing target for raw frames
pub const WIRE_TARGET: &str = "drachtio::wire";

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
    /// Extra filter directives, e.g. `drachtio::wire=trace`
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Show every frame sent and received
    pub fn with_wire_trace(mut self) -> Self {
        self.directives.push(format!("{}=trace", WIRE_TARGET));
        self
    }

    fn filter(&self) -> AgentResult<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        for directive in &self.directives {
            let parsed = directive
                .parse()
                .map_err(|e| AgentError::config(format!("invalid log directive {}: {}", directive, e)))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install a global `tracing` subscriber
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> AgentResult<()> {
    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| AgentError::config(format!("failed to install subscriber: {}", e)))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> AgentResult<Level> {
    Level::from_str(level).map_err(|_| AgentError::config(format!("invalid log level: {}", level)))
}
