//! Structured logging setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line
    Json,
}

/// The `logging` section of the engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives; `RUST_LOG` wins when set
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log span open/close
    #[serde(default)]
    pub span_events: bool,
}

fn default_level() -> String {
    "info,clickstream_engine=info,buffer=info,funnel=info,worker=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            span_events: false,
        }
    }
}

impl LoggingConfig {
    /// Applies `RUST_LOG` and `LOG_JSON` on top of the configured values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var("RUST_LOG") {
            self.level = filter;
        }
        if let Ok(json) = std::env::var("LOG_JSON") {
            if json == "1" || json.eq_ignore_ascii_case("true") {
                self.format = LogFormat::Json;
            }
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_span_events(span_events)
            .with_target(true)
            .boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(layer.with_filter(config.filter()))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(filter = %config.level, format = ?config.format, "Tracing initialized");
    }
    installed
}

/// Test-friendly subscriber writing through the libtest capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
        ))
        .with_test_writer()
        .try_init();
}
