//! Log subscriber setup driven by [`LoggingConfig`]

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};
use crate::LoggingConfig;

static INSTALLED: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    None,
    /// Lifecycle events, retries, overflow
    Low,
    /// Plus per-frame events
    Medium,
    High,
}

impl LogLevel {
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Low => "info",
            LogLevel::Medium => "debug",
            LogLevel::High => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTarget {
    /// stderr
    #[default]
    Console,
    /// Appended to `logging.path`
    File,
}

/// Filter for this crate at `level`; other crates only report warnings.
/// `RUST_LOG` takes precedence when set.
fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match level {
        LogLevel::None => EnvFilter::new("off"),
        level => EnvFilter::new(format!("warn,{}={level}", env!("CARGO_CRATE_NAME"))),
    })
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) -> Result<()> {
    INSTALLED.get_or_try_init(|| install(config)).map(|_| ())
}

fn install(config: &LoggingConfig) -> Result<()> {
    let (writer, ansi) = match config.target {
        LogTarget::Console => (BoxMakeWriter::new(std::io::stderr), true),
        LogTarget::File => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)
                .map_err(|source| Error::Io {
                    path: config.path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    // span close events carry busy/idle times per read, process and dump
    let spans = if config.instrumentation {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_thread_names(true)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_span_events(spans);

    #[cfg(feature = "profiling")]
    let tracy = config.instrumentation.then(tracing_tracy::TracyLayer::default);
    #[cfg(not(feature = "profiling"))]
    let tracy: Option<tracing_subscriber::layer::Identity> = None;

    tracing_subscriber::registry()
        .with(filter(config.level))
        .with(fmt_layer)
        .with(tracy)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
