//! Log output for the `np` binary.
//!
//! Workflow crates log at the level chosen on the command line; everything
//! else is held to `warn`. Every driver's work runs inside a `driver` span,
//! so interleaved lines from `np all` can be told apart. Logs go to stderr
//! and stdout stays reserved for command output.

use clap::ValueEnum;
use np_vers::DriverKey;
use tracing::{Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow `--log-level`.
const WORKFLOW_TARGETS: &[&str] = &["np", "netmap_patches", "np_build", "np_vers"];

/// Shape of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One human-readable line per event, prefixed with the driver span.
    #[default]
    Text,
    /// Newline-delimited JSON carrying the driver span fields.
    Json,
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(WORKFLOW_TARGETS.iter().map(|t| format!("{}={}", t, level)));
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides `level`; only the
/// first call in a process has any effect.
pub fn init_tracing(format: LogFormat, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Span grouping everything logged while processing `driver`.
pub fn driver_span(driver: &DriverKey) -> Span {
    tracing::info_span!("driver", kind = %driver.kind, driver = %driver.field())
}

/// Parse a `--log-level` value.
pub fn parse_level(s: &str) -> Result<Level, String> {
    s.parse::<Level>()
        .map_err(|_| format!("invalid log level {:?} (trace, debug, info, warn, error)", s))
}
