//! Process-wide tracing subscriber for CQRS servers.
//!
//! Several servers may share one process. The first to bootstrap installs the
//! subscriber; later ones inherit its filter and format and are told so
//! through their [`TelemetryHandle`].

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, info, subscriber::SetGlobalDefaultError, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use zerra_config::{Config, LogFormat};

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static ACTIVE: OnceCell<ActiveTelemetry> = OnceCell::new();

/// Settings of the subscriber that won installation.
#[derive(Debug)]
struct ActiveTelemetry {
    filter: String,
    format: LogFormat,
}

impl ActiveTelemetry {
    fn matches(&self, config: &Config) -> bool {
        self.filter == config.log_filter() && self.format == config.log_format()
    }
}

/// Describes the subscriber serving this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
    installed_here: bool,
}

impl TelemetryHandle {
    /// Format of the active subscriber; may differ from the one requested.
    #[must_use]
    pub const fn format(self) -> LogFormat {
        self.format
    }

    /// `true` when this call installed the subscriber.
    #[must_use]
    pub const fn installed_here(self) -> bool {
        self.installed_here
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// Later calls leave the global state alone. When they ask for a different
/// filter or format a warning names both, and the first settings stay.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a subscriber was
/// installed outside this module.
///
/// # Examples
///
/// ```rust
/// use zerra_config::{Config, LogFormat};
/// use zerra_server::telemetry;
///
/// # fn main() -> Result<(), zerra_server::telemetry::TelemetryError> {
/// let first = telemetry::initialise(&Config::default())?;
/// let compact = Config {
///     log_format: LogFormat::Compact,
///     ..Config::default()
/// };
/// let second = telemetry::initialise(&compact)?;
/// assert!(!second.installed_here());
/// assert_eq!(second.format(), first.format());
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let mut installed_here = false;
    let active = ACTIVE.get_or_try_init(|| {
        install_subscriber(config)?;
        installed_here = true;
        Ok::<_, TelemetryError>(ActiveTelemetry {
            filter: config.log_filter().to_owned(),
            format: config.log_format(),
        })
    })?;

    if installed_here {
        info!(
            target: TELEMETRY_TARGET,
            filter = active.filter.as_str(),
            format = %active.format,
            "telemetry initialised"
        );
    } else if !active.matches(config) {
        warn!(
            target: TELEMETRY_TARGET,
            requested_filter = config.log_filter(),
            requested_format = %config.log_format(),
            active_filter = active.filter.as_str(),
            active_format = %active.format,
            "telemetry already initialised by another server; keeping its settings"
        );
    }

    Ok(TelemetryHandle {
        format: active.format,
        installed_here,
    })
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(
            builder(filter)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .finish(),
        ),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
