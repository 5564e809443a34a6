//! Tracing setup for host applications.
//!
//! The crate only emits `tracing` events. Hosts that do not install their
//! own subscriber can call [`init_tracing`] once at startup.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Overrides the configured filter | unset |

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingSettings;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Telemetry-specific error type
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Build the filter, preferring `RUST_LOG` over the configured level.
fn build_filter(settings: &LoggingSettings) -> TelemetryResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&settings.level).map_err(|e| TelemetryError::InvalidFilter {
        filter: settings.level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global tracing subscriber.
///
/// Uses a JSON formatter when `settings.json` is set. Returns
/// `AlreadyInitialized` instead of panicking when a subscriber exists.
pub fn init_tracing(settings: &LoggingSettings) -> TelemetryResult<()> {
    let env_filter = build_filter(settings)?;

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    tracing::info!(
        level = %settings.level,
        json = settings.json,
        "Tracing initialized"
    );

    Ok(())
}
