//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for the engine. The filter comes from
//! `RUST_LOG` when present, otherwise from the configured level; the output
//! format follows `core.log_format`. Logs go to stderr so command output on
//! stdout stays machine-readable.

use crate::config::LogFormat;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with an explicit level and format.
///
/// `LogFormat::Auto` picks pretty output in debug builds and JSON with the
/// current span in release builds. Calling this more than once is harmless;
/// only the first subscriber is installed.
pub fn init_telemetry_with(log_level: &str, format: LogFormat) {
    let default_filter = format!("{},quartet_engine={},sdk={}", log_level, log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let json = match format {
        LogFormat::Json => true,
        LogFormat::Pretty => false,
        LogFormat::Auto => !cfg!(debug_assertions),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_telemetry_with("debug", LogFormat::Pretty);
        init_telemetry_with("info", LogFormat::Json);
        tracing::info!("still logging");
    }
}
