//! Tracing subscriber setup for processes embedding a volume.

use std::io::IsTerminal;

use blockvol_types::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global tracing subscriber.
///
/// Supports three formats:
/// - `Text`: Human-readable format (development)
/// - `Json`: JSON structured logging (production)
/// - `Auto`: JSON for non-TTY stdout, text otherwise
///
/// `RUST_LOG` overrides the configured filter. Returns false if a global
/// subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    if use_json(config.format) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).try_init().is_ok()
    }
}

fn use_json(format: LogFormat) -> bool {
    match format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stdout().is_terminal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_formats() {
        assert!(use_json(LogFormat::Json));
        assert!(!use_json(LogFormat::Text));
    }

    #[test]
    fn test_second_init_is_refused() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
