//! Tracing bootstrap.

use crate::config::{LogFormat, LoggingConfig};
use eddy_core::{Error, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the configured level and
/// module overrides. Fails if a subscriber is already installed or the
/// directives do not parse.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config, std::env::var("RUST_LOG").ok())?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    installed.map_err(|e| Error::config(format!("cannot install tracing subscriber: {}", e)))
}

fn build_filter(config: &LoggingConfig, env: Option<String>) -> Result<EnvFilter> {
    let directives = match env {
        Some(env) if !env.trim().is_empty() => env,
        _ => config.directives(),
    };
    EnvFilter::try_new(&directives)
        .map_err(|e| Error::config(format!("invalid log directives '{}': {}", directives, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: &str, modules: &[(&str, &str)]) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            modules: modules
                .iter()
                .map(|(m, l)| (m.to_string(), l.to_string()))
                .collect(),
            format: LogFormat::Plain,
        }
    }

    #[test]
    fn test_configured_directives_parse() {
        let config = config("info", &[("eddy_join", "trace")]);
        assert!(build_filter(&config, None).is_ok());
    }

    #[test]
    fn test_env_overrides_config() {
        let config = config("info", &[("eddy_join", "loud")]);
        assert!(build_filter(&config, Some("debug".to_string())).is_ok());
        assert!(build_filter(&config, Some("  ".to_string())).is_err());
    }

    #[test]
    fn test_invalid_module_level_is_config_error() {
        let config = config("info", &[("eddy_join", "loud")]);
        let err = build_filter(&config, None).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
