use std::borrow::Cow;

use anyhow::{bail, Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FORMAT_TEXT: &str = "text";
const LOG_FORMAT_JSON: &str = "json";
const LOG_LEVEL_ENV: &str = "CONFORMANCE_LOG_LEVEL";
/// Keeps the TAP stream readable unless asked otherwise
const DEFAULT_LOG_LEVEL: &str = "error";

enum LogFormat {
    Text,
    Json,
}

fn detect_log_format(log_format: Option<&str>) -> Result<LogFormat> {
    match log_format {
        None | Some(LOG_FORMAT_TEXT) => Ok(LogFormat::Text),
        Some(LOG_FORMAT_JSON) => Ok(LogFormat::Json),
        Some(unknown) => bail!("unknown log format: {}", unknown),
    }
}

/// `--log-level` wins over `--debug`, which wins over the environment
fn detect_log_level(
    input: Option<String>,
    is_debug: bool,
    from_env: Option<String>,
) -> Result<EnvFilter> {
    let log_level: Cow<str> = match (input, from_env) {
        (Some(level), _) => level.into(),
        (None, _) if is_debug => "debug".into(),
        (None, Some(level)) => level.into(),
        (None, None) => DEFAULT_LOG_LEVEL.into(),
    };

    Ok(EnvFilter::try_new(log_level.as_ref())?)
}

#[derive(Debug, Default)]
pub struct LoggerConfig {
    pub log_debug_flag: bool,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

pub fn init<T>(config: T) -> Result<()>
where
    T: Into<LoggerConfig>,
{
    let config = config.into();
    let filter = detect_log_level(
        config.log_level,
        config.log_debug_flag,
        std::env::var(LOG_LEVEL_ENV).ok(),
    )
    .context("failed to parse log level")?;
    let log_format =
        detect_log_format(config.log_format.as_deref()).context("failed to detect log format")?;

    let subscriber = tracing_subscriber::registry().with(filter);
    match log_format {
        LogFormat::Text => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to init logger: {}", e))
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    fn level_of(filter: EnvFilter) -> Option<LevelFilter> {
        filter.max_level_hint()
    }

    #[test]
    fn test_detect_log_level_precedence() -> Result<()> {
        assert_eq!(
            level_of(detect_log_level(
                Some("warn".to_string()),
                true,
                Some("trace".to_string())
            )?),
            Some(LevelFilter::WARN)
        );
        assert_eq!(
            level_of(detect_log_level(None, true, Some("trace".to_string()))?),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            level_of(detect_log_level(None, false, Some("trace".to_string()))?),
            Some(LevelFilter::TRACE)
        );
        assert_eq!(
            level_of(detect_log_level(None, false, None)?),
            Some(LevelFilter::ERROR)
        );
        Ok(())
    }

    #[test]
    fn test_detect_log_level_accepts_directives() {
        assert!(detect_log_level(
            Some("runtime_conformance=debug,test_framework=info".to_string()),
            false,
            None
        )
        .is_ok());
        let invalid = Some("runtime_conformance=loud".to_string());
        assert!(detect_log_level(invalid, false, None).is_err());
    }

    #[test]
    fn test_detect_log_format() {
        assert!(matches!(detect_log_format(None), Ok(LogFormat::Text)));
        assert!(matches!(detect_log_format(Some("json")), Ok(LogFormat::Json)));
        assert!(detect_log_format(Some("yaml")).is_err());
    }
}
