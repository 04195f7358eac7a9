use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::types::{Error, Result};

/// Output format of the fmt subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-field human readable lines
    #[default]
    Full,
    /// One short line per event
    Compact,
    /// Newline-delimited JSON, for log shippers
    Json,
}

/// How a switchboard process wants its logs
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Name the process announces itself with
    pub app_name: String,
    /// Default level for targets without a directive
    pub level: Level,
    pub format: LogFormat,
    /// Include source file and line in every event
    pub file_info: bool,
    /// Emit an event when a span opens and closes
    pub span_events: bool,
    /// Extra `target=level` directives layered over the default level
    pub directives: Vec<String>,
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            level,
            format: LogFormat::default(),
            file_info: false,
            span_events: false,
            directives: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }

    /// Add a per-target directive such as `switchboard_routing_engine::routing=trace`
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Parse the default level plus every extra directive, in that order.
    ///
    /// A directive that does not parse is a configuration error naming the
    /// application, rather than being silently dropped.
    pub fn parsed_directives(&self) -> Result<Vec<Directive>> {
        let mut parsed = vec![Directive::from(self.level)];
        for raw in &self.directives {
            let directive = raw.parse::<Directive>().map_err(|e| {
                Error::Config(format!("{}: invalid log directive '{}': {}", self.app_name, raw, e))
            })?;
            parsed.push(directive);
        }
        Ok(parsed)
    }

    /// Announce the process and its version
    pub fn log_welcome(&self, version: &str) {
        tracing::info!("🚀 Starting {} v{}", self.app_name, version);
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` is read first and the configured directives are layered on top.
/// A second call keeps the subscriber that is already installed and returns
/// `Ok`, so every test can call this.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config
        .parsed_directives()?
        .into_iter()
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    match installed {
        Ok(()) => tracing::debug!("📝 Logging for {} at {} ({:?})", config.app_name, config.level, config.format),
        Err(_) => tracing::debug!("📝 {} reusing the subscriber already installed", config.app_name),
    }

    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("chatty").is_err());
    }

    #[test]
    fn test_directives_start_with_default_level() {
        let config = LoggingConfig::new(Level::WARN, "switchboard-test")
            .with_directive("switchboard_routing_engine::routing=trace");

        let directives = config.parsed_directives().unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].to_string(), Directive::from(Level::WARN).to_string());
        assert!(directives[1].to_string().starts_with("switchboard_routing_engine::routing="));
    }

    #[test]
    fn test_bad_directive_names_the_app() {
        let config = LoggingConfig::new(Level::INFO, "queue-monitor").with_directive("routing=loud");

        let err = setup_logging(&config).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("queue-monitor"), "{text}");
        assert!(text.contains("routing=loud"), "{text}");
    }

    #[test]
    fn test_setup_twice_is_harmless() {
        let config = LoggingConfig::new(Level::DEBUG, "switchboard-test")
            .with_format(LogFormat::Compact)
            .with_span_events()
            .with_file_info();
        assert!(setup_logging(&config).is_ok());
        assert!(setup_logging(&config).is_ok());
    }
}
