//! Logging for FReD nodes
//!
//! Library code only emits `tracing` events. Binaries install a subscriber
//! once at startup through [`init_logging_with_config`]; events go to stderr
//! so stdout stays free for command output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum level, unless `RUST_LOG` says otherwise
    pub level: LogLevel,
    /// Print the module path of each event
    pub with_target: bool,
    /// One JSON object per line instead of human-readable text
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig::new(LogLevel::Info)
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        LogConfig { level, with_target: true, json_format: false }
    }

    pub fn with_target(self, with_target: bool) -> Self {
        LogConfig { with_target, ..self }
    }

    pub fn json_format(self, json_format: bool) -> Self {
        LogConfig { json_format, ..self }
    }

    /// Directive handed to `EnvFilter` when `RUST_LOG` is unset.
    ///
    /// Only our own crates follow the configured level; dependencies stay
    /// at `warn`.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str();
        format!("warn,fred_core={level},fred_cli={level}")
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(self.filter_directive())
                .map_err(|e| LoggingError::InvalidConfiguration(e.to_string())),
        }
    }
}

/// Install an info-level subscriber
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Install a subscriber for `config`. Fails if one is already installed.
///
/// ```
/// use fred_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// init_logging_with_config(LogConfig::new(LogLevel::Debug).json_format(true))?;
/// # Ok::<(), fred_core::logging::LoggingError>(())
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let output = fmt::layer().with_writer(std::io::stderr).with_target(config.with_target);
    let output = if config.json_format { output.json().boxed() } else { output.boxed() };

    tracing_subscriber::registry()
        .with(config.env_filter()?)
        .with(output)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}
