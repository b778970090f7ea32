//! Structured logging with JSON/pretty output and file rotation

use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::{FileLoggingConfig, LogFormat, LoggingConfig, RotationStrategy};

/// Guard that must be held to keep the async file writer running
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize logging with the given configuration
///
/// Returns a guard that must be held for the lifetime of the process so
/// buffered file output is flushed. Call once, from the binary.
pub fn init_logging(config: &LoggingConfig) -> LogGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if let Some(ref directives) = config.filter_directives {
            EnvFilter::new(directives)
        } else {
            EnvFilter::new(config.level.as_str())
        }
    });

    let (file_layer, guard) = match &config.file {
        Some(file_config) => {
            let (writer, guard) = create_file_writer(file_config);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(config.include_target)
                .with_ansi(false)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stdout)
            .with_target(config.include_target)
            .pretty()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(io::stdout)
            .with_target(config.include_target)
            .json()
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(io::stdout)
            .with_target(config.include_target)
            .compact()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    LogGuard { _guard: guard }
}

fn create_file_writer(
    config: &FileLoggingConfig,
) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let file_appender = match config.rotation {
        RotationStrategy::Daily => {
            tracing_appender::rolling::daily(&config.directory, &config.prefix)
        }
        RotationStrategy::Hourly => {
            tracing_appender::rolling::hourly(&config.directory, &config.prefix)
        }
        RotationStrategy::Never => {
            tracing_appender::rolling::never(&config.directory, &config.prefix)
        }
    };

    tracing_appender::non_blocking(file_appender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_file_writer_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileLoggingConfig {
            directory: PathBuf::from(dir.path()),
            prefix: "meshgate".to_string(),
            rotation: RotationStrategy::Never,
        };

        let (_writer, _guard) = create_file_writer(&config);
    }
}
