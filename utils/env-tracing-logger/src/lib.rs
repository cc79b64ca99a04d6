//! `tracing` output for the command line tools: a console layer on stderr, an
//! optional log file, and filtering by `RUST_LOG`.

use std::path::PathBuf;

use time::{UtcOffset, format_description::well_known::Iso8601};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Directive used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Where log lines are written.
#[derive(Debug, Clone)]
pub struct LogOutputs {
    /// Also write to this file, replacing it.
    pub file: Option<PathBuf>,
    pub console: bool,
}

impl Default for LogOutputs {
    fn default() -> Self {
        Self {
            file: None,
            console: true,
        }
    }
}

/// Returned by [LogOutputs::install]. Hold it for the lifetime of the program.
#[must_use]
pub struct LogGuard {
    file: Option<PathBuf>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            tracing::debug!("Closing log file \"{}\".", file.display());
        }
    }
}

/// Log to the console only.
pub fn init() -> Result<LogGuard, BoxError> {
    LogOutputs::default().install()
}

// Timestamps use the UTC offset at the time logging starts.
fn local_timer() -> Result<OffsetTime<Iso8601>, BoxError> {
    let offset = UtcOffset::from_whole_seconds(chrono::Local::now().offset().local_minus_utc())?;
    Ok(OffsetTime::new(offset, Iso8601::DEFAULT))
}

fn env_filter(rust_log: Option<&str>) -> Result<EnvFilter, BoxError> {
    Ok(EnvFilter::try_new(rust_log.unwrap_or(DEFAULT_DIRECTIVE))?)
}

impl LogOutputs {
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Default::default()
        }
    }

    /// Install the global subscriber. Fails if one is already installed.
    pub fn install(self) -> Result<LogGuard, BoxError> {
        let timer = local_timer()?;

        let file_layer = match &self.file {
            Some(path) => {
                let file = std::fs::File::create(path)?;
                Some(
                    fmt::layer()
                        .with_timer(timer.clone())
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .with_file(true)
                        .with_line_number(true),
                )
            }
            None => None,
        };

        let console_layer = self.console.then(|| {
            fmt::layer()
                .with_timer(timer)
                .with_writer(std::io::stderr)
                .with_ansi(!cfg!(windows))
                .with_file(true)
                .with_line_number(true)
        });

        let rust_log = std::env::var("RUST_LOG").ok();
        let subscriber = tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer)
            .with(env_filter(rust_log.as_deref())?);
        tracing::subscriber::set_global_default(subscriber)?;

        let level = match &rust_log {
            Some(var) => format!("RUST_LOG=\"{var}\""),
            None => format!("default level \"{DEFAULT_DIRECTIVE}\""),
        };
        match &self.file {
            Some(path) => tracing::debug!("Logging to \"{}\" with {level}.", path.display()),
            None => tracing::debug!("Logging with {level}."),
        }

        Ok(LogGuard { file: self.file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter() {
        assert!(env_filter(None).is_ok());
        assert!(env_filter(Some("gaze_overlay=debug,warn")).is_ok());
        assert!(env_filter(Some("gaze_overlay=notalevel")).is_err());
    }

    #[test]
    fn test_log_to_file() -> Result<(), BoxError> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("log.txt");
        let outputs = LogOutputs {
            console: false,
            ..LogOutputs::with_file(&path)
        };
        {
            let _guard = outputs.install()?;
            tracing::info!("hello from test");
        }
        let contents = std::fs::read_to_string(&path)?;
        assert!(contents.contains("hello from test"));
        Ok(())
    }
}
