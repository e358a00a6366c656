//! Explicitly constructed logging handle for the agent.
//!
//! Nothing here touches global state until [`Logger::install`] is called. Components
//! that want isolated output run their futures under [`Logger::dispatch`] instead.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod capture;
mod error;
mod options;

pub use capture::{CaptureWriter, CapturedLogs};
pub use error::{Error, Result};
pub use options::{Destination, LoggerOptions, RotationInterval, RotationPolicy, parse_level};

use std::path::Path;
use std::sync::Arc;

use tracing::dispatcher::DefaultGuard;
use tracing::{Dispatch, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;

/// Cloneable logging handle.
///
/// Clones share the same sink. For file destinations the background writer is
/// flushed when the last clone is dropped.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    guard: Option<Arc<WorkerGuard>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("file_backed", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Builds a logger from options.
    ///
    /// # Errors
    ///
    /// Returns an error if a file destination cannot be opened.
    pub fn new(options: &LoggerOptions) -> Result<Self> {
        match &options.destination {
            Destination::Stdout => Ok(Self {
                dispatch: build_dispatch(options.level, std::io::stdout, true),
                guard: None,
            }),
            Destination::File(path) => {
                let appender = rolling_appender(path, options.rotation)?;
                let (writer, guard) = tracing_appender::non_blocking(appender);

                Ok(Self {
                    dispatch: build_dispatch(options.level, writer, false),
                    guard: Some(Arc::new(guard)),
                })
            }
        }
    }

    /// Builds a logger that writes into memory, returning it with its buffer.
    #[must_use]
    pub fn capture(level: Level) -> (Self, CapturedLogs) {
        let logs = CapturedLogs::new();
        let logger = Self {
            dispatch: build_dispatch(level, logs.clone(), false),
            guard: None,
        };

        (logger, logs)
    }

    /// The dispatcher backing this logger.
    #[must_use]
    pub const fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Makes this logger the process-wide default. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInstalled`] if a global default already exists.
    pub fn install(&self) -> Result<()> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())
            .map_err(|_| Error::AlreadyInstalled)
    }

    /// Makes this logger the default for the current thread until the guard drops.
    #[must_use]
    pub fn scoped(&self) -> DefaultGuard {
        tracing::dispatcher::set_default(&self.dispatch)
    }
}

fn build_dispatch<W>(level: Level, writer: W, ansi: bool) -> Dispatch
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer)
        .finish();

    Dispatch::new(subscriber)
}

fn rolling_appender(path: &Path, policy: RotationPolicy) -> Result<RollingFileAppender> {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or(Error::MissingFilePath)?
        .to_string_lossy()
        .into_owned();

    let rotation = match policy.interval {
        RotationInterval::Never => Rotation::NEVER,
        RotationInterval::Hourly => Rotation::HOURLY,
        RotationInterval::Daily => Rotation::DAILY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file_name);
    if let Some(max_files) = policy.max_files {
        builder = builder.max_log_files(max_files);
    }

    builder
        .build(directory)
        .map_err(|e| Error::RollingFile(path.display().to_string(), e))
}
