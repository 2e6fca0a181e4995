//! Logging setup for the gateway.
//!
//! Console output by default, optionally tee'd into a rolling log file.
//! The `RUST_LOG` environment variable overrides the configured level
//! filter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, trace, warn};

/// Log file rotation cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Hourly,
    Daily,
    Never,
}

impl From<Rotation> for rolling::Rotation {
    fn from(r: Rotation) -> Self {
        match r {
            Rotation::Hourly => rolling::Rotation::HOURLY,
            Rotation::Daily => rolling::Rotation::DAILY,
            Rotation::Never => rolling::Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files; `None` disables file logging.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Prefix for rolled log file names.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    #[serde(default)]
    pub rotation: Rotation,

    /// Emit JSON records instead of the human-readable format.
    #[serde(default)]
    pub json_format: bool,

    /// Also write to stdout.
    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "bucketfs".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: Rotation::default(),
            json_format: false,
            console_output: true,
        }
    }
}

type BoxedLayer<S> = Box<dyn tracing_subscriber::Layer<S> + Send + Sync>;

fn fmt_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    S: Send + Sync + 'static,
{
    if json {
        Box::new(fmt::layer().json())
    } else {
        Box::new(fmt::layer())
    }
}

fn file_layer<S>(config: &LogConfig, dir: &Path) -> (BoxedLayer<S>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    S: Send + Sync + 'static,
{
    let appender = rolling::RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(dir)
        .expect("failed to create rolling file appender");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer: BoxedLayer<S> = if config.json_format {
        Box::new(fmt::layer().json().with_writer(writer))
    } else {
        Box::new(fmt::layer().with_writer(writer))
    };
    (layer, guard)
}

/// Install the global subscriber. Call once at startup; the returned
/// guard must stay alive for the file writer to flush.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console = config.console_output.then(|| fmt_layer(config.json_format));
    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            let (layer, guard) = file_layer(config, dir);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    guard
}
