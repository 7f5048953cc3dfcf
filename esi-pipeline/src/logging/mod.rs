//! Logging setup with a reloadable filter and log file retention.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::config::LoggingSettings;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "esi_pipeline=info,sqlx=warn";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Base name of rolled log files.
const LOG_FILE_PREFIX: &str = "esi-pipeline.log";

/// Timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Live logging state returned by [`init_logging`].
pub struct LoggingHandle {
    handle: FilterHandle,
    log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Delete rolled log files older than seven days, once a day.
    pub fn start_retention_cleanup(&self, cancel_token: CancellationToken) -> Option<JoinHandle<()>> {
        let log_dir = self.log_dir.clone()?;
        Some(spawn_retention_cleanup(log_dir, cancel_token))
    }
}

fn spawn_retention_cleanup(log_dir: PathBuf, cancel_token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cleanup_interval = Duration::from_secs(24 * 60 * 60);

        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                warn!(error = %e, "Failed to cleanup old logs");
            }

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(cleanup_interval) => {}
            }
        }
    })
}

/// Delete log files older than `retention_days`. Returns how many were removed.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{}.", LOG_FILE_PREFIX);

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        // esi-pipeline.log.YYYY-MM-DD
        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix.as_str()))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }
    Ok(deleted_count)
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. With a log
/// directory set, output is also written to a daily-rolled file; the returned
/// handle keeps that writer alive.
pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingHandle> {
    let initial_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (text_layer, json_layer) = if settings.json {
        (None, Some(fmt::layer().json().with_timer(LocalTimer)))
    } else {
        (Some(fmt::layer().with_ansi(true).with_timer(LocalTimer)), None)
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(LoggingHandle {
        handle: filter_handle,
        log_dir: settings.log_dir.clone(),
        _guard: guard,
    })
}
