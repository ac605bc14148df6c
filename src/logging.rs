use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file prefix; files are named `galaxy-goldberg.YYYY-MM-DD`
pub const LOG_PREFIX: &str = "galaxy-goldberg";

/// Level filter: `RUST_LOG` wins when set, otherwise debug or info.
fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

fn ensure_log_dir(log_dir: &Utf8Path) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}

/// Setup logging to a daily rotating file, optionally mirrored to the console.
///
/// # Arguments
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `debug_mode` - If true, use debug level; otherwise use info level
/// * `console_output` - If true, also log to stderr with colors
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(
    log_dir: &Utf8Path,
    debug_mode: bool,
    console_output: bool,
) -> Result<WorkerGuard> {
    ensure_log_dir(log_dir)?;

    let file_appender = rolling::daily(log_dir, LOG_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // No ANSI codes in log files
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter(debug_mode))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global logger is already installed")?;

    tracing::info!(
        "Logging initialized: dir={}, debug={}, console={}",
        log_dir,
        debug_mode,
        console_output
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_log_directory_created() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = Utf8PathBuf::try_from(temp_dir.path().join("nested").join("logs")).unwrap();

        ensure_log_dir(&log_dir).unwrap();
        assert!(log_dir.is_dir());

        // Existing directory is fine
        ensure_log_dir(&log_dir).unwrap();
    }

    #[test]
    fn test_setup_logging_writes_into_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = Utf8PathBuf::try_from(temp_dir.path().join("logs")).unwrap();

        // Another test binary may have installed a subscriber already; the
        // directory is created either way.
        let _guard = setup_logging(&log_dir, false, false);
        assert!(log_dir.exists());
    }
}
