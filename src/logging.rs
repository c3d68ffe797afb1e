//! Logging initialization
//!
//! Builds the process-wide tracing subscriber from [`LoggingConfig`]: an
//! `EnvFilter` seeded from the configured level (`RUST_LOG` still wins), a
//! console layer in plain or JSON form, and a daily-rolling file layer when
//! a writable log directory is available.

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber described by `config`.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = writable_log_dir().map(|dir| {
        let appender = tracing_appender::rolling::daily(&dir, "baton.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // The guard flushes buffered lines on drop; hold it for the
        // process lifetime
        Box::leak(Box::new(guard));
        eprintln!("Logging to: {dir}/baton.log");
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    let (console, console_json) = if config.json {
        (None, Some(fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(console_json)
        .with(file_layer)
        .init();
}

/// Pick the first configured log directory this process can actually write.
///
/// Checked from `BATON_LOG_DIR`, then `LOG_DIR`, then `/var/log/baton`.
/// `tracing_appender::rolling::daily` panics when it cannot create the
/// initial log file, so writability is confirmed up front and file logging
/// is skipped with a warning otherwise.
fn writable_log_dir() -> Option<String> {
    let dir = std::env::var("BATON_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/baton".to_string());

    if std::fs::create_dir_all(&dir).is_err() {
        eprintln!("Warning: could not create log directory {dir}, file logging disabled");
        return None;
    }

    let marker = std::path::Path::new(&dir).join(".baton-write-check");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            Some(dir)
        }
        Err(e) => {
            eprintln!("Warning: log directory {dir} is not writable ({e}), file logging disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_levels_parse_as_filter_directives() {
        let config = LoggingConfig::default();
        assert!(EnvFilter::try_new(&config.level).is_ok());

        // Directive lists are valid level strings too
        assert!(EnvFilter::try_new("info,baton=debug").is_ok());
        assert!(EnvFilter::try_new("debug").is_ok());
    }
}
