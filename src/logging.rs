use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn setup_logging(config: &LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Detect if running under systemd/journald
    let is_systemd =
        std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_thread_ids(false)
                .init();
        }
        _ if is_systemd => {
            // journald already adds timestamps
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_names(false)
                .without_time()
                .compact()
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_names(false)
                .with_timer(UtcMillisTimer)
                .compact()
                .init();
        }
    }
}

/// "YYYY-MM-DD HH:MM:SS.mmm" in UTC
struct UtcMillisTimer;

impl tracing_subscriber::fmt::time::FormatTime for UtcMillisTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(
            w,
            "{}.{:03}",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis()
        )
    }
}
