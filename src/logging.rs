use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Keep the returned guard alive for the lifetime of the process when file
/// logging is enabled, otherwise buffered lines are lost on exit.
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout = fmt::layer().with_target(false).with_ansi(config.ansi);

    match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "signal-sync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer().with_ansi(false).with_writer(writer);

            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .try_init();
            None
        }
    }
}
