use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::AppResult;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Maps the `-v` count of the binaries onto a default level; `RUST_LOG` wins when set.
fn env_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// stdout only, used by tests.
pub fn setup_local_tracing() -> AppResult<()> {
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_test_writer();
    // a second test in the same binary may already have installed it
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .try_init();
    Ok(())
}

/// Server side: console plus an hourly rolled file under `log_dir`.
pub fn setup_server_tracing(log_dir: &str, verbose: u8) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::hourly(log_dir, "stonechat-server.log");
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
    let writer = non_blocking.and(std::io::stdout);

    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(verbose))
        .init();

    worker_guard
}

/// Client side: the terminal is the chat window, so logs only go to a file.
pub fn setup_client_tracing(log_dir: &str, verbose: u8) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "stonechat-client.log");
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);

    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(verbose))
        .init();

    worker_guard
}
