//! Diagnostics and progress rendering for the CLI.
//!
//! `tracing` events from the `pkg` crate land here. The run log a user sees while a package
//! resolves is written separately by `pkg` itself (see `pkg::log::LogWriter`).

use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::style::ProgressStyle;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

use super::LogArgs;

//================================================================================================
// Statics
//================================================================================================

/// Whether ANSI escape codes may be written to stderr.
pub static ANSI: AtomicBool = AtomicBool::new(true);

/// Transport crates that are only interesting when something is already wrong.
const NOISY: &[&str] = &["hyper_util=warn", "reqwest=warn", "rustls=warn", "h2=warn"];

//================================================================================================
// Modules
//================================================================================================

/// Contains ANSI escape codes for styling terminal output.
pub mod ansi {
    /// ANSI escape code for magenta text.
    pub const MAGENTA: &str = "\x1b[35m";
    /// ANSI escape code to reset terminal styling.
    pub const RESET: &str = "\x1b[0m";
}

//================================================================================================
// Macros
//================================================================================================

/// Log a terminal error, highlighted when the terminal supports it.
#[macro_export]
macro_rules! fatal {
    ($error:expr) => {{
        use $crate::cli::logging::{ANSI, ansi};
        let ansi = ANSI.load(std::sync::atomic::Ordering::SeqCst);
        tracing::error!(
            fatal = true,
            "{}FATAL{} {:#}",
            if ansi { ansi::MAGENTA } else { "" },
            if ansi { ansi::RESET } else { "" },
            $error
        );
    }};
}

//================================================================================================
// Functions
//================================================================================================

/// Install the global subscriber.
///
/// Terminals get the compact human format interleaved with progress spinners; anything else
/// gets JSON lines. The returned guard flushes the non-blocking writer when dropped.
pub fn init_global_subscriber(args: LogArgs) -> WorkerGuard {
    let log_level = get_log_level(args);

    let mut env_filter = EnvFilter::from_default_env().add_directive(log_level.into());
    if log_level < LevelFilter::TRACE {
        for directive in NOISY.iter().filter_map(|d| d.parse().ok()) {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    let progress_layer = IndicatifLayer::new().with_progress_style(
        ProgressStyle::with_template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap_or(ProgressStyle::default_spinner()),
    );

    let fmt = if std::io::stderr().is_terminal() {
        fmt::layer()
            .without_time()
            .with_writer(progress_layer.get_stderr_writer())
            .with_target(log_level == LevelFilter::TRACE)
            .with_span_events(fmt::format::FmtSpan::NONE)
            .compact()
            .boxed()
    } else {
        ANSI.store(false, Ordering::SeqCst);
        fmt::layer()
            .with_ansi(false)
            .json()
            .with_writer(non_blocking)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt)
        .with(env_filter)
        .with(progress_layer)
        .init();

    guard
}

/// `--quiet` wins over `RUST_LOG`, which wins over `--verbosity`.
fn get_log_level(args: LogArgs) -> LevelFilter {
    match args.quiet {
        0 => (),
        1 => return LevelFilter::WARN,
        _ => return LevelFilter::ERROR,
    }

    if let Ok(rust_log) = std::env::var(EnvFilter::DEFAULT_ENV)
        && let Ok(level) = LevelFilter::from_str(&rust_log)
    {
        return level;
    }

    match args.verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
