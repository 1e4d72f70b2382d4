//! logging stubs for consistent progress and task presentation
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

/// A shared, thread safe output sink.
pub type LogSink = Arc<Mutex<dyn Write + Send>>;

/// Where the user facing progress log of a run goes.
///
/// This is distinct from `tracing` diagnostics: it carries the short messages a user sees
/// while a package is resolved (`downloading 'k8s' from ...`) and can be redirected or
/// silenced per run.
#[derive(Clone, Default)]
pub enum LogWriter {
    /// Write to the process's standard error.
    #[default]
    Stderr,
    /// Discard all output.
    Silent,
    /// Write to a caller supplied sink.
    Sink(LogSink),
}

impl LogWriter {
    /// Wrap any writer as a sink.
    pub fn sink(writer: impl Write + Send + 'static) -> Self {
        LogWriter::Sink(Arc::new(Mutex::new(writer)))
    }

    pub(crate) fn line(&self, args: fmt::Arguments<'_>) {
        let res = match self {
            LogWriter::Silent => Ok(()),
            LogWriter::Stderr => writeln!(std::io::stderr().lock(), "{args}"),
            LogWriter::Sink(sink) => {
                let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                writeln!(sink, "{args}")
            },
        };
        if let Err(e) = res {
            tracing::warn!(error = %e, "failed to write to the run log");
        }
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogWriter::Stderr => f.write_str("Stderr"),
            LogWriter::Silent => f.write_str("Silent"),
            LogWriter::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

/// Set up the given span to be styled as a subtask of another span
pub fn set_sub_task(span: &Span, msg: &str) {
    span.pb_set_style(
        &ProgressStyle::with_template("  {span_child_prefix} {spinner:.blue} {wide_msg}")
            .unwrap_or(ProgressStyle::default_spinner()),
    );
    span.pb_set_message(msg);
}

/// Set up the given span to be styled as a progress bar
pub fn set_bar(span: &Span, msg: &str, len: u64) {
    let style = ProgressStyle::with_template(
        "{elapsed} ░ {prefix} ░ {bar:30.green/black} {percent}% ░ {msg}",
    )
    .unwrap_or(ProgressStyle::default_bar())
    .progress_chars("█▒ ");
    span.pb_set_style(&style);
    span.pb_set_message(msg);
    span.pb_set_length(len);
}
