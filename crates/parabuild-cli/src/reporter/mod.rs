//! Reporters: read-only bus subscribers that turn events into terminal output.

mod dumb;
mod simple;
mod status;

pub use dumb::DumbReporter;
pub use simple::SimpleReporter;
pub use status::StatusReporter;

use clap::ValueEnum;
use parabuild_core::Event;
use parabuild_scheduler::{EventBus, Progress, Subscriber};
use std::collections::HashMap;
use std::io::{IsTerminal, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReporterKind {
    /// Timestamped log of what the scheduler is doing
    Simple,
    /// Target-prefixed build output only
    Dumb,
    /// Live status line
    Status,
}

impl ReporterKind {
    /// `status` when stdout is a terminal, `dumb` otherwise.
    pub fn detect() -> Self {
        if std::io::stdout().is_terminal() {
            ReporterKind::Status
        } else {
            ReporterKind::Dumb
        }
    }
}

/// Subscribe the requested reporters to `bus`.
pub fn install(bus: &EventBus, kinds: &[ReporterKind], progress: &Progress) {
    for kind in kinds {
        match kind {
            ReporterKind::Simple => bus.subscribe(Printer(SimpleReporter::new())),
            ReporterKind::Dumb => bus.subscribe(Printer(DumbReporter::new())),
            ReporterKind::Status => bus.subscribe(StatusReporter::new(progress.clone())),
        }
    }
}

/// Text a reporter wants written, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout(String),
    Stderr(String),
}

/// Reporters that map each event to some output.
pub trait Render: Send {
    fn render(&mut self, event: &Event) -> Vec<Output>;
}

/// Writes whatever a [`Render`] produces to the process's stdout/stderr.
pub struct Printer<R>(pub R);

impl<R: Render> Subscriber for Printer<R> {
    fn on_event(&mut self, event: &Event) {
        for output in self.0.render(event) {
            write_output(&output);
        }
    }
}

pub(crate) fn write_output(output: &Output) {
    // Nothing sensible to do if the terminal went away.
    match output {
        Output::Stdout(text) => {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
        Output::Stderr(text) => {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(text.as_bytes());
            let _ = err.flush();
        }
    }
}

/// `1.5s` when precise, `2s` otherwise.
pub fn format_duration(duration: Duration, precise: bool) -> String {
    let secs = duration.as_secs_f64();
    if precise {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}s", secs)
    }
}

/// Prefix every line of `text` with `prefix`.
pub fn prefix_lines(prefix: &str, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    let mut out = String::with_capacity(text.len() + prefix.len());
    for line in body.split('\n') {
        out.push_str(prefix);
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Reassembles raw output chunks into whole lines, per target.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: HashMap<String, Vec<u8>>,
}

impl LineBuffer {
    /// Append a chunk and return the complete lines it finished, newline
    /// included.
    pub fn push(&mut self, target: &str, data: &[u8]) -> Option<String> {
        let buf = self.partial.entry(target.to_string()).or_default();
        buf.extend_from_slice(data);

        let end = buf.iter().rposition(|b| *b == b'\n')? + 1;
        let complete: Vec<u8> = buf.drain(..end).collect();
        Some(String::from_utf8_lossy(&complete).into_owned())
    }

    /// Drain unterminated output of every target, newline appended.
    pub fn flush(&mut self) -> Vec<(String, String)> {
        let mut rest: Vec<(String, String)> = self
            .partial
            .drain()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(target, buf)| {
                let mut text = String::from_utf8_lossy(&buf).into_owned();
                text.push('\n');
                (target, text)
            })
            .collect();
        rest.sort();
        rest
    }
}
