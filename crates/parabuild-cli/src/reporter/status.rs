//! Single status line, redrawn in place.

use parabuild_core::Event;
use parabuild_scheduler::{Progress, ProgressSnapshot, Subscriber};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{LineBuffer, Output, format_duration, prefix_lines, write_output};

const REFRESH: Duration = Duration::from_millis(250);
const CLEAR_LINE: &str = "\r\x1b[2K";

/// Terminal state shared between the reporter and its refresh task.
#[derive(Debug, Default)]
struct Screen {
    active: bool,
}

impl Screen {
    fn clear(&self) {
        if self.active {
            write_output(&Output::Stdout(CLEAR_LINE.to_string()));
        }
    }

    fn draw(&self, snapshot: &ProgressSnapshot) {
        if self.active {
            write_output(&Output::Stdout(format!(
                "{}{}",
                CLEAR_LINE,
                status_line(snapshot)
            )));
        }
    }
}

pub struct StatusReporter {
    progress: Progress,
    screen: Arc<Mutex<Screen>>,
    ticker: Option<JoinHandle<()>>,
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl StatusReporter {
    pub fn new(progress: Progress) -> Self {
        Self {
            progress,
            screen: Arc::new(Mutex::new(Screen::default())),
            ticker: None,
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
        }
    }

    fn screen(&self) -> MutexGuard<'_, Screen> {
        self.screen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&mut self) {
        self.screen().active = true;
        self.redraw();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let progress = self.progress.clone();
        let screen = self.screen.clone();
        self.ticker = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(REFRESH);
            loop {
                interval.tick().await;
                let screen = screen.lock().unwrap_or_else(PoisonError::into_inner);
                if !screen.active {
                    break;
                }
                screen.draw(&progress.snapshot());
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let mut screen = self.screen();
        screen.clear();
        screen.active = false;
    }

    fn redraw(&self) {
        self.screen().draw(&self.progress.snapshot());
    }

    /// Print build output above the status line.
    fn print_above(&self, output: Output) {
        let screen = self.screen();
        screen.clear();
        write_output(&output);
        screen.draw(&self.progress.snapshot());
    }

    fn flush(&mut self) {
        for (target, text) in self.stdout.flush() {
            write_output(&Output::Stdout(prefix_lines(&format!("{}: ", target), &text)));
        }
        for (target, text) in self.stderr.flush() {
            write_output(&Output::Stderr(prefix_lines(&format!("{}: ", target), &text)));
        }
    }
}

impl Subscriber for StatusReporter {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::StartAll { .. } => self.start(),
            Event::StartOne { .. } | Event::FinishOne { .. } => self.redraw(),
            Event::Stdout { target, data } => {
                if let Some(lines) = self.stdout.push(target, data) {
                    self.print_above(Output::Stdout(prefix_lines(&format!("{}: ", target), &lines)));
                }
            }
            Event::Stderr { target, data } => {
                if let Some(lines) = self.stderr.push(target, data) {
                    self.print_above(Output::Stderr(prefix_lines(&format!("{}: ", target), &lines)));
                }
            }
            Event::Done => {
                self.stop();
                self.flush();
                let snapshot = self.progress.snapshot();
                write_output(&Output::Stdout(format!(
                    "Built {} target(s) in {}\n",
                    snapshot.completed,
                    format_duration(snapshot.elapsed, true)
                )));
            }
            Event::Fatal { message, .. } => {
                self.stop();
                self.flush();
                write_output(&Output::Stderr(format!("{}\n", message)));
            }
            _ => {}
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// `3/10 built, 2 active, 12s elapsed, ~8s remaining`
pub fn status_line(snapshot: &ProgressSnapshot) -> String {
    let mut line = format!(
        "{}/{} built, {} active, {} elapsed",
        snapshot.completed,
        snapshot.total,
        snapshot.running,
        format_duration(snapshot.elapsed, false)
    );
    if let Some(remaining) = snapshot.remaining {
        line.push_str(&format!(", ~{} remaining", format_duration(remaining, false)));
    }
    line
}
