//! Line-oriented log of the run.

use parabuild_core::Event;
use std::collections::HashMap;
use std::time::Instant;

use super::{LineBuffer, Output, Render, format_duration, prefix_lines};

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Error,
}

#[derive(Debug)]
pub struct SimpleReporter {
    timestamps: bool,
    total: usize,
    dispatched: usize,
    run_started: Option<Instant>,
    target_started: HashMap<String, Instant>,
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl Default for SimpleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleReporter {
    pub fn new() -> Self {
        Self {
            timestamps: true,
            total: 0,
            dispatched: 0,
            run_started: None,
            target_started: HashMap::new(),
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
        }
    }

    /// Drop the wall-clock prefix from every line.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    fn line(&self, level: Level, message: impl AsRef<str>) -> Output {
        let (label, to_stderr) = match level {
            Level::Info => ("info", false),
            Level::Error => ("error", true),
        };
        let text = if self.timestamps {
            format!(
                "[{}] {}: {}\n",
                chrono::Local::now().format("%H:%M:%S"),
                label,
                message.as_ref()
            )
        } else {
            format!("{}: {}\n", label, message.as_ref())
        };
        if to_stderr {
            Output::Stderr(text)
        } else {
            Output::Stdout(text)
        }
    }

    fn flush(&mut self) -> Vec<Output> {
        let mut out: Vec<Output> = self
            .stdout
            .flush()
            .into_iter()
            .map(|(target, text)| Output::Stdout(prefix_lines(&format!("{}: ", target), &text)))
            .collect();
        out.extend(
            self.stderr
                .flush()
                .into_iter()
                .map(|(target, text)| Output::Stderr(prefix_lines(&format!("{}: ", target), &text))),
        );
        out
    }
}

impl Render for SimpleReporter {
    fn render(&mut self, event: &Event) -> Vec<Output> {
        match event {
            Event::Init => vec![self.line(Level::Info, "Initializing builder ...")],
            Event::Skip { target } => {
                vec![self.line(Level::Info, format!("Not building {}", target))]
            }
            Event::Fork { count } => {
                vec![self.line(Level::Info, format!("Forking {} worker(s) ...", count))]
            }
            Event::StartAll { total, .. } => {
                self.total = *total;
                self.run_started = Some(Instant::now());
                vec![self.line(Level::Info, format!("Building {} target(s) ...", total))]
            }
            Event::StartOne { target, .. } => {
                self.dispatched += 1;
                self.target_started.insert(target.clone(), Instant::now());
                vec![self.line(
                    Level::Info,
                    format!("Building {}/{}: {} ...", self.dispatched, self.total, target),
                )]
            }
            Event::FinishOne { target, .. } => {
                let took = self
                    .target_started
                    .remove(target)
                    .map(|started| format!(" in {}", format_duration(started.elapsed(), true)))
                    .unwrap_or_default();
                vec![self.line(Level::Info, format!("Built {}{}", target, took))]
            }
            Event::FinishAll => vec![self.line(Level::Info, "All builds completed")],
            Event::Stdout { target, data } => self
                .stdout
                .push(target, data)
                .map(|lines| Output::Stdout(prefix_lines(&format!("{}: ", target), &lines)))
                .into_iter()
                .collect(),
            Event::Stderr { target, data } => self
                .stderr
                .push(target, data)
                .map(|lines| Output::Stderr(prefix_lines(&format!("{}: ", target), &lines)))
                .into_iter()
                .collect(),
            Event::Done => {
                let mut out = self.flush();
                let elapsed = self
                    .run_started
                    .map(|started| format_duration(started.elapsed(), true))
                    .unwrap_or_else(|| "0.0s".to_string());
                out.push(self.line(Level::Info, format!("Finished in {}", elapsed)));
                out
            }
            Event::Fatal { message, .. } => {
                let mut out = self.flush();
                out.push(self.line(Level::Error, message));
                out
            }
            Event::Enqueue { .. } | Event::WorkerReady { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parabuild_core::WorkerId;

    fn text(outputs: Vec<Output>) -> Vec<String> {
        outputs
            .into_iter()
            .map(|o| match o {
                Output::Stdout(t) => t,
                Output::Stderr(t) => format!("!{}", t),
            })
            .collect()
    }

    #[test]
    fn test_lifecycle_messages() {
        let mut reporter = SimpleReporter::new().without_timestamps();
        let worker = WorkerId::new(0);

        let mut lines = Vec::new();
        for event in [
            Event::Init,
            Event::Skip {
                target: "docs".to_string(),
            },
            Event::Fork { count: 2 },
            Event::StartAll {
                total: 2,
                workers: 2,
            },
            Event::StartOne {
                target: "app".to_string(),
                worker,
            },
            Event::StartOne {
                target: "lib".to_string(),
                worker: WorkerId::new(1),
            },
            Event::FinishAll,
        ] {
            lines.extend(text(reporter.render(&event)));
        }

        assert_eq!(
            lines,
            vec![
                "info: Initializing builder ...\n",
                "info: Not building docs\n",
                "info: Forking 2 worker(s) ...\n",
                "info: Building 2 target(s) ...\n",
                "info: Building 1/2: app ...\n",
                "info: Building 2/2: lib ...\n",
                "info: All builds completed\n",
            ]
        );
    }

    #[test]
    fn test_finish_reports_duration() {
        let mut reporter = SimpleReporter::new().without_timestamps();
        let worker = WorkerId::new(0);

        reporter.render(&Event::StartOne {
            target: "app".to_string(),
            worker,
        });
        let lines = text(reporter.render(&Event::FinishOne {
            target: "app".to_string(),
            worker,
        }));

        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("info: Built app in "));
        assert!(lines[0].ends_with("s\n"));
    }

    #[test]
    fn test_fatal_goes_to_stderr() {
        let mut reporter = SimpleReporter::new().without_timestamps();
        let lines = text(reporter.render(&Event::Fatal {
            message: "Build of target \"a\" failed: boom".to_string(),
            target: Some("a".to_string()),
            exit_code: 31,
        }));

        assert_eq!(lines, vec!["!error: Build of target \"a\" failed: boom\n"]);
    }

    #[test]
    fn test_timestamped_line() {
        let mut reporter = SimpleReporter::new();
        let lines = text(reporter.render(&Event::Init));

        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] info: Initializing builder ...\n"));
    }
}
