//! Plain pass-through of build output, one `target: line` per line.

use parabuild_core::Event;

use super::{LineBuffer, Output, Render, prefix_lines};

#[derive(Debug, Default)]
pub struct DumbReporter {
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl DumbReporter {
    pub fn new() -> Self {
        Self::default()
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

impl Render for DumbReporter {
    fn render(&mut self, event: &Event) -> Vec<Output> {
        match event {
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
            Event::Done => self.flush(),
            Event::Fatal { message, .. } => {
                let mut out = self.flush();
                out.push(Output::Stderr(format!("{}\n", message)));
                out
            }
            _ => Vec::new(),
        }
    }
}
