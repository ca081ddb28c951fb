//! Status sink: the three-line display fed by the lifecycle.

use tracing::info;

/// Exactly three short lines of text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusLines {
    pub lines: [String; 3],
}

impl StatusLines {
    pub fn new(first: impl Into<String>, second: impl Into<String>, third: impl Into<String>) -> Self {
        Self {
            lines: [first.into(), second.into(), third.into()],
        }
    }

    pub fn first(&self) -> &str {
        &self.lines[0]
    }

    pub fn second(&self) -> &str {
        &self.lines[1]
    }

    pub fn third(&self) -> &str {
        &self.lines[2]
    }
}

/// Receiver of status updates. Must not block the caller.
pub trait StatusSink {
    fn show(&mut self, lines: &StatusLines);
}

impl<S: StatusSink + ?Sized> StatusSink for Box<S> {
    fn show(&mut self, lines: &StatusLines) {
        (**self).show(lines)
    }
}

/// Sink that writes each update to the log.
///
/// Used on boards without a display and on the Linux host.
#[derive(Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn show(&mut self, lines: &StatusLines) {
        info!(
            target: "cloudlink::display",
            "| {} | {} | {} |",
            lines.first(),
            lines.second(),
            lines.third()
        );
    }
}
