//! Live progress reporting for interactive runs.

use indicatif::{ProgressBar, ProgressStyle};

use crate::{Event, Subscriber};

/// A subscriber ticking a spinner with arrival/queue/completion counters.
pub struct ProgressReporter {
    bar: ProgressBar,
    arrived: usize,
    queued: usize,
    finished: usize,
}

impl ProgressReporter {
    /// Constructs a reporter drawing to stderr.
    #[must_use]
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}"));
        Self {
            bar,
            arrived: 0,
            queued: 0,
            finished: 0,
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscriber for ProgressReporter {
    fn handle(&mut self, event: &Event) {
        match event {
            Event::Arrived(_) => self.arrived += 1,
            Event::Queued(_) => self.queued += 1,
            Event::ProcessingFinished(_) => self.finished += 1,
            Event::AllProcessed => {
                self.bar.finish_and_clear();
                return;
            }
            _ => return,
        }
        self.bar.set_message(&format!(
            "[A={arrived}] [Q={queued}] [F={finished}]",
            arrived = self.arrived,
            queued = self.queued,
            finished = self.finished,
        ));
        self.bar.tick();
    }
}
