//! Spinner shown while discovery probes ports.

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ipmc::{DiscoveryEvent, DiscoveryState};

/// Discovery observer drawing an `indicatif` spinner on stderr.
///
/// The spinner is advanced from the observer's tick events rather than a
/// background thread, so it only moves while discovery is actually polling.
pub(crate) struct ScanProgress {
    bar: ProgressBar,
    total: usize,
    index: usize,
}

impl ScanProgress {
    /// A visible spinner, or a hidden one when `enabled` is false.
    pub(crate) fn new(enabled: bool) -> Self {
        let bar = if enabled {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            bar,
            total: 0,
            index: 0,
        }
    }

    /// Feed one discovery event.
    pub(crate) fn observe(&mut self, event: &DiscoveryEvent<'_>) {
        match event {
            DiscoveryEvent::Enumerated { count } => {
                self.total = *count;
                self.bar
                    .set_message(format!("Scanning {count} serial port(s)"));
            },
            DiscoveryEvent::StateChanged {
                port,
                state: DiscoveryState::ProbingPort,
            } => {
                self.index += 1;
                self.bar.set_message(self.status(port, "opening"));
            },
            DiscoveryEvent::StateChanged {
                port,
                state: state @ (DiscoveryState::AwaitingReady | DiscoveryState::AwaitingConfirm),
            } => {
                self.bar.set_message(self.status(port, &state.to_string()));
            },
            DiscoveryEvent::StateChanged { .. } => {},
            DiscoveryEvent::Tick { .. } => self.bar.tick(),
            DiscoveryEvent::Skipped { port, reason } => {
                self.bar.set_message(self.status(port, reason));
            },
        }
    }

    /// Current progress line.
    fn status(&self, port: &str, what: &str) -> String {
        format!("[{}/{}] {port}: {what}", self.index, self.total.max(self.index))
    }

    /// Replace the spinner with a success line.
    pub(crate) fn finish(&self, port: &str) {
        if self.bar.is_hidden() {
            return;
        }
        self.bar.finish_and_clear();
        eprintln!(
            "{} IPMC found on {}",
            style("✓").green().bold(),
            style(port).cyan()
        );
    }

    /// Remove the spinner without a message.
    pub(crate) fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}
