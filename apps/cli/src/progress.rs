//! Progress bars for `dlrelay watch`

use console::style;
use dlrelay_types::{Percent, ProgressSnapshot};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

/// One bar per download label
pub struct StatusProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl StatusProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ")
    }

    /// Apply a fresh snapshot; true once every download reached 100%
    pub fn update(&mut self, snapshot: &ProgressSnapshot) -> bool {
        let mut finished = true;

        for entry in &snapshot.entries {
            let bar = self.bars.entry(entry.label.clone()).or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(100));
                pb.set_style(Self::bar_style());
                pb.enable_steady_tick(Duration::from_millis(120));
                pb.set_message(entry.label.clone());
                pb
            });
            if bar.is_finished() {
                continue;
            }

            match entry.percent {
                Percent::Known(100) => {
                    bar.set_position(100);
                    bar.finish_with_message(format!(
                        "{} {}",
                        style("✓").green().bold(),
                        entry.label
                    ));
                }
                Percent::Known(p) => {
                    finished = false;
                    bar.set_position(u64::from(p));
                    bar.set_message(entry.label.clone());
                }
                Percent::Unknown => {
                    finished = false;
                    bar.set_message(format!("{} {}", entry.label, style("(size unknown)").dim()));
                }
            }
        }

        finished
    }

    /// Clear all progress bars
    pub fn clear(&mut self) {
        for (_, pb) in self.bars.drain() {
            pb.finish_and_clear();
        }
    }
}

impl Default for StatusProgress {
    fn default() -> Self {
        Self::new()
    }
}
