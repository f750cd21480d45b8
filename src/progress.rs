use std::io::{self, Write};
use std::time::Instant;

use crate::events::TranslateEvent;
use crate::textutil::truncate_for_log;

pub struct ConsoleProgress {
    enabled: bool,
    verbose: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            verbose: false,
            t0: Instant::now(),
        }
    }

    /// Also prints every `Translated` pair.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", progress_line(label, current, total));
    }

    pub fn render(&self, event: &TranslateEvent) {
        match event {
            TranslateEvent::Start { input } => self.info(format!("Start: {}", input.display())),
            TranslateEvent::Progress {
                stage,
                part,
                done,
                total,
            } => self.progress(&format!("{stage} {part}"), *done, *total),
            TranslateEvent::Translated {
                stage,
                original,
                translated,
            } => {
                if self.verbose {
                    self.info(format!(
                        "{stage}: {} => {}",
                        truncate_for_log(original, 80),
                        truncate_for_log(translated, 200)
                    ));
                }
            }
            TranslateEvent::Error { stage, message, .. } => {
                self.info(format!("Error [{stage}]: {message}"))
            }
            TranslateEvent::Complete { input, error } => match error {
                None => self.info(format!("Complete: {}", input.display())),
                Some(e) => self.info(format!("Complete: {} ({e})", input.display())),
            },
        }
    }
}

fn progress_line(label: &str, current: usize, total: usize) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let pct = (current as f64 / total as f64) * 100.0;
    format!("{label} {current}/{total} ({pct:5.1}%)")
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
