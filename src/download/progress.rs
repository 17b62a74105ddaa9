//! Download progress display.
//!
//! Every backend reduces its output to one signal: bytes, a percentage, or
//! a segment count. [`Progress`] renders that signal with indicatif.

use indicatif::{ProgressBar, ProgressStyle};

/// What the counter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Bytes,
    Percent,
    Segments,
}

/// A progress counter for one transfer.
pub struct Progress {
    bar: ProgressBar,
    unit: Unit,
}

fn style(unit: Unit) -> ProgressStyle {
    let template = match unit {
        Unit::Bytes => "{spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {wide_msg}",
        Unit::Percent => "{spinner:.green} [{bar:30.cyan/blue}] {pos}% {wide_msg}",
        Unit::Segments => "{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} seg {wide_msg}",
    };
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

impl Progress {
    pub fn new(label: &str, unit: Unit, total: Option<u64>, visible: bool) -> Self {
        let bar = if !visible {
            ProgressBar::hidden()
        } else {
            match (unit, total) {
                (Unit::Percent, _) => ProgressBar::new(100),
                (_, Some(total)) if total > 0 => ProgressBar::new(total),
                _ => ProgressBar::new_spinner(),
            }
        };
        bar.set_style(style(unit));
        bar.set_message(label.to_string());
        Self { bar, unit }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    pub fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    /// Record a percentage; values only move forward.
    pub fn set_percent(&self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let position = percent.clamp(0.0, 100.0).round() as u64;
        if position > self.bar.position() {
            self.bar.set_position(position);
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Stop drawing without completing, e.g. on interrupt.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_only_moves_forward() {
        let progress = Progress::new("x", Unit::Percent, None, false);
        progress.set_percent(40.4);
        progress.set_percent(12.0);
        progress.set_percent(f64::NAN);
        assert_eq!(progress.position(), 40);
        progress.set_percent(250.0);
        assert_eq!(progress.position(), 100);
    }
}
