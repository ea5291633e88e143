//! Terminal capability detection and utilities

use labcore::ThreatLevel;
use owo_colors::{OwoColorize, colors::css};

/// Detects whether colored output should be enabled
pub fn supports_color() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

/// Extension trait for colorizing output
pub trait Colorize {
    /// Color as success (green)
    fn success(&self) -> String;
    /// Color as warning (amber)
    fn warning(&self) -> String;
    /// Color as critical (red)
    fn critical(&self) -> String;
    /// Dim the text
    fn dim(&self) -> String;

    /// Color according to a threat level.
    fn threat(&self, level: ThreatLevel) -> String {
        match level {
            ThreatLevel::Normal => self.success(),
            ThreatLevel::Warning => self.warning(),
            ThreatLevel::Critical => self.critical(),
        }
    }
}

impl Colorize for str {
    fn success(&self) -> String {
        if supports_color() {
            self.fg::<css::Green>().to_string()
        } else {
            self.to_string()
        }
    }

    fn warning(&self) -> String {
        if supports_color() {
            self.fg::<css::Orange>().to_string()
        } else {
            self.to_string()
        }
    }

    fn critical(&self) -> String {
        if supports_color() {
            self.fg::<css::Red>().bold().to_string()
        } else {
            self.to_string()
        }
    }

    fn dim(&self) -> String {
        if supports_color() {
            self.dimmed().to_string()
        } else {
            self.to_string()
        }
    }
}

impl Colorize for String {
    fn success(&self) -> String {
        self.as_str().success()
    }

    fn warning(&self) -> String {
        self.as_str().warning()
    }

    fn critical(&self) -> String {
        self.as_str().critical()
    }

    fn dim(&self) -> String {
        self.as_str().dim()
    }
}
