//! Debug message severities and sinks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// Debug message severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    Info,
    Low,
    Medium,
    High,
}

impl DebugLevel {
    pub const ALL: [DebugLevel; 4] = [
        DebugLevel::Info,
        DebugLevel::Low,
        DebugLevel::Medium,
        DebugLevel::High,
    ];

    fn log_level(self) -> log::Level {
        match self {
            DebugLevel::Info => log::Level::Info,
            DebugLevel::Low => log::Level::Debug,
            DebugLevel::Medium => log::Level::Warn,
            DebugLevel::High => log::Level::Error,
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugLevel::Info => "INFO",
            DebugLevel::Low => "LOW",
            DebugLevel::Medium => "MEDIUM",
            DebugLevel::High => "HIGH",
        };
        f.write_str(name)
    }
}

/// Receiver for diagnostics produced by the compute layer
///
/// Device errors can arrive from driver threads, so sinks must be `Send + Sync`.
pub trait DebugSink: Send + Sync {
    fn emit(&self, level: DebugLevel, message: &str);
}

impl<F> DebugSink for F
where
    F: Fn(DebugLevel, &str) + Send + Sync,
{
    fn emit(&self, level: DebugLevel, message: &str) {
        self(level, message)
    }
}

/// Prints messages at or above a threshold to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink {
    /// `None` prints every message
    pub min_level: Option<DebugLevel>,
}

impl StdoutSink {
    pub fn new(min_level: Option<DebugLevel>) -> Self {
        Self { min_level }
    }

    /// Whether a message at `level` passes the threshold
    pub fn accepts(&self, level: DebugLevel) -> bool {
        self.min_level.map_or(true, |min| level >= min)
    }

    fn format_line(level: DebugLevel, message: &str) -> String {
        format!("[microcompute] {}: {}", level, message)
    }
}

impl DebugSink for StdoutSink {
    fn emit(&self, level: DebugLevel, message: &str) {
        if !self.accepts(level) {
            return;
        }

        let line = Self::format_line(level, message);
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", line);
    }
}

/// Forwards messages to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DebugSink for LogSink {
    fn emit(&self, level: DebugLevel, message: &str) {
        log::log!(target: "microcompute", level.log_level(), "{}", message);
    }
}

/// Discards every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DebugSink for NullSink {
    fn emit(&self, _level: DebugLevel, _message: &str) {}
}
