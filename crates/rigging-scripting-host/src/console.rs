use std::sync::{Mutex, PoisonError};

use crate::script_type::ScriptType;

/// Logging sink that receives per-file results and load summaries
pub trait ScriptConsole: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Console that forwards to `tracing` under the `scripting` target
#[derive(Debug, Clone, Copy)]
pub struct TracingConsole {
    script_type: ScriptType,
}

impl TracingConsole {
    pub fn new(script_type: ScriptType) -> Self {
        Self { script_type }
    }
}

impl ScriptConsole for TracingConsole {
    fn info(&self, message: &str) {
        tracing::info!(target: "scripting", script_type = self.script_type.name(), "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "scripting", script_type = self.script_type.name(), "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "scripting", script_type = self.script_type.name(), "{}", message);
    }
}

/// Severity of a buffered console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Info,
    Warn,
    Error,
}

/// Console that keeps every line in memory
///
/// Useful for hosts that render script output themselves, and for tests.
#[derive(Debug, Default)]
pub struct BufferedConsole {
    lines: Mutex<Vec<(ConsoleLevel, String)>>,
}

impl BufferedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines written so far
    pub fn lines(&self) -> Vec<(ConsoleLevel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines at the given level
    pub fn lines_at(&self, level: ConsoleLevel) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line)
            .collect()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, level: ConsoleLevel, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}

impl ScriptConsole for BufferedConsole {
    fn info(&self, message: &str) {
        self.push(ConsoleLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(ConsoleLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(ConsoleLevel::Error, message);
    }
}
