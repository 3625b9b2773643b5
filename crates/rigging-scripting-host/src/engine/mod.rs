//! Pluggable scripting engine seam
//!
//! The manager only needs two capabilities from an engine: create an isolated
//! execution context with an initial namespace, and compile-and-run source text
//! inside it. [`RhaiEngine`] is the bundled implementation.

mod rhai_engine;

pub use rhai_engine::{EngineLimits, RhaiEngine};

use std::collections::{BTreeMap, BTreeSet};

use crate::bindings::Global;
use crate::error::ScriptError;
use crate::value::ScriptValue;

/// Names removed from every execution context before any script runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRestrictions {
    names: BTreeSet<String>,
}

impl CapabilityRestrictions {
    /// Process control, raw output, and script-loading primitives
    pub const STANDARD: &'static [&'static str] = &[
        "print",
        "debug",
        "eval",
        "import",
        "exit",
        "quit",
        "load",
        "loadWithNewGlobal",
    ];

    pub fn standard() -> Self {
        Self {
            names: Self::STANDARD.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// No restrictions at all
    pub fn none() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    /// Add a name to the restriction set
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for CapabilityRestrictions {
    fn default() -> Self {
        Self::standard()
    }
}

/// Everything an engine needs to build one pack's execution context
pub struct ContextSpec<'a> {
    /// Namespace of the pack the context belongs to
    pub pack: &'a str,
    /// Merged constants and bindings, bindings taking precedence
    pub namespace: &'a BTreeMap<String, Global>,
    /// Names that must not be reachable from scripts
    pub restrictions: &'a CapabilityRestrictions,
}

/// An isolated global namespace plus runtime state, one per pack per load
pub trait ExecutionContext: Send {
    /// Returns true if `name` resolves to a global value or function
    fn has_global(&self, name: &str) -> bool;

    /// Current value of a global, if present
    fn global(&self, name: &str) -> Option<ScriptValue>;

    /// All global names, sorted
    fn global_names(&self) -> Vec<String>;

    /// Compile `source` and run it against this context
    ///
    /// `location` identifies the unit in error messages.
    fn compile_and_run(&mut self, location: &str, source: &str) -> Result<(), ScriptError>;
}

/// Factory for execution contexts
pub trait ScriptEngine: Send + Sync {
    /// Engine name for diagnostics
    fn name(&self) -> &'static str;

    /// File extension (without dot) of source files this engine runs
    fn file_extension(&self) -> &'static str;

    /// Create a fresh context with the namespace installed and restricted names removed
    fn create_context(
        &self,
        spec: &ContextSpec<'_>,
    ) -> Result<Box<dyn ExecutionContext>, ScriptError>;
}
