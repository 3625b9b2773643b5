use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::ExecutionContext;
use crate::unit::ScriptUnit;

/// Identity of a pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackInfo {
    /// Unique within a manager, used in log output
    pub namespace: String,
    pub description: String,
}

impl PackInfo {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A named group of scripts sharing one execution context
pub struct ScriptPack {
    info: PackInfo,
    root: PathBuf,
    units: Vec<ScriptUnit>,
    context: Option<Box<dyn ExecutionContext>>,
}

impl ScriptPack {
    pub fn new(info: PackInfo, root: impl Into<PathBuf>) -> Self {
        Self {
            info,
            root: root.into(),
            units: Vec::new(),
            context: None,
        }
    }

    pub fn info(&self) -> &PackInfo {
        &self.info
    }

    pub fn namespace(&self) -> &str {
        &self.info.namespace
    }

    /// Directory the pack was discovered in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Units in execution order
    pub fn units(&self) -> &[ScriptUnit] {
        &self.units
    }

    pub(crate) fn units_mut(&mut self) -> &mut [ScriptUnit] {
        &mut self.units
    }

    pub fn unit(&self, location: &str) -> Option<&ScriptUnit> {
        self.units.iter().find(|unit| unit.location() == location)
    }

    /// Add a unit, keeping execution order
    pub fn push(&mut self, unit: ScriptUnit) {
        self.units.push(unit);
        self.units.sort_by(|a, b| a.load_order(b));
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Context created by the most recent load
    pub fn context(&self) -> Option<&dyn ExecutionContext> {
        self.context.as_deref()
    }

    pub(crate) fn set_context(&mut self, context: Box<dyn ExecutionContext>) {
        self.context = Some(context);
    }

    pub(crate) fn take_context(&mut self) -> Option<Box<dyn ExecutionContext>> {
        self.context.take()
    }
}

impl fmt::Debug for ScriptPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptPack")
            .field("info", &self.info)
            .field("root", &self.root)
            .field("units", &self.units.iter().map(ScriptUnit::location).collect::<Vec<_>>())
            .field("has_context", &self.context.is_some())
            .finish()
    }
}
