use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::paths;
use crate::engine::{CapabilityRestrictions, EngineLimits};
use crate::script_type::ScriptType;

/// Per-pack overrides, keyed by pack namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackConfig {
    /// Disabled packs are skipped during discovery
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub description: Option<String>,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            description: None,
        }
    }
}

/// An additional pack directory outside the type's root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraPackConfig {
    pub script_type: ScriptType,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Whether scripting is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the `*_scripts` roots (default: platform data dir)
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Worker threads for preprocessing (default: one per core)
    #[serde(default)]
    pub preprocess_threads: Option<usize>,

    /// Operation budget per script file, 0 for unlimited
    #[serde(default)]
    pub max_operations: u64,

    /// Maximum function call nesting
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Names removed from script namespaces on top of the standard set
    #[serde(default)]
    pub blocked_capabilities: Vec<String>,

    /// Whether hot reload is enabled (default: true)
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// Hot reload scan interval in milliseconds (default: 1000ms)
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,

    #[serde(default)]
    pub packs: BTreeMap<String, PackConfig>,

    #[serde(default)]
    pub extra_packs: Vec<ExtraPackConfig>,
}

fn default_true() -> bool {
    true
}

fn default_max_call_levels() -> usize {
    EngineLimits::default().max_call_levels
}

fn default_hot_reload_interval() -> u64 {
    1000
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_dir: None,
            preprocess_threads: None,
            max_operations: 0,
            max_call_levels: default_max_call_levels(),
            blocked_capabilities: Vec::new(),
            hot_reload: true,
            hot_reload_interval_ms: default_hot_reload_interval(),
            packs: BTreeMap::new(),
            extra_packs: Vec::new(),
        }
    }
}

impl ScriptingConfig {
    /// Get the base directory (use provided or default)
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| paths::data_dir_or(".rigging"))
    }

    /// Root directory for one script type
    pub fn script_dir(&self, script_type: ScriptType) -> PathBuf {
        self.base_dir().join(script_type.directory_name())
    }

    /// Standard restrictions plus anything listed in `blocked_capabilities`
    pub fn restrictions(&self) -> CapabilityRestrictions {
        let mut restrictions = CapabilityRestrictions::standard();
        restrictions.extend(self.blocked_capabilities.iter().cloned());
        restrictions
    }

    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            max_operations: self.max_operations,
            max_call_levels: self.max_call_levels,
        }
    }

    /// Pack settings, defaulting to enabled with no description
    pub fn pack(&self, namespace: &str) -> PackConfig {
        self.packs.get(namespace).cloned().unwrap_or_default()
    }

    /// Extra pack directories registered for `script_type`
    pub fn extra_pack_dirs(&self, script_type: ScriptType) -> Vec<PathBuf> {
        self.extra_packs
            .iter()
            .filter(|extra| extra.script_type == script_type)
            .map(|extra| extra.path.clone())
            .collect()
    }
}
