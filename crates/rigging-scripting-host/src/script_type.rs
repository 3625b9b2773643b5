use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::console::TracingConsole;

/// Category of scripts, each handled by its own manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    /// Scripts run once while the host boots
    Startup,
    /// Scripts that run on the authoritative side
    Server,
    /// Scripts that run on the presentation side
    Client,
}

impl ScriptType {
    pub const ALL: [ScriptType; 3] = [ScriptType::Startup, ScriptType::Server, ScriptType::Client];

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ScriptType::Startup => "startup",
            ScriptType::Server => "server",
            ScriptType::Client => "client",
        }
    }

    /// Name of the root directory under the scripting base directory
    pub fn directory_name(&self) -> &'static str {
        match self {
            ScriptType::Startup => "startup_scripts",
            ScriptType::Server => "server_scripts",
            ScriptType::Client => "client_scripts",
        }
    }

    /// Source seeded into a freshly created root directory
    pub fn example_script(&self) -> &'static str {
        match self {
            ScriptType::Startup => include_str!("../assets/example_startup.rhai"),
            ScriptType::Server => include_str!("../assets/example_server.rhai"),
            ScriptType::Client => include_str!("../assets/example_client.rhai"),
        }
    }

    /// Default logging sink for this type
    pub fn console(&self) -> TracingConsole {
        TracingConsole::new(*self)
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScriptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScriptType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown script type '{}' (expected startup, server or client)", s))
    }
}
