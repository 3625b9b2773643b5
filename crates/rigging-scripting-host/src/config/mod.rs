pub mod paths;
pub mod rigging_config;
pub mod scripting_config;

pub use paths::ProjectPaths;
pub use rigging_config::{ConfigLoadError, RiggingConfig};
pub use scripting_config::{ExtraPackConfig, PackConfig, ScriptingConfig};
