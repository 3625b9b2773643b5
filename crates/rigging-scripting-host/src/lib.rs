//! Host runtime for discovering, preprocessing and running script packs
//!
//! One [`ScriptManager`] exists per [`ScriptType`]. It discovers the script
//! files under its root, preprocesses them in parallel, then runs each pack
//! in its own isolated execution context. Hosts contribute bindings through
//! a shared [`ScriptHost`].

pub mod bindings;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod host;
pub mod manager;
pub mod pack;
pub mod preprocess;
pub mod reload;
pub mod script_scanner;
pub mod script_type;
pub mod unit;
pub mod value;

pub use bindings::{BindingRegistry, Bindings, BindingsEvent, Global};
pub use config::{RiggingConfig, ScriptingConfig};
pub use console::{BufferedConsole, ConsoleLevel, ScriptConsole, TracingConsole};
pub use engine::{
    CapabilityRestrictions, ContextSpec, EngineLimits, ExecutionContext, RhaiEngine, ScriptEngine,
};
pub use error::ScriptError;
pub use host::ScriptHost;
pub use manager::{LOADED_EVENT, LoadSummary, ManagerState, ScriptManager};
pub use pack::{PackInfo, ScriptPack};
pub use preprocess::{Downleveler, Passthrough, PreprocessError, SourcePreprocessor};
pub use reload::{ReloadTrigger, spawn_reload_signal_listener};
pub use script_scanner::{ScanResult, ScriptScanner};
pub use script_type::ScriptType;
pub use unit::{PreloadError, ScriptFileInfo, ScriptUnit, UnitError, UnitState};
pub use value::{HostFunction, ScriptValue};

// Re-exported so hosts can name event bus types without a direct dependency
pub use rigging_events::{EventBus, HandlerId};
