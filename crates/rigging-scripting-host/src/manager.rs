//! Per-type script manager
//!
//! A manager owns every pack discovered under one script type's root, the
//! namespace installed into their contexts, and the event bus scripts listen
//! on. A load pass is split in two: all units are preprocessed in parallel,
//! then each pack gets a fresh context and its units run one at a time in
//! execution order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use rayon::prelude::*;
use rigging_events::{EventBus, HandlerId};
use tracing::{debug, warn};

use crate::bindings::{self, BindingRegistry, Bindings, BindingsEvent, DefaultBindingSources};
use crate::config::{PackConfig, ScriptingConfig};
use crate::console::ScriptConsole;
use crate::engine::{CapabilityRestrictions, ContextSpec, RhaiEngine, ScriptEngine};
use crate::host::ScriptHost;
use crate::pack::{PackInfo, ScriptPack};
use crate::preprocess::{Downleveler, SourcePreprocessor};
use crate::script_scanner::find_script_files;
use crate::script_type::ScriptType;
use crate::unit::{ScriptFileInfo, ScriptUnit, UnitError, UnitState};
use crate::value::ScriptValue;

/// Posted on the manager's own bus after every load pass
pub const LOADED_EVENT: &str = "loaded";

/// Where a manager is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Discovered,
    Loaded,
    Unloaded,
}

/// Counts from the most recent load pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub loaded: usize,
    pub total: usize,
}

impl LoadSummary {
    pub fn failed(&self) -> usize {
        self.total - self.loaded
    }
}

pub struct ScriptManager {
    script_type: ScriptType,
    directory: PathBuf,
    host: Arc<ScriptHost>,
    engine: Arc<dyn ScriptEngine>,
    preprocessor: Arc<dyn SourcePreprocessor>,
    console: Arc<dyn ScriptConsole>,
    restrictions: CapabilityRestrictions,
    preprocess_threads: Option<usize>,
    pack_config: BTreeMap<String, PackConfig>,
    extra_pack_dirs: Vec<PathBuf>,

    events: Arc<EventBus<ScriptValue>>,
    script_handlers: Arc<Mutex<Vec<HandlerId>>>,
    current_unit: Arc<RwLock<Option<String>>>,
    packs: Vec<ScriptPack>,
    registry: BindingRegistry,
    errors: Vec<String>,
    summary: LoadSummary,
    state: ManagerState,
}

impl ScriptManager {
    /// Create a manager rooted at `directory` with the bundled engine and preprocessor
    pub fn new(script_type: ScriptType, directory: impl Into<PathBuf>, host: Arc<ScriptHost>) -> Self {
        Self {
            script_type,
            directory: directory.into(),
            host,
            engine: Arc::new(RhaiEngine::new()),
            preprocessor: Arc::new(Downleveler),
            console: Arc::new(script_type.console()),
            restrictions: CapabilityRestrictions::standard(),
            preprocess_threads: None,
            pack_config: BTreeMap::new(),
            extra_pack_dirs: Vec::new(),
            events: Arc::new(EventBus::new()),
            script_handlers: Arc::new(Mutex::new(Vec::new())),
            current_unit: Arc::new(RwLock::new(None)),
            packs: Vec::new(),
            registry: BindingRegistry::default(),
            errors: Vec::new(),
            summary: LoadSummary::default(),
            state: ManagerState::Created,
        }
    }

    /// Create a manager with directories, limits, and pack settings taken from config
    pub fn from_config(script_type: ScriptType, config: &ScriptingConfig, host: Arc<ScriptHost>) -> Self {
        let mut manager = Self::new(script_type, config.script_dir(script_type), host)
            .with_engine(Arc::new(RhaiEngine::with_limits(config.limits())))
            .with_restrictions(config.restrictions())
            .with_preprocess_threads(config.preprocess_threads);
        manager.pack_config = config.packs.clone();
        manager.extra_pack_dirs = config.extra_pack_dirs(script_type);
        manager
    }

    pub fn with_engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn SourcePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_console(mut self, console: Arc<dyn ScriptConsole>) -> Self {
        self.console = console;
        self
    }

    pub fn with_restrictions(mut self, restrictions: CapabilityRestrictions) -> Self {
        self.restrictions = restrictions;
        self
    }

    /// Size of the preprocessing pool, `None` for rayon's global pool
    pub fn with_preprocess_threads(mut self, threads: Option<usize>) -> Self {
        self.preprocess_threads = threads;
        self
    }

    pub fn with_pack_config(mut self, namespace: impl Into<String>, config: PackConfig) -> Self {
        self.pack_config.insert(namespace.into(), config);
        self
    }

    /// Also discover `dir` as a pack on every [`discover`](Self::discover)
    pub fn with_extra_pack_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_pack_dirs.push(dir.into());
        self
    }

    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn engine(&self) -> &dyn ScriptEngine {
        self.engine.as_ref()
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn packs(&self) -> &[ScriptPack] {
        &self.packs
    }

    pub fn pack(&self, namespace: &str) -> Option<&ScriptPack> {
        self.packs.iter().find(|pack| pack.namespace() == namespace)
    }

    /// One `location: message` entry per unit that failed in the last load
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn summary(&self) -> LoadSummary {
        self.summary
    }

    /// Bindings collected by the most recent load
    pub fn bindings(&self) -> &Bindings {
        &self.registry.bindings
    }

    /// Constants collected by the most recent load
    pub fn constants(&self) -> &Bindings {
        &self.registry.constants
    }

    /// The bus that `onEvent`/`postEvent` use for this script type
    pub fn events(&self) -> &Arc<EventBus<ScriptValue>> {
        &self.events
    }

    /// Post an event to script handlers, returning how many ran
    pub fn post_event(&self, name: &str, payload: &ScriptValue) -> usize {
        self.events.post(name, payload)
    }

    /// Location of the unit currently executing, if any
    pub fn current_unit(&self) -> Option<String> {
        self.current_unit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build the root pack and any extra packs from disk
    ///
    /// A missing root is created and seeded with an example script first.
    pub fn discover(&mut self) {
        self.seed_directory();

        let root = self.directory.clone();
        self.discover_pack(&root);
        for dir in self.extra_pack_dirs.clone() {
            self.discover_pack(&dir);
        }

        debug!(
            target: "scripting",
            "Discovered {} {} packs under {}",
            self.packs.len(),
            self.script_type,
            self.directory.display()
        );
        self.state = ManagerState::Discovered;
    }

    /// Add or replace the pack rooted at `dir`
    ///
    /// Every file with the engine's extension under `dir` is included,
    /// recursively. The pack is named after the directory.
    pub fn discover_pack(&mut self, dir: &Path) {
        let namespace = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.script_type.directory_name().to_string());

        let config = self.pack_config.get(&namespace).cloned().unwrap_or_default();
        if !config.enabled {
            self.console
                .info(&format!("Skipping disabled pack {}", namespace));
            self.packs.retain(|pack| pack.namespace() != namespace);
            return;
        }

        let mut info = PackInfo::new(namespace.clone());
        if let Some(description) = config.description {
            info = info.with_description(description);
        }
        let mut pack = ScriptPack::new(info, dir);

        for path in find_script_files(dir, self.engine.file_extension()) {
            match ScriptFileInfo::preload(dir, &path) {
                Ok(Some(file)) => pack.push(ScriptUnit::new(file)),
                Ok(None) => {
                    self.console
                        .info(&format!("Skipping ignored script {}", path.display()));
                }
                Err(e) => {
                    self.console
                        .warn(&format!("Failed to pre-load script file {}: {}", path.display(), e));
                }
            }
        }

        match self.packs.iter_mut().find(|existing| existing.namespace() == namespace) {
            Some(existing) => *existing = pack,
            None => self.packs.push(pack),
        }
    }

    /// Create the root directory with an example script if it is missing
    fn seed_directory(&self) {
        if self.directory.exists() {
            return;
        }

        if let Err(e) = fs::create_dir_all(&self.directory) {
            warn!(
                target: "scripting",
                "Failed to create {} script directory {}: {}",
                self.script_type,
                self.directory.display(),
                e
            );
            return;
        }

        let example = self
            .directory
            .join(format!("script.{}", self.engine.file_extension()));
        match fs::write(&example, self.script_type.example_script()) {
            Ok(()) => debug!(target: "scripting", "Seeded example script {}", example.display()),
            Err(e) => warn!(
                target: "scripting",
                "Failed to write example script {}: {}",
                example.display(),
                e
            ),
        }
    }

    /// Rebuild bindings, then preprocess and run every discovered unit
    pub fn load(&mut self) {
        self.errors.clear();
        self.drop_script_handlers();
        self.registry = self.collect_bindings();
        let namespace = self.registry.namespace();

        self.preprocess_all();

        let started = Instant::now();
        let mut summary = LoadSummary::default();

        for pack in &mut self.packs {
            drop(pack.take_context());
            for unit in pack.units_mut() {
                unit.reset();
            }

            let spec = ContextSpec {
                pack: pack.namespace(),
                namespace: &namespace,
                restrictions: &self.restrictions,
            };
            let mut context = match self.engine.create_context(&spec) {
                Ok(context) => context,
                Err(err) => {
                    self.console.error(&format!(
                        "Failed to create context for pack {}: {:?}",
                        pack.namespace(),
                        err
                    ));
                    for unit in pack.units_mut() {
                        summary.total += 1;
                        unit.fail(UnitError::from(err.clone()));
                        report_failure(self.script_type, self.console.as_ref(), &mut self.errors, unit);
                    }
                    continue;
                }
            };

            for unit in pack.units_mut() {
                summary.total += 1;
                *self
                    .current_unit
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(unit.location().to_string());

                if unit.compile_and_run(context.as_mut()) {
                    summary.loaded += 1;
                    if let UnitState::Loaded { elapsed } = unit.state() {
                        self.console.info(&format!(
                            "Loaded script {} in {:.3} s",
                            unit.location(),
                            elapsed.as_secs_f64()
                        ));
                    }
                } else {
                    report_failure(self.script_type, self.console.as_ref(), &mut self.errors, unit);
                }
            }

            pack.set_context(context);
        }

        *self
            .current_unit
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;

        let message = format!(
            "Loaded {}/{} {} scripts in {:.3} s",
            summary.loaded,
            summary.total,
            self.script_type,
            started.elapsed().as_secs_f64()
        );
        if summary.loaded == summary.total {
            self.console.info(&message);
        } else {
            self.console.error(&message);
        }

        self.summary = summary;
        self.state = ManagerState::Loaded;

        self.events.post(LOADED_EVENT, &ScriptValue::Unit);
        self.host.notify_scripts_loaded();
    }

    /// Drop every event handler and pack
    pub fn unload(&mut self) {
        self.events.clear();
        self.script_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.packs.clear();
        self.state = ManagerState::Unloaded;
    }

    /// Unload, rediscover, and load again
    pub fn reload(&mut self) {
        self.unload();
        self.discover();
        self.load();
    }

    /// Remove the handlers scripts registered during the previous load pass
    ///
    /// Handlers added through [`events`](Self::events) by the host stay.
    fn drop_script_handlers(&self) {
        let ids = std::mem::take(
            &mut *self
                .script_handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let removed = self.events.remove(ids);
        if removed > 0 {
            debug!(target: "scripting", "Dropped {} {} script event handlers", removed, self.script_type);
        }
    }

    fn collect_bindings(&self) -> BindingRegistry {
        let mut registry = BindingRegistry::default();
        let mut event = BindingsEvent::new(
            self.script_type,
            &mut registry.bindings,
            &mut registry.constants,
        );

        self.host.post_bindings(&mut event);
        bindings::register_defaults(
            &mut event,
            &DefaultBindingSources {
                console: self.console.clone(),
                current_unit: self.current_unit.clone(),
                events: self.events.clone(),
                script_handlers: self.script_handlers.clone(),
            },
        );

        registry
    }

    /// Preprocess every unit of every pack, returning once all are done
    fn preprocess_all(&self) {
        let units: Vec<&ScriptUnit> = self.packs.iter().flat_map(ScriptPack::units).collect();
        if units.is_empty() {
            return;
        }

        let started = Instant::now();
        let preprocessor = self.preprocessor.as_ref();
        let run = || {
            units.par_iter().for_each(|unit| {
                let _ = unit.preprocess(preprocessor);
            });
        };

        match self.preprocess_threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(run),
                Err(e) => {
                    warn!(target: "scripting", "Failed to build preprocessing pool: {}", e);
                    run();
                }
            },
            None => run(),
        }

        debug!(
            target: "scripting",
            "Preprocessed {} {} scripts in {:?}",
            units.len(),
            self.script_type,
            started.elapsed()
        );
    }
}

fn report_failure(
    script_type: ScriptType,
    console: &dyn ScriptConsole,
    errors: &mut Vec<String>,
    unit: &ScriptUnit,
) {
    let Some(error) = unit.error() else {
        return;
    };

    let entry = format!("{}: {}", unit.location(), error);
    console.error(&format!("Error loading {} script {}", script_type, entry));
    if !error.is_script_level() {
        console.error(&format!("{:#?}", error));
    }
    errors.push(entry);
}

impl Drop for ScriptManager {
    fn drop(&mut self) {
        // Script callbacks hold their engine, which holds this bus
        self.events.clear();
    }
}

impl std::fmt::Debug for ScriptManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptManager")
            .field("script_type", &self.script_type)
            .field("directory", &self.directory)
            .field("engine", &self.engine.name())
            .field("packs", &self.packs)
            .field("errors", &self.errors)
            .field("state", &self.state)
            .finish()
    }
}
