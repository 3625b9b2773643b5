use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rigging_events::{EventBus, HandlerId};

use crate::console::ScriptConsole;
use crate::error::ScriptError;
use crate::script_type::ScriptType;
use crate::value::{HostFunction, ScriptValue};

/// Name to value table installed into execution contexts
pub type Bindings = BTreeMap<String, ScriptValue>;

pub const SECOND: i64 = 1000;
pub const MINUTE: i64 = 60 * SECOND;
pub const HOUR: i64 = 60 * MINUTE;

/// One entry of the merged namespace handed to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub value: ScriptValue,
    /// Constants cannot be reassigned by scripts
    pub constant: bool,
}

/// Bindings and constants collected for one load pass
#[derive(Debug, Clone, Default)]
pub struct BindingRegistry {
    pub bindings: Bindings,
    pub constants: Bindings,
}

impl BindingRegistry {
    /// Merge constants and bindings into one namespace
    ///
    /// A name present in both resolves to the binding.
    pub fn namespace(&self) -> BTreeMap<String, Global> {
        let mut namespace = BTreeMap::new();
        for (name, value) in &self.constants {
            namespace.insert(
                name.clone(),
                Global {
                    value: value.clone(),
                    constant: true,
                },
            );
        }
        for (name, value) in &self.bindings {
            namespace.insert(
                name.clone(),
                Global {
                    value: value.clone(),
                    constant: false,
                },
            );
        }
        namespace
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.constants.is_empty()
    }
}

/// Handed to every binding registrar while a manager rebuilds its namespace
///
/// Writing a name that already exists replaces it.
pub struct BindingsEvent<'a> {
    script_type: ScriptType,
    bindings: &'a mut Bindings,
    constants: &'a mut Bindings,
}

impl<'a> BindingsEvent<'a> {
    pub fn new(
        script_type: ScriptType,
        bindings: &'a mut Bindings,
        constants: &'a mut Bindings,
    ) -> Self {
        Self {
            script_type,
            bindings,
            constants,
        }
    }

    /// Type of the manager being populated
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    pub fn add_binding(&mut self, name: impl Into<String>, value: impl Into<ScriptValue>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn add_constant(&mut self, name: impl Into<String>, value: impl Into<ScriptValue>) {
        self.constants.insert(name.into(), value.into());
    }

    /// Bind a function under its own name
    pub fn add_function(&mut self, function: HostFunction) {
        self.bindings
            .insert(function.name().to_string(), ScriptValue::Function(function));
    }

    pub fn bindings(&self) -> &Bindings {
        self.bindings
    }

    pub fn constants(&self) -> &Bindings {
        self.constants
    }
}

/// Shared state the default bindings close over
pub(crate) struct DefaultBindingSources {
    pub console: Arc<dyn ScriptConsole>,
    pub current_unit: Arc<RwLock<Option<String>>>,
    pub events: Arc<EventBus<ScriptValue>>,
    /// Handlers registered through `onEvent` since the last load pass
    pub script_handlers: Arc<Mutex<Vec<HandlerId>>>,
}

fn annotate(current_unit: &RwLock<Option<String>>, message: &str) -> String {
    match current_unit
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_deref()
    {
        Some(location) => format!("{}: {}", location, message),
        None => message.to_string(),
    }
}

fn event_name(function: &str, value: &ScriptValue) -> Result<String, ScriptError> {
    match value {
        ScriptValue::String(name) => Ok(name.clone()),
        other => Err(ScriptError::runtime(
            format!(
                "{} expects an event name string, got {}",
                function,
                other.type_name()
            ),
            None,
        )),
    }
}

/// Install the namespace entries every manager provides
pub(crate) fn register_defaults(event: &mut BindingsEvent<'_>, sources: &DefaultBindingSources) {
    let script_type = event.script_type();
    event.add_constant("SCRIPT_TYPE", script_type.name());
    event.add_constant("SECOND", SECOND);
    event.add_constant("MINUTE", MINUTE);
    event.add_constant("HOUR", HOUR);

    let console = sources.console.clone();
    let current_unit = sources.current_unit.clone();
    event.add_function(HostFunction::new("log", 1, move |args| {
        console.info(&annotate(&current_unit, &args[0].to_string()));
        Ok(ScriptValue::Unit)
    }));

    let console = sources.console.clone();
    let current_unit = sources.current_unit.clone();
    event.add_function(HostFunction::new("logError", 1, move |args| {
        console.error(&annotate(&current_unit, &args[0].to_string()));
        Ok(ScriptValue::Unit)
    }));

    let console = sources.console.clone();
    let events = sources.events.clone();
    let script_handlers = sources.script_handlers.clone();
    event.add_function(HostFunction::new("onEvent", 2, move |args| {
        let name = event_name("onEvent", &args[0])?;
        let callback = match &args[1] {
            ScriptValue::Function(callback) => callback.clone(),
            other => {
                return Err(ScriptError::runtime(
                    format!("onEvent expects a function, got {}", other.type_name()),
                    None,
                ));
            }
        };

        let console = console.clone();
        let handler_name = name.clone();
        let id = events.listen(name, move |payload: &ScriptValue| {
            if let Err(err) = callback.call(std::slice::from_ref(payload)) {
                console.error(&format!(
                    "Error in '{}' event handler: {}",
                    handler_name, err
                ));
            }
        });
        script_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        Ok(ScriptValue::Unit)
    }));

    let events = sources.events.clone();
    event.add_function(HostFunction::new("postEvent", 2, move |args| {
        let name = event_name("postEvent", &args[0])?;
        let handled = events.post(&name, &args[1]);
        Ok(ScriptValue::Int(handled as i64))
    }));
}
