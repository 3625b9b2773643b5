use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rigging_events::EventBus;
use tracing::debug;

use crate::bindings::BindingsEvent;

/// Callback that contributes bindings to every manager's namespace
pub type BindingRegistrar = dyn Fn(&mut BindingsEvent<'_>) + Send + Sync;

/// Name of the host-wide notification posted after a manager finishes loading
pub const SCRIPTS_LOADED: &str = "scripts_loaded";

/// State shared by every manager in a process
///
/// Hosts register binding registrars here once; each manager invokes all of
/// them whenever it rebuilds its namespace. There is no process-global
/// instance, callers pass an `Arc<ScriptHost>` to each manager.
#[derive(Default)]
pub struct ScriptHost {
    registrars: RwLock<Vec<Arc<BindingRegistrar>>>,
    lifecycle: EventBus<()>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked every time any manager collects bindings
    pub fn on_bindings<F>(&self, registrar: F)
    where
        F: Fn(&mut BindingsEvent<'_>) + Send + Sync + 'static,
    {
        self.registrars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(registrar));
    }

    /// Run every registrar, in registration order
    pub fn post_bindings(&self, event: &mut BindingsEvent<'_>) {
        let registrars: Vec<Arc<BindingRegistrar>> = self
            .registrars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        debug!(
            target: "scripting",
            "Collecting bindings for {} scripts from {} registrars",
            event.script_type(),
            registrars.len()
        );
        for registrar in &registrars {
            registrar(event);
        }
    }

    /// Number of registered binding registrars
    pub fn registrar_count(&self) -> usize {
        self.registrars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Be told each time any manager finishes a load pass
    pub fn on_scripts_loaded<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lifecycle.listen(SCRIPTS_LOADED, move |_: &()| handler());
    }

    pub(crate) fn notify_scripts_loaded(&self) -> usize {
        self.lifecycle.post(SCRIPTS_LOADED, &())
    }
}

impl fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHost")
            .field("registrars", &self.registrar_count())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
