use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{AST, Dynamic, Engine, EvalAltResult, FnPtr, NativeCallContext, Position, Scope};
use tracing::debug;

use super::{ContextSpec, ExecutionContext, ScriptEngine};
use crate::error::ScriptError;
use crate::value::{HostFunction, ScriptValue};

/// Variadic host functions are registered once per arity up to this many arguments
const MAX_VARIADIC_ARGS: usize = 4;

/// Restricted names that are Rhai keywords and handled by `disable_symbol` alone
const KEYWORDS: &[&str] = &["print", "debug", "eval", "import", "export"];

/// Resource limits applied to every context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Operation budget per script run, 0 for unlimited
    pub max_operations: u64,
    /// Maximum function call nesting
    pub max_call_levels: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
        }
    }
}

/// Engine backed by the Rhai interpreter
///
/// Every pack gets its own `rhai::Engine` so restrictions and registered host
/// functions never leak between packs.
#[derive(Debug, Clone, Default)]
pub struct RhaiEngine {
    limits: EngineLimits,
}

impl RhaiEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: EngineLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }
}

impl ScriptEngine for RhaiEngine {
    fn name(&self) -> &'static str {
        "rhai"
    }

    fn file_extension(&self) -> &'static str {
        "rhai"
    }

    fn create_context(
        &self,
        spec: &ContextSpec<'_>,
    ) -> Result<Box<dyn ExecutionContext>, ScriptError> {
        let binder = CallbackBinder::default();
        let mut engine = Engine::new();

        if self.limits.max_operations > 0 {
            engine.set_max_operations(self.limits.max_operations);
        }
        engine.set_max_call_levels(self.limits.max_call_levels);

        for name in spec.restrictions.iter() {
            engine.disable_symbol(name);
        }
        if spec.restrictions.contains("print") {
            engine.on_print(|_| {});
        }
        if spec.restrictions.contains("debug") {
            engine.on_debug(|_, _, _| {});
        }
        if spec.restrictions.contains("import") {
            engine.set_module_resolver(DummyModuleResolver::new());
        }

        let mut scope = Scope::new();
        let mut functions = BTreeMap::new();
        for (name, global) in spec.namespace {
            if spec.restrictions.contains(name) {
                debug!(target: "scripting", "Skipping restricted binding '{}' for pack {}", name, spec.pack);
                continue;
            }
            match &global.value {
                ScriptValue::Function(function) => {
                    register_host_function(&mut engine, name, function, &binder);
                    functions.insert(name.clone(), function.clone());
                }
                value if global.constant => {
                    scope.push_constant_dynamic(name.clone(), to_dynamic(value));
                }
                value => {
                    scope.push_dynamic(name.clone(), to_dynamic(value));
                }
            }
        }

        // Identifiers like `exit` are not keywords, so shadow any built-in with a failing stub
        for name in spec.restrictions.iter() {
            if !KEYWORDS.contains(&name) && !functions.contains_key(name) {
                register_restricted_stub(&mut engine, name);
            }
        }

        let engine = Arc::new(engine);
        // Only set here, so the slot cannot already be filled
        let _ = binder.engine.set(Arc::downgrade(&engine));

        debug!(
            target: "scripting",
            "Created rhai context for pack {} with {} variables and {} functions",
            spec.pack,
            scope.len(),
            functions.len()
        );

        Ok(Box::new(RhaiContext {
            engine,
            scope,
            functions,
            shared: AST::empty(),
            binder,
        }))
    }
}

/// Lets function values created by scripts be called after the script returns
#[derive(Clone, Default)]
struct CallbackBinder {
    engine: Arc<OnceLock<Weak<Engine>>>,
    ast: Arc<Mutex<Option<AST>>>,
}

impl CallbackBinder {
    fn bind(&self, fn_ptr: FnPtr) -> ScriptValue {
        let engine = self.engine.get().and_then(Weak::upgrade);
        let ast = self
            .ast
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let name = fn_ptr.fn_name().to_string();

        let (Some(engine), Some(ast)) = (engine, ast) else {
            return ScriptValue::Function(HostFunction::variadic(name, |_| {
                Err(ScriptError::host("script callback outlived its context"))
            }));
        };

        let binder = self.clone();
        ScriptValue::Function(HostFunction::variadic(name, move |args| {
            let args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();
            let result: Result<Dynamic, Box<EvalAltResult>> = match args.as_slice() {
                [] => fn_ptr.call(&engine, &ast, ()),
                [a] => fn_ptr.call(&engine, &ast, (a.clone(),)),
                [a, b] => fn_ptr.call(&engine, &ast, (a.clone(), b.clone())),
                [a, b, c] => fn_ptr.call(&engine, &ast, (a.clone(), b.clone(), c.clone())),
                _ => {
                    return Err(ScriptError::host(format!(
                        "script callbacks take at most 3 arguments, got {}",
                        args.len()
                    )));
                }
            };
            result
                .map(|value| from_dynamic(value, &binder))
                .map_err(|err| convert_eval_error(&err))
        }))
    }
}

/// One pack's Rhai state
struct RhaiContext {
    engine: Arc<Engine>,
    scope: Scope<'static>,
    functions: BTreeMap<String, HostFunction>,
    /// Script-defined functions accumulated from earlier units in the pack
    shared: AST,
    binder: CallbackBinder,
}

impl ExecutionContext for RhaiContext {
    fn has_global(&self, name: &str) -> bool {
        self.scope.contains(name)
            || self.functions.contains_key(name)
            || self.shared.iter_functions().any(|f| f.name == name)
    }

    fn global(&self, name: &str) -> Option<ScriptValue> {
        if let Some(value) = self.scope.get_value::<Dynamic>(name) {
            return Some(from_dynamic(value, &self.binder));
        }
        self.functions
            .get(name)
            .map(|function| ScriptValue::Function(function.clone()))
    }

    fn global_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scope
            .iter_raw()
            .map(|(name, _, _)| name.to_string())
            .chain(self.functions.keys().cloned())
            .chain(self.shared.iter_functions().map(|f| f.name.to_string()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn compile_and_run(&mut self, location: &str, source: &str) -> Result<(), ScriptError> {
        let mut ast = self
            .engine
            .compile(source)
            .map_err(|err| ScriptError::compile(err.0.to_string(), err.1.line()))?;
        ast.set_source(location);

        let runnable = self.shared.merge(&ast);
        *self
            .binder
            .ast
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(runnable.clone());

        self.engine
            .run_ast_with_scope(&mut self.scope, &runnable)
            .map_err(|err| convert_eval_error(&err))?;

        self.shared.combine(ast.clone_functions_only());
        Ok(())
    }
}

fn register_host_function(
    engine: &mut Engine,
    name: &str,
    function: &HostFunction,
    binder: &CallbackBinder,
) {
    let arities: Vec<usize> = match function.arity() {
        Some(arity) => vec![arity],
        None => (0..=MAX_VARIADIC_ARGS).collect(),
    };

    for arity in arities {
        let function = function.clone();
        let binder = binder.clone();
        engine.register_raw_fn(
            name.to_string(),
            vec![TypeId::of::<Dynamic>(); arity],
            move |_ctx: NativeCallContext, args: &mut [&mut Dynamic]| -> Result<Dynamic, Box<EvalAltResult>> {
                let args: Vec<ScriptValue> = args
                    .iter_mut()
                    .map(|arg| from_dynamic(std::mem::take(&mut **arg), &binder))
                    .collect();
                match function.call(&args) {
                    Ok(value) => Ok(to_dynamic(&value)),
                    Err(err) if err.is_script_level() => Err(Box::new(EvalAltResult::ErrorRuntime(
                        Dynamic::from(err.to_string()),
                        Position::NONE,
                    ))),
                    Err(err) => Err(Box::new(EvalAltResult::ErrorSystem(
                        function.name().to_string(),
                        Box::new(err),
                    ))),
                }
            },
        );
    }
}

fn register_restricted_stub(engine: &mut Engine, name: &str) {
    for arity in 0..=MAX_VARIADIC_ARGS {
        let message = format!("'{}' is not available to scripts", name);
        engine.register_raw_fn(
            name.to_string(),
            vec![TypeId::of::<Dynamic>(); arity],
            move |_ctx: NativeCallContext, _args: &mut [&mut Dynamic]| -> Result<Dynamic, Box<EvalAltResult>> {
                Err(Box::new(EvalAltResult::ErrorRuntime(
                    Dynamic::from(message.clone()),
                    Position::NONE,
                )))
            },
        );
    }
}

fn to_dynamic(value: &ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Unit => Dynamic::UNIT,
        ScriptValue::Bool(b) => Dynamic::from_bool(*b),
        ScriptValue::Int(i) => Dynamic::from_int(*i),
        ScriptValue::Float(f) => Dynamic::from_float(*f),
        ScriptValue::String(s) => Dynamic::from(s.clone()),
        ScriptValue::Array(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        ScriptValue::Map(map) => Dynamic::from_map(
            map.iter()
                .map(|(key, value)| (key.as_str().into(), to_dynamic(value)))
                .collect(),
        ),
        ScriptValue::Function(function) => Dynamic::from(function.clone()),
    }
}

fn from_dynamic(value: Dynamic, binder: &CallbackBinder) -> ScriptValue {
    let value = value.flatten();
    if value.is_unit() {
        return ScriptValue::Unit;
    }
    if let Ok(b) = value.as_bool() {
        return ScriptValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return ScriptValue::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return ScriptValue::Float(f);
    }
    if value.is_string() {
        return ScriptValue::String(value.to_string());
    }
    if value.is_array() {
        let items = value.cast::<rhai::Array>();
        return ScriptValue::Array(items.into_iter().map(|item| from_dynamic(item, binder)).collect());
    }
    if value.is_map() {
        let map = value.cast::<rhai::Map>();
        return ScriptValue::Map(
            map.into_iter()
                .map(|(key, value)| (key.to_string(), from_dynamic(value, binder)))
                .collect(),
        );
    }
    if value.is_fnptr() {
        return binder.bind(value.cast::<FnPtr>());
    }
    if value.is::<HostFunction>() {
        return ScriptValue::Function(value.cast::<HostFunction>());
    }
    ScriptValue::String(value.to_string())
}

/// Innermost error, skipping the wrappers added for each function call frame
fn innermost(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => innermost(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => innermost(inner),
        _ => err,
    }
}

fn convert_eval_error(err: &EvalAltResult) -> ScriptError {
    let inner = innermost(err);

    if let EvalAltResult::ErrorSystem(name, source) = inner {
        return ScriptError::host(format!("{}: {}", name, source));
    }

    let position = if inner.position().is_none() {
        err.position()
    } else {
        inner.position()
    };
    let mut message = inner.to_string();
    let suffix = format!(" ({})", inner.position());
    if !inner.position().is_none() && message.ends_with(&suffix) {
        message.truncate(message.len() - suffix.len());
    }

    ScriptError::runtime(message, position.line())
}
