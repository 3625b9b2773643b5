//! End-to-end tests for discovery and the two-phase load pipeline
//!
//! Every test runs real scripts through the bundled Rhai engine against a
//! temporary directory tree.

use rigging_scripting_host::config::PackConfig;
use rigging_scripting_host::{
    BufferedConsole, CapabilityRestrictions, ConsoleLevel, ContextSpec, ExecutionContext,
    HostFunction, ManagerState, ScriptEngine, ScriptError, ScriptHost, ScriptManager, ScriptType,
    ScriptValue, UnitState,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, source: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, source).unwrap();
}

fn manager(root: &Path, host: Arc<ScriptHost>) -> (ScriptManager, Arc<BufferedConsole>) {
    let console = Arc::new(BufferedConsole::new());
    let manager = ScriptManager::new(ScriptType::Server, root, host).with_console(console.clone());
    (manager, console)
}

/// Host that exposes `record(value)` and collects every recorded value
fn recording_host() -> (Arc<ScriptHost>, Arc<Mutex<Vec<String>>>) {
    let host = Arc::new(ScriptHost::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    host.on_bindings(move |event| {
        let sink = sink.clone();
        event.add_function(HostFunction::new("record", 1, move |args| {
            sink.lock().unwrap().push(args[0].to_string());
            Ok(ScriptValue::Unit)
        }));
    });
    (host, seen)
}

fn summary_lines(console: &BufferedConsole) -> Vec<String> {
    console
        .lines()
        .into_iter()
        .map(|(_, line)| line)
        .filter(|line| line.starts_with("Loaded ") && line.contains(" server scripts in "))
        .collect()
}

#[test]
fn test_one_failing_file_does_not_stop_the_other() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "record(\"a\");");
    write(&root, "b.rhai", "let helpers = require(\"x\");\nrecord(\"b\");");

    let (host, seen) = recording_host();
    let (mut manager, console) = manager(&root, host);
    manager.discover();
    manager.load();

    assert_eq!(*seen.lock().unwrap(), vec!["a"]);
    assert_eq!(manager.errors().len(), 1);
    assert!(manager.errors()[0].starts_with("b.rhai: "));
    assert!(manager.errors()[0].contains("'require' is not supported"));

    let pack = manager.pack("server_scripts").unwrap();
    assert!(matches!(pack.unit("a.rhai").unwrap().state(), UnitState::Loaded { .. }));
    assert_eq!(pack.unit("b.rhai").unwrap().state(), UnitState::Failed);

    let summaries = summary_lines(&console);
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].starts_with("Loaded 1/2 server scripts"));
    assert!(console
        .lines_at(ConsoleLevel::Error)
        .iter()
        .any(|line| line.starts_with("Loaded 1/2")));
    assert_eq!(manager.summary().failed(), 1);
}

#[test]
fn test_every_unit_either_loads_or_has_an_error() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "good.rhai", "let a = 1;");
    write(&root, "nested/also_good.rhai", "let b = 2;");
    write(&root, "syntax.rhai", "let = ;");
    write(&root, "runtime.rhai", "undefined_function();");
    write(&root, "import.rhai", "import \"other\" as other;");

    let (mut manager, _console) = manager(&root, Arc::new(ScriptHost::new()));
    manager.discover();
    manager.load();

    let pack = manager.pack("server_scripts").unwrap();
    assert_eq!(pack.len(), 5);

    let mut failed = 0;
    for unit in pack.units() {
        let loaded = matches!(unit.state(), UnitState::Loaded { .. });
        assert_ne!(loaded, unit.error().is_some(), "{}", unit.location());
        if !loaded {
            failed += 1;
        }
    }
    assert_eq!(failed, 3);
    assert_eq!(manager.errors().len(), failed);
    assert!(manager
        .errors()
        .iter()
        .any(|e| e.starts_with("import.rhai: ") && e.contains("'import' is not supported")));
}

#[test]
fn test_preprocess_failure_is_never_run() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "record(\"a\");\nrequire(\"b\");");
    write(&root, "b.rhai", "record(\"b\");");

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    manager.discover();
    manager.load();

    assert_eq!(*seen.lock().unwrap(), vec!["b"]);
    assert_eq!(manager.errors().len(), 1);
    assert!(manager.errors()[0].starts_with("a.rhai: "));
    assert_eq!(manager.summary().loaded, 1);
    assert_eq!(manager.summary().total, 2);
}

#[test]
fn test_packs_do_not_share_state() {
    let temp = TempDir::new().unwrap();
    let core = temp.path().join("core");
    let addon = temp.path().join("addon");
    write(&core, "main.rhai", "let X = 10;");
    write(&addon, "main.rhai", "let seen_x = false;");

    let (host, _seen) = recording_host();
    let (mut manager, _console) = manager(&temp.path().join("server_scripts"), host);
    manager.discover_pack(&core);
    manager.discover_pack(&addon);
    manager.load();

    assert!(manager.errors().is_empty(), "{:?}", manager.errors());
    let core_ctx = manager.pack("core").unwrap().context().unwrap();
    let addon_ctx = manager.pack("addon").unwrap().context().unwrap();

    assert_eq!(core_ctx.global("X"), Some(ScriptValue::Int(10)));
    assert!(!addon_ctx.has_global("X"));
    assert!(addon_ctx.has_global("record"));
    assert!(addon_ctx.has_global("SCRIPT_TYPE"));
}

#[test]
fn test_later_units_see_earlier_state() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "setup.rhai", "// priority: 10\nvar registry = [];\nfn add_entry(list, item) { list.push(item); list }");
    write(&root, "use.rhai", "registry = add_entry(registry, \"item\");\nrecord(registry.len());");

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    manager.discover();
    manager.load();

    assert!(manager.errors().is_empty(), "{:?}", manager.errors());
    assert_eq!(*seen.lock().unwrap(), vec!["1"]);
}

#[test]
fn test_load_order_is_deterministic() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "b.rhai", "record(\"b\");");
    write(&root, "a.rhai", "record(\"a\");");
    write(&root, "sub/c.rhai", "record(\"sub/c\");");
    write(&root, "z.rhai", "// priority: 5\nrecord(\"z\");");
    write(&root, "skip.rhai", "// ignored: true\nrecord(\"skip\");");

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    manager.discover();

    manager.load();
    let first: Vec<String> = seen.lock().unwrap().drain(..).collect();
    manager.load();
    let second: Vec<String> = seen.lock().unwrap().drain(..).collect();

    assert_eq!(first, vec!["z", "a", "b", "sub/c"]);
    assert_eq!(first, second);
}

#[test]
fn test_unload_then_load_processes_nothing() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "let a = 1;");

    let (mut manager, console) = manager(&root, Arc::new(ScriptHost::new()));
    manager.discover();
    manager.load();
    assert_eq!(manager.summary().total, 1);

    manager.unload();
    assert_eq!(manager.state(), ManagerState::Unloaded);
    console.clear();
    manager.load();

    assert!(manager.packs().is_empty());
    assert_eq!(manager.summary().total, 0);
    assert!(summary_lines(&console)[0].starts_with("Loaded 0/0 server scripts"));
}

#[test]
fn test_restricted_names_are_absent() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "let a = 1;");

    let host = Arc::new(ScriptHost::new());
    host.on_bindings(|event| {
        event.add_function(HostFunction::variadic("exit", |_| Ok(ScriptValue::Unit)));
        event.add_binding("quit", "bye");
    });

    let (mut manager, _console) = manager(&root, host);
    manager.discover();
    manager.load();

    assert!(manager.bindings().contains_key("exit"));
    let ctx = manager.packs()[0].context().unwrap();
    for name in CapabilityRestrictions::STANDARD {
        assert!(!ctx.has_global(name), "{} leaked into the namespace", name);
    }
}

#[test]
fn test_bindings_are_rebuilt_every_load() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "let a = 1;");

    let host = Arc::new(ScriptHost::new());
    let generation = Arc::new(AtomicUsize::new(0));
    let counter = generation.clone();
    host.on_bindings(move |event| {
        let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
        event.add_constant("GENERATION", generation as i64);
        if generation == 1 {
            event.add_binding("only_first", true);
        }
    });

    let (mut manager, _console) = manager(&root, host);
    manager.discover();

    manager.load();
    assert_eq!(manager.constants()["GENERATION"], ScriptValue::Int(1));
    assert!(manager.packs()[0].context().unwrap().has_global("only_first"));

    manager.load();
    assert_eq!(manager.constants()["GENERATION"], ScriptValue::Int(2));
    assert!(!manager.bindings().contains_key("only_first"));
    let ctx = manager.packs()[0].context().unwrap();
    assert!(!ctx.has_global("only_first"));
    assert_eq!(ctx.global("GENERATION"), Some(ScriptValue::Int(2)));
}

#[test]
fn test_managers_do_not_share_namespaces() {
    let temp = TempDir::new().unwrap();
    let server_root = temp.path().join("server_scripts");
    let client_root = temp.path().join("client_scripts");
    write(&server_root, "a.rhai", "let from_server = SCRIPT_TYPE;");
    write(&client_root, "a.rhai", "let from_client = SCRIPT_TYPE;");

    let host = Arc::new(ScriptHost::new());
    host.on_bindings(|event| {
        if event.script_type() == ScriptType::Server {
            event.add_binding("server_only", 1);
        }
    });

    let mut server = ScriptManager::new(ScriptType::Server, &server_root, host.clone())
        .with_console(Arc::new(BufferedConsole::new()));
    let mut client = ScriptManager::new(ScriptType::Client, &client_root, host)
        .with_console(Arc::new(BufferedConsole::new()));
    server.discover();
    client.discover();
    server.load();
    client.load();

    let server_ctx = server.packs()[0].context().unwrap();
    let client_ctx = client.packs()[0].context().unwrap();
    assert_eq!(server_ctx.global("from_server"), Some(ScriptValue::from("server")));
    assert_eq!(client_ctx.global("from_client"), Some(ScriptValue::from("client")));
    assert!(server_ctx.has_global("server_only"));
    assert!(!client_ctx.has_global("server_only"));
    assert!(!client_ctx.has_global("from_server"));
}

#[test]
fn test_missing_root_is_seeded_with_a_working_example() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("startup_scripts");

    let console = Arc::new(BufferedConsole::new());
    let mut manager = ScriptManager::new(ScriptType::Startup, &root, Arc::new(ScriptHost::new()))
        .with_console(console.clone());
    manager.discover();
    assert!(root.join("script.rhai").exists());

    manager.load();
    assert!(manager.errors().is_empty(), "{:?}", manager.errors());

    let info = console.lines_at(ConsoleLevel::Info);
    assert!(info.contains(&"script.rhai: Hello from startup scripts!".to_string()));
    assert!(info.contains(&"All startup scripts have been loaded".to_string()));
}

#[test]
fn test_script_handlers_receive_host_events() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(
        &root,
        "handlers.rhai",
        "onEvent(\"player_joined\", (name) => { record(`welcome ${name}`); });\nonEvent(\"loaded\", (e) => record(\"loaded\"));",
    );

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    manager.discover();
    manager.load();

    assert_eq!(manager.post_event("player_joined", &"ada".into()), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["loaded", "welcome ada"]);

    manager.unload();
    assert_eq!(manager.post_event("player_joined", &"bob".into()), 0);
}

#[test]
fn test_scripts_loaded_is_broadcast_per_load() {
    let temp = TempDir::new().unwrap();
    let host = Arc::new(ScriptHost::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    host.on_scripts_loaded(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (mut manager, _console) = manager(&temp.path().join("server_scripts"), host);
    manager.discover();
    manager.load();
    manager.load();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_log_is_annotated_with_unit_location() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "nested/talk.rhai", "log(\"hi\");\nlogError(\"careful\");");

    let (mut manager, console) = manager(&root, Arc::new(ScriptHost::new()));
    manager.discover();
    manager.load();

    assert!(console
        .lines_at(ConsoleLevel::Info)
        .contains(&"nested/talk.rhai: hi".to_string()));
    assert!(console
        .lines_at(ConsoleLevel::Error)
        .contains(&"nested/talk.rhai: careful".to_string()));
    assert_eq!(manager.current_unit(), None);
}

#[test]
fn test_preload_failures_are_dropped_with_warning() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "fine.rhai", "let a = 1;");
    write(&root, "bad.rhai", "// priority: first\nlet b = 2;");
    fs::write(root.join("binary.rhai"), [0xff_u8, 0xfe, 0xfd]).unwrap();

    let (mut manager, console) = manager(&root, Arc::new(ScriptHost::new()));
    manager.discover();

    let pack = &manager.packs()[0];
    assert_eq!(pack.len(), 1);
    assert_eq!(pack.units()[0].location(), "fine.rhai");
    assert_eq!(console.lines_at(ConsoleLevel::Warn).len(), 2);
}

#[test]
fn test_rediscovery_replaces_pack() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "let a = 1;");

    let (mut manager, _console) = manager(&root, Arc::new(ScriptHost::new()));
    manager.discover();
    write(&root, "b.rhai", "let b = 1;");
    manager.discover();

    assert_eq!(manager.packs().len(), 1);
    assert_eq!(manager.packs()[0].len(), 2);
}

#[test]
fn test_reload_picks_up_new_files() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "record(\"a\");");

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    manager.discover();
    manager.load();

    write(&root, "b.rhai", "record(\"b\");");
    manager.reload();

    assert_eq!(*seen.lock().unwrap(), vec!["a", "a", "b"]);
    assert_eq!(manager.state(), ManagerState::Loaded);
}

#[test]
fn test_disabled_and_extra_packs() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    let shared = temp.path().join("shared");
    let disabled = temp.path().join("disabled");
    write(&root, "a.rhai", "record(\"root\");");
    write(&shared, "lib.rhai", "record(\"shared\");");
    write(&disabled, "lib.rhai", "record(\"disabled\");");

    let (host, seen) = recording_host();
    let (manager, _console) = manager(&root, host);
    let mut manager = manager
        .with_extra_pack_dir(&shared)
        .with_extra_pack_dir(&disabled)
        .with_pack_config(
            "disabled",
            PackConfig {
                enabled: false,
                description: None,
            },
        )
        .with_pack_config(
            "shared",
            PackConfig {
                enabled: true,
                description: Some("Shared library".to_string()),
            },
        );
    manager.discover();
    manager.load();

    let namespaces: Vec<&str> = manager.packs().iter().map(|p| p.namespace()).collect();
    assert_eq!(namespaces, vec!["server_scripts", "shared"]);
    assert_eq!(manager.pack("shared").unwrap().info().description, "Shared library");
    assert_eq!(*seen.lock().unwrap(), vec!["root", "shared"]);
}

struct BrokenEngine;

impl ScriptEngine for BrokenEngine {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn file_extension(&self) -> &'static str {
        "rhai"
    }

    fn create_context(
        &self,
        spec: &ContextSpec<'_>,
    ) -> Result<Box<dyn ExecutionContext>, ScriptError> {
        Err(ScriptError::Context {
            message: format!("no engine available for {}", spec.pack),
        })
    }
}

#[test]
fn test_context_failure_fails_every_unit_in_pack() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "let a = 1;");
    write(&root, "b.rhai", "let b = 1;");

    let (manager, console) = manager(&root, Arc::new(ScriptHost::new()));
    let mut manager = manager.with_engine(Arc::new(BrokenEngine));
    manager.discover();
    manager.load();

    assert_eq!(manager.errors().len(), 2);
    assert!(manager.errors()[0].contains("no engine available for server_scripts"));
    assert!(summary_lines(&console)[0].starts_with("Loaded 0/2"));
    // Unexpected failures also get a full diagnostic dump
    assert!(console
        .lines_at(ConsoleLevel::Error)
        .iter()
        .any(|line| line.contains("Context {")));
}

#[test]
fn test_repeated_load_replaces_script_handlers() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(
        &root,
        "a.rhai",
        "onEvent(\"loaded\", (e) => record(\"loaded\"));\nonEvent(\"tick\", (e) => record(\"tick\"));",
    );

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    let host_hits = Arc::new(AtomicUsize::new(0));
    let counter = host_hits.clone();
    manager.events().listen("tick", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.discover();
    manager.load();
    manager.load();
    manager.load();

    assert_eq!(manager.events().handler_count("tick"), 2);
    assert_eq!(manager.events().handler_count("loaded"), 1);
    assert_eq!(manager.post_event("tick", &ScriptValue::Unit), 2);
    assert_eq!(host_hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["loaded", "loaded", "loaded", "tick"]
    );
}

#[cfg(unix)]
#[test]
fn test_symlink_back_to_root_is_not_discovered_twice() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(&root, "a.rhai", "record(\"a\");");
    std::os::unix::fs::symlink(&root, root.join("again")).unwrap();

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    manager.discover();
    manager.load();

    assert_eq!(manager.pack("server_scripts").unwrap().len(), 1);
    assert_eq!(manager.summary().total, 1);
    assert_eq!(*seen.lock().unwrap(), vec!["a"]);
}

#[test]
fn test_char_literals_keep_their_type() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("server_scripts");
    write(
        &root,
        "chars.rhai",
        "let r = switch \"abc\"[0] { 'a' => 1, _ => 0 };\nrecord(r);\nrecord(type_of('a'));\nrecord(type_of('ab'));",
    );

    let (host, seen) = recording_host();
    let (mut manager, _console) = manager(&root, host);
    manager.discover();
    manager.load();

    assert!(manager.errors().is_empty(), "{:?}", manager.errors());
    assert_eq!(*seen.lock().unwrap(), vec!["1", "char", "string"]);
}
