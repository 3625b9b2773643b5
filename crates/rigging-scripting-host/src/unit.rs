use std::cmp::{Ordering, Reverse};
use std::fs;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::engine::ExecutionContext;
use crate::error::ScriptError;
use crate::preprocess::{PreprocessError, SourcePreprocessor};

/// Failure while reading a script file and its header directives
#[derive(Debug, Error)]
pub enum PreloadError {
    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error("{location} is not valid UTF-8")]
    NotUtf8 { location: String },

    #[error("{location}:{line}: invalid value '{value}' for directive '{directive}'")]
    InvalidDirective {
        location: String,
        line: usize,
        directive: String,
        value: String,
    },

    #[error("{} is not inside pack root {}", path.display(), root.display())]
    OutsidePack { path: PathBuf, root: PathBuf },
}

/// Everything known about a script file before it is preprocessed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFileInfo {
    /// Pack-relative path with `/` separators
    pub location: String,
    pub path: PathBuf,
    pub priority: i32,
    pub source: String,
}

/// Header directives read from leading `//` comments
#[derive(Debug, Default)]
struct Directives {
    priority: i32,
    ignored: bool,
}

fn parse_directives(location: &str, source: &str) -> Result<Directives, PreloadError> {
    let mut directives = Directives::default();

    for (index, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix("//") else {
            break;
        };
        let Some((key, value)) = comment.split_once(':') else {
            continue;
        };

        let key = key.trim();
        let value = value.trim();
        let invalid = || PreloadError::InvalidDirective {
            location: location.to_string(),
            line: index + 1,
            directive: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "priority" => directives.priority = value.parse().map_err(|_| invalid())?,
            "ignored" => directives.ignored = value.parse().map_err(|_| invalid())?,
            _ => {}
        }
    }

    Ok(directives)
}

/// Pack-relative location of `path` with `/` separators
pub fn relative_location(root: &Path, path: &Path) -> Result<String, PreloadError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PreloadError::OutsidePack {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

impl ScriptFileInfo {
    /// Read `path` and its header directives
    ///
    /// Returns `Ok(None)` for files marked `// ignored: true`.
    pub fn preload(root: &Path, path: &Path) -> Result<Option<Self>, PreloadError> {
        let location = relative_location(root, path)?;
        let bytes = fs::read(path).map_err(|source| PreloadError::Io {
            location: location.clone(),
            source,
        })?;
        let source = String::from_utf8(bytes).map_err(|_| PreloadError::NotUtf8 {
            location: location.clone(),
        })?;

        let directives = parse_directives(&location, &source)?;
        if directives.ignored {
            return Ok(None);
        }

        Ok(Some(Self {
            location,
            path: path.to_path_buf(),
            priority: directives.priority,
            source,
        }))
    }

    /// Build from in-memory source, without touching the filesystem
    pub fn from_source(location: impl Into<String>, priority: i32, source: impl Into<String>) -> Self {
        let location = location.into();
        Self {
            path: PathBuf::from(&location),
            location,
            priority,
            source: source.into(),
        }
    }
}

/// Outcome of the most recent load for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitState {
    #[default]
    Pending,
    Loaded {
        elapsed: Duration,
    },
    Failed,
}

/// Why a unit failed to load
#[derive(Debug, Clone, Error)]
pub enum UnitError {
    #[error("{0}")]
    Preprocess(#[from] PreprocessError),

    #[error("{0}")]
    Script(#[from] ScriptError),
}

impl UnitError {
    /// Script-level errors are caused by the unit's own source
    pub fn is_script_level(&self) -> bool {
        match self {
            UnitError::Preprocess(PreprocessError::Other { .. }) => false,
            UnitError::Preprocess(_) => true,
            UnitError::Script(err) => err.is_script_level(),
        }
    }
}

/// One script file inside a pack
#[derive(Debug)]
pub struct ScriptUnit {
    info: ScriptFileInfo,
    preprocessed: OnceLock<Result<String, PreprocessError>>,
    state: UnitState,
    error: Option<UnitError>,
}

impl ScriptUnit {
    pub fn new(info: ScriptFileInfo) -> Self {
        Self {
            info,
            preprocessed: OnceLock::new(),
            state: UnitState::Pending,
            error: None,
        }
    }

    pub fn info(&self) -> &ScriptFileInfo {
        &self.info
    }

    pub fn location(&self) -> &str {
        &self.info.location
    }

    pub fn priority(&self) -> i32 {
        self.info.priority
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Failure from the most recent load, if any
    pub fn error(&self) -> Option<&UnitError> {
        self.error.as_ref()
    }

    /// Execution order within a pack: higher priority first, then location
    pub fn load_order(&self, other: &ScriptUnit) -> Ordering {
        (Reverse(self.info.priority), &self.info.location)
            .cmp(&(Reverse(other.info.priority), &other.info.location))
    }

    /// Transform the source once
    ///
    /// Concurrent callers block until the first finishes and then share its
    /// result. A failure is kept and returned to every later caller.
    pub fn preprocess(&self, preprocessor: &dyn SourcePreprocessor) -> Result<&str, &PreprocessError> {
        self.preprocessed
            .get_or_init(|| {
                let started = Instant::now();
                let result = catch_unwind(AssertUnwindSafe(|| {
                    preprocessor.preprocess(&self.info.source)
                }))
                .unwrap_or_else(|_| {
                    Err(PreprocessError::Other {
                        message: "preprocessor panicked".to_string(),
                    })
                });
                debug!(
                    target: "scripting",
                    "Preprocessed {} in {:?}",
                    self.info.location,
                    started.elapsed()
                );
                result
            })
            .as_ref()
            .map(String::as_str)
    }

    /// Preprocessed source if [`preprocess`](Self::preprocess) has already run
    pub fn preprocessed(&self) -> Option<Result<&str, &PreprocessError>> {
        self.preprocessed
            .get()
            .map(|result| result.as_ref().map(String::as_str))
    }

    /// Forget the outcome of the previous load
    pub(crate) fn reset(&mut self) {
        self.state = UnitState::Pending;
        self.error = None;
    }

    /// Record a failure that happened outside the unit, such as a context error
    pub(crate) fn fail(&mut self, error: UnitError) {
        self.state = UnitState::Failed;
        self.error = Some(error);
    }

    /// Run the preprocessed source in `context`
    ///
    /// Must be called after [`preprocess`](Self::preprocess). Returns true on
    /// success; on failure the error is available from [`error`](Self::error).
    pub fn compile_and_run(&mut self, context: &mut dyn ExecutionContext) -> bool {
        let started = Instant::now();

        let result = match self.preprocessed.get() {
            Some(Ok(source)) => run_guarded(context, &self.info.location, source).map_err(UnitError::from),
            Some(Err(err)) => Err(UnitError::from(err.clone())),
            None => {
                Err(UnitError::from(PreprocessError::Other {
                    message: "source was not preprocessed".to_string(),
                }))
            }
        };

        match result {
            Ok(()) => {
                self.state = UnitState::Loaded {
                    elapsed: started.elapsed(),
                };
                self.error = None;
                true
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }
}

fn run_guarded(
    context: &mut dyn ExecutionContext,
    location: &str,
    source: &str,
) -> Result<(), ScriptError> {
    match catch_unwind(AssertUnwindSafe(|| context.compile_and_run(location, source))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ScriptError::Panic { message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{Downleveler, Passthrough};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tempfile::TempDir;

    struct RecordingContext {
        runs: Vec<(String, String)>,
        fail_on: Option<&'static str>,
    }

    impl ExecutionContext for RecordingContext {
        fn has_global(&self, _name: &str) -> bool {
            false
        }

        fn global(&self, _name: &str) -> Option<crate::value::ScriptValue> {
            None
        }

        fn global_names(&self) -> Vec<String> {
            Vec::new()
        }

        fn compile_and_run(&mut self, location: &str, source: &str) -> Result<(), ScriptError> {
            if source.contains("panic") {
                panic!("context blew up");
            }
            if self.fail_on == Some(location) {
                return Err(ScriptError::runtime("boom", Some(1)));
            }
            self.runs.push((location.to_string(), source.to_string()));
            Ok(())
        }
    }

    fn context() -> RecordingContext {
        RecordingContext {
            runs: Vec::new(),
            fail_on: None,
        }
    }

    #[test]
    fn test_preload_reads_directives() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(
            root.join("sub/first.rhai"),
            "// priority: 10\n// some note: here\nlet x = 1;\n// priority: 99\n",
        )
        .unwrap();

        let info = ScriptFileInfo::preload(root, &root.join("sub/first.rhai"))
            .unwrap()
            .unwrap();
        assert_eq!(info.location, "sub/first.rhai");
        assert_eq!(info.priority, 10);
    }

    #[test]
    fn test_preload_skips_ignored_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("off.rhai");
        std::fs::write(&path, "// ignored: true\nlog(1);").unwrap();
        assert!(ScriptFileInfo::preload(temp.path(), &path).unwrap().is_none());
    }

    #[test]
    fn test_preload_rejects_bad_priority() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.rhai");
        std::fs::write(&path, "\n// priority: high\n").unwrap();

        let err = ScriptFileInfo::preload(temp.path(), &path).unwrap_err();
        assert!(matches!(err, PreloadError::InvalidDirective { line: 2, .. }));
        assert_eq!(
            err.to_string(),
            "bad.rhai:2: invalid value 'high' for directive 'priority'"
        );
    }

    #[test]
    fn test_preload_rejects_non_utf8() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("binary.rhai");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            ScriptFileInfo::preload(temp.path(), &path),
            Err(PreloadError::NotUtf8 { .. })
        ));
    }

    #[test]
    fn test_load_order() {
        let mut units = vec![
            ScriptUnit::new(ScriptFileInfo::from_source("b.rhai", 0, "")),
            ScriptUnit::new(ScriptFileInfo::from_source("z.rhai", 5, "")),
            ScriptUnit::new(ScriptFileInfo::from_source("a.rhai", 0, "")),
            ScriptUnit::new(ScriptFileInfo::from_source("neg.rhai", -1, "")),
        ];
        units.sort_by(|a, b| a.load_order(b));
        let order: Vec<&str> = units.iter().map(ScriptUnit::location).collect();
        assert_eq!(order, vec!["z.rhai", "a.rhai", "b.rhai", "neg.rhai"]);
    }

    #[test]
    fn test_preprocess_runs_once() {
        struct Counting(AtomicUsize);
        impl SourcePreprocessor for Counting {
            fn preprocess(&self, source: &str) -> Result<String, PreprocessError> {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(source.to_uppercase())
            }
        }

        let counting = Counting(AtomicUsize::new(0));
        let unit = ScriptUnit::new(ScriptFileInfo::from_source("a.rhai", 0, "abc"));

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| assert_eq!(unit.preprocess(&counting), Ok("ABC")));
            }
        });
        assert_eq!(counting.0.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_preprocess_failure_is_cached() {
        let unit = ScriptUnit::new(ScriptFileInfo::from_source("a.rhai", 0, "import \"x\";"));
        let first = unit.preprocess(&Downleveler).unwrap_err().clone();
        let second = unit.preprocess(&Passthrough).unwrap_err().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn test_compile_and_run_records_outcome() {
        let mut ctx = context();
        ctx.fail_on = Some("bad.rhai");

        let mut good = ScriptUnit::new(ScriptFileInfo::from_source("good.rhai", 0, "var x = 1;"));
        good.preprocess(&Downleveler).unwrap();
        assert!(good.compile_and_run(&mut ctx));
        assert!(matches!(good.state(), UnitState::Loaded { .. }));
        assert_eq!(ctx.runs, vec![("good.rhai".to_string(), "let x = 1;".to_string())]);

        let mut bad = ScriptUnit::new(ScriptFileInfo::from_source("bad.rhai", 0, "x"));
        bad.preprocess(&Passthrough).unwrap();
        assert!(!bad.compile_and_run(&mut ctx));
        assert_eq!(bad.state(), UnitState::Failed);
        assert_eq!(bad.error().unwrap().to_string(), "boom (line 1)");
    }

    #[test]
    fn test_context_panic_becomes_error() {
        let mut ctx = context();
        let mut unit = ScriptUnit::new(ScriptFileInfo::from_source("p.rhai", 0, "panic"));
        unit.preprocess(&Passthrough).unwrap();

        assert!(!unit.compile_and_run(&mut ctx));
        let err = unit.error().unwrap();
        assert!(!err.is_script_level());
        assert!(err.to_string().contains("context blew up"));
    }

    #[test]
    fn test_reset_clears_previous_outcome() {
        let mut unit = ScriptUnit::new(ScriptFileInfo::from_source("a.rhai", 0, ""));
        unit.fail(ScriptError::host("gone").into());
        assert_eq!(unit.state(), UnitState::Failed);
        unit.reset();
        assert_eq!(unit.state(), UnitState::Pending);
        assert!(unit.error().is_none());
    }
}
