use thiserror::Error;

/// Failure raised while creating a context, compiling, or running a script
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// The engine rejected the source text
    #[error("{message}{}", at_line(.line))]
    Compile { message: String, line: Option<usize> },

    /// The script raised an error while running
    #[error("{message}{}", at_line(.line))]
    Runtime { message: String, line: Option<usize> },

    /// A host-provided binding failed
    #[error("host binding failed: {message}")]
    Host { message: String },

    /// Host code panicked while the script was running
    #[error("panic while running script: {message}")]
    Panic { message: String },

    /// The execution context could not be created
    #[error("failed to create execution context: {message}")]
    Context { message: String },
}

fn at_line(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" (line {})", line),
        None => String::new(),
    }
}

impl ScriptError {
    pub fn compile(message: impl Into<String>, line: Option<usize>) -> Self {
        ScriptError::Compile {
            message: message.into(),
            line,
        }
    }

    pub fn runtime(message: impl Into<String>, line: Option<usize>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
            line,
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        ScriptError::Host {
            message: message.into(),
        }
    }

    /// Script-level errors are caused by the script's own source; everything else
    /// points at the host or its bindings.
    pub fn is_script_level(&self) -> bool {
        matches!(self, ScriptError::Compile { .. } | ScriptError::Runtime { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_level_classification() {
        assert!(ScriptError::compile("bad token", Some(3)).is_script_level());
        assert!(ScriptError::runtime("x is undefined", None).is_script_level());
        assert!(!ScriptError::host("registry closed").is_script_level());
        assert!(
            !ScriptError::Panic {
                message: "oops".into()
            }
            .is_script_level()
        );
    }

    #[test]
    fn test_display_includes_line() {
        let err = ScriptError::compile("unexpected '}'", Some(12));
        assert_eq!(err.to_string(), "unexpected '}' (line 12)");

        let err = ScriptError::runtime("division by zero", None);
        assert_eq!(err.to_string(), "division by zero");
    }
}
