//! Source-to-source downleveling applied before compilation
//!
//! Script authors often write JavaScript habits into pack files. The
//! [`Downleveler`] rewrites the common ones into the engine's syntax and rejects
//! constructs that cannot work inside a pack:
//!
//! | input                 | output            |
//! |-----------------------|-------------------|
//! | `var x = 1`           | `let x = 1`       |
//! | `a === b`, `a !== b`  | `a == b`, `a != b`|
//! | `(a, b) => a + b`     | `\|a, b\| a + b`  |
//! | `x => x * 2`          | `\|x\| x * 2`     |
//! | `'text'`              | `"text"`          |
//!
//! A single-quoted literal holding exactly one character, such as `'a'` or
//! `'\n'`, is a char literal and is left as written.
//!
//! `import` and `require(...)` are rejected because every file of a pack is
//! loaded by the manager in a fixed order. Unbalanced delimiters, unterminated
//! strings and unterminated block comments are rejected with their position.
//! Nothing inside strings or comments is touched.

use thiserror::Error;

/// Error produced by a preprocessor, with a 1-based source position
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("line {line}, column {column}: '{keyword}' is not supported, files in a pack are loaded automatically")]
    ModuleLoading {
        keyword: &'static str,
        line: usize,
        column: usize,
    },

    #[error("line {line}, column {column}: unexpected '{found}'")]
    UnexpectedClose {
        found: char,
        line: usize,
        column: usize,
    },

    #[error("line {line}, column {column}: found '{found}', expected '{expected}' to close line {open_line}")]
    Mismatched {
        found: char,
        expected: char,
        line: usize,
        column: usize,
        open_line: usize,
    },

    #[error("line {line}, column {column}: '{open}' is never closed")]
    Unclosed {
        open: char,
        line: usize,
        column: usize,
    },

    #[error("line {line}, column {column}: unterminated string literal")]
    UnterminatedString { line: usize, column: usize },

    #[error("line {line}, column {column}: unterminated block comment")]
    UnterminatedComment { line: usize, column: usize },

    #[error("{message}")]
    Other { message: String },
}

impl PreprocessError {
    /// Line the error points at, if known
    pub fn line(&self) -> Option<usize> {
        match self {
            PreprocessError::ModuleLoading { line, .. }
            | PreprocessError::UnexpectedClose { line, .. }
            | PreprocessError::Mismatched { line, .. }
            | PreprocessError::Unclosed { line, .. }
            | PreprocessError::UnterminatedString { line, .. }
            | PreprocessError::UnterminatedComment { line, .. } => Some(*line),
            PreprocessError::Other { .. } => None,
        }
    }
}

/// Pure transform from raw source text to executable source text
///
/// Implementations are called concurrently from the preprocessing pool and
/// must not hold shared mutable state.
pub trait SourcePreprocessor: Send + Sync {
    fn preprocess(&self, source: &str) -> Result<String, PreprocessError>;
}

/// Leaves source untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl SourcePreprocessor for Passthrough {
    fn preprocess(&self, source: &str) -> Result<String, PreprocessError> {
        Ok(source.to_string())
    }
}

/// Default preprocessor, see the module docs for the rewrites it applies
#[derive(Debug, Default, Clone, Copy)]
pub struct Downleveler;

impl SourcePreprocessor for Downleveler {
    fn preprocess(&self, source: &str) -> Result<String, PreprocessError> {
        downlevel(source)
    }
}

struct Cursor<'a> {
    chars: &'a [char],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(chars: &'a [char]) -> Self {
        Self {
            chars,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.bump();
        }
    }

    fn starts_with(&self, pattern: &str) -> bool {
        pattern
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek(i) == Some(c))
    }

    fn next_non_whitespace(&self) -> Option<char> {
        self.chars[self.pos..]
            .iter()
            .copied()
            .find(|c| !c.is_whitespace())
    }
}

struct OpenDelimiter {
    delimiter: char,
    line: usize,
    column: usize,
    out_pos: usize,
    switch_block: bool,
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Rewrite the arrow parameters that end `out` into closure parameters
///
/// `group` is the output span of the most recently closed parenthesis group.
fn rewrite_arrow_params(out: &mut String, group: Option<(usize, usize)>) -> bool {
    let end = out.trim_end().len();

    if let Some((open, close_end)) = group {
        if close_end == end && open < close_end && out[open..].starts_with('(') {
            let params = out[open + 1..close_end - 1].trim().to_string();
            out.truncate(open);
            out.push('|');
            out.push_str(&params);
            out.push('|');
            return true;
        }
    }

    let trimmed = &out[..end];
    let start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_ident_continue(*c))
        .last()
        .map(|(i, _)| i);

    let Some(start) = start else {
        return false;
    };

    let ident = &trimmed[start..];
    let starts_ok = ident.chars().next().is_some_and(is_ident_start);
    let is_member = trimmed[..start].ends_with('.');
    if !starts_ok || is_member {
        return false;
    }

    let ident = ident.to_string();
    out.truncate(start);
    out.push('|');
    out.push_str(&ident);
    out.push('|');
    true
}

fn copy_string(
    cur: &mut Cursor<'_>,
    out: &mut String,
    quote: char,
) -> Result<(), PreprocessError> {
    let (line, column) = (cur.line, cur.column);
    let unterminated = PreprocessError::UnterminatedString { line, column };
    let single = quote == '\'';

    // `raw` keeps the literal as written, `converted` is its double-quoted form
    let mut raw = String::new();
    let mut converted = String::new();
    let mut length = 0;

    cur.bump();
    loop {
        let Some(c) = cur.bump() else {
            return Err(unterminated);
        };

        match c {
            '\\' => {
                let Some(escaped) = cur.bump() else {
                    return Err(unterminated);
                };
                raw.push('\\');
                raw.push(escaped);
                if single && escaped == '\'' {
                    converted.push('\'');
                } else {
                    converted.push('\\');
                    converted.push(escaped);
                }

                let digits = match escaped {
                    'x' => 2,
                    'u' => 4,
                    'U' => 8,
                    _ => 0,
                };
                for _ in 0..digits {
                    match cur.peek(0) {
                        Some(d) if d.is_ascii_hexdigit() => {
                            raw.push(d);
                            converted.push(d);
                            cur.bump();
                        }
                        _ => break,
                    }
                }
                length += 1;
            }
            '\n' if quote != '`' => return Err(unterminated),
            c if c == quote => break,
            c => {
                raw.push(c);
                if single && c == '"' {
                    converted.push_str("\\\"");
                } else {
                    converted.push(c);
                }
                length += 1;
            }
        }
    }

    // A single character in single quotes is a char literal and stays one
    if single && length != 1 {
        out.push('"');
        out.push_str(&converted);
        out.push('"');
    } else {
        out.push(quote);
        out.push_str(&raw);
        out.push(quote);
    }
    Ok(())
}

/// Apply the [`Downleveler`] rewrites to `source`
pub fn downlevel(source: &str) -> Result<String, PreprocessError> {
    let chars: Vec<char> = source.chars().collect();
    let mut cur = Cursor::new(&chars);
    let mut out = String::with_capacity(source.len() + 16);
    let mut stack: Vec<OpenDelimiter> = Vec::new();
    let mut last_group: Option<(usize, usize)> = None;
    let mut switch_pending = false;

    while let Some(c) = cur.peek(0) {
        let (line, column) = (cur.line, cur.column);

        match c {
            '/' if cur.peek(1) == Some('/') => {
                while let Some(c) = cur.peek(0) {
                    if c == '\n' {
                        break;
                    }
                    out.push(c);
                    cur.bump();
                }
            }
            '/' if cur.peek(1) == Some('*') => {
                out.push_str("/*");
                cur.skip(2);
                loop {
                    if cur.starts_with("*/") {
                        out.push_str("*/");
                        cur.skip(2);
                        break;
                    }
                    match cur.bump() {
                        Some(c) => out.push(c),
                        None => return Err(PreprocessError::UnterminatedComment { line, column }),
                    }
                }
            }
            '"' | '\'' | '`' => copy_string(&mut cur, &mut out, c)?,
            '(' | '[' | '{' => {
                let switch_block = c == '{' && switch_pending;
                if c == '{' {
                    switch_pending = false;
                }
                stack.push(OpenDelimiter {
                    delimiter: c,
                    line,
                    column,
                    out_pos: out.len(),
                    switch_block,
                });
                out.push(c);
                cur.bump();
            }
            ')' | ']' | '}' => {
                let open = stack
                    .pop()
                    .ok_or(PreprocessError::UnexpectedClose { found: c, line, column })?;
                let expected = closing(open.delimiter);
                if c != expected {
                    return Err(PreprocessError::Mismatched {
                        found: c,
                        expected,
                        line,
                        column,
                        open_line: open.line,
                    });
                }
                out.push(c);
                cur.bump();
                if c == ')' {
                    last_group = Some((open.out_pos, out.len()));
                }
            }
            '=' if cur.starts_with("===") => {
                out.push_str("==");
                cur.skip(3);
            }
            '!' if cur.starts_with("!==") => {
                out.push_str("!=");
                cur.skip(3);
            }
            '=' if cur.starts_with("=>") => {
                // `=>` directly inside a switch block separates match arms
                let in_switch = stack.last().is_some_and(|open| open.switch_block);
                if in_switch || !rewrite_arrow_params(&mut out, last_group.take()) {
                    out.push_str("=>");
                }
                cur.skip(2);
            }
            c if is_ident_start(c) => {
                let mut word = String::new();
                while let Some(c) = cur.peek(0) {
                    if !is_ident_continue(c) {
                        break;
                    }
                    word.push(c);
                    cur.bump();
                }

                let is_member = out.ends_with('.');
                match word.as_str() {
                    "var" if !is_member && cur.next_non_whitespace() != Some(':') => {
                        out.push_str("let");
                    }
                    "import" if !is_member => {
                        return Err(PreprocessError::ModuleLoading {
                            keyword: "import",
                            line,
                            column,
                        });
                    }
                    "require" if !is_member && cur.next_non_whitespace() == Some('(') => {
                        return Err(PreprocessError::ModuleLoading {
                            keyword: "require",
                            line,
                            column,
                        });
                    }
                    "switch" if !is_member => {
                        switch_pending = true;
                        out.push_str(&word);
                    }
                    _ => out.push_str(&word),
                }
            }
            c if c.is_ascii_digit() => {
                while let Some(c) = cur.peek(0) {
                    if !is_ident_continue(c) {
                        break;
                    }
                    out.push(c);
                    cur.bump();
                }
            }
            c => {
                out.push(c);
                cur.bump();
            }
        }
    }

    if let Some(open) = stack.pop() {
        return Err(PreprocessError::Unclosed {
            open: open.delimiter,
            line: open.line,
            column: open.column,
        });
    }

    Ok(out)
}
