//! Error and diagnostic types shared by the compiler and runtime crates.
//!
//! The original implementation signals failure by longjmp-ing back to a
//! guard installed at the embedder boundary. This rewrite replaces that with
//! ordinary `Result` propagation: every fallible routine returns
//! `Result<T, HyError>` and uses `?`, and only the outermost embedder-facing
//! entry points (`HyState::run_string`, `run_file`, `print_bytecode_*`)
//! convert an `Err` into the owned [`Diagnostic`] record that crosses the
//! API boundary.

use std::fmt;

/// A fully-formed, owned error ready to hand back to an embedder.
///
/// Mirrors the original `HyError` record: a description, an optional file
/// path, 1-based line/column (0 when unknown), and an optional source
/// snippet with the offending span's length for caret-underlining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub description: String,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    pub code: Option<String>,
    pub length: u32,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("<string>");
        writeln!(f, "{file}:{}:{} [Error] {}", self.line, self.column, self.description)?;
        if let Some(code) = &self.code {
            writeln!(f, "{code}")?;
            let underline: String = " ".repeat(self.column.saturating_sub(1) as usize)
                + &"^".repeat(self.length.max(1) as usize);
            write!(f, "{underline}")?;
        }
        Ok(())
    }
}

/// The taxonomy of failures a compile-and-run pipeline can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HyError {
    /// A lexical error: unterminated string/comment, invalid escape, invalid
    /// base prefix, trailing identifier after a numeric literal.
    Lex { message: String, line: u32, column: u32, length: u32 },
    /// A parse-time error: unexpected token, unknown identifier, duplicate
    /// definition, invalid control flow, invalid import path, and the like.
    Parse { message: String, line: u32, column: u32, length: u32 },
    /// A runtime error raised while executing bytecode: type mismatches,
    /// out-of-bounds access, calling a non-callable value, and the like.
    /// Unlike the original source (which calls `printf` + `exit`), every one
    /// of these propagates as an ordinary `Result::Err`.
    Runtime { message: String },
    /// Failure to read a source file, or the embedding contract was
    /// violated (e.g. a duplicate package name).
    Io { message: String },
}

impl HyError {
    pub fn runtime(message: impl Into<String>) -> Self {
        HyError::Runtime { message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        HyError::Io { message: message.into() }
    }

    pub fn message(&self) -> &str {
        match self {
            HyError::Lex { message, .. }
            | HyError::Parse { message, .. }
            | HyError::Runtime { message }
            | HyError::Io { message } => message,
        }
    }

    /// Builds the owned [`Diagnostic`] that crosses the embedding boundary,
    /// attaching a source snippet when the error carries a source location.
    pub fn into_diagnostic(self, file: Option<String>, source: Option<&str>) -> Diagnostic {
        match self {
            HyError::Lex { message, line, column, length } | HyError::Parse { message, line, column, length } => {
                let code = source.and_then(|src| source_line(src, line)).map(|s| s.to_string());
                Diagnostic { description: message, file, line, column, code, length }
            }
            HyError::Runtime { message } | HyError::Io { message } => {
                Diagnostic { description: message, file, line: 0, column: 0, code: None, length: 0 }
            }
        }
    }
}

impl fmt::Display for HyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for HyError {}

fn source_line(source: &str, line: u32) -> Option<&str> {
    source.split(['\n', '\r']).nth(line.checked_sub(1)? as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_display_includes_caret_underline() {
        let diag = Diagnostic {
            description: "unexpected token".into(),
            file: Some("main.hy".into()),
            line: 2,
            column: 5,
            code: Some("let x = ".into()),
            length: 1,
        };
        let rendered = diag.to_string();
        assert!(rendered.contains("main.hy:2:5"));
        assert!(rendered.contains("unexpected token"));
    }

    #[test]
    fn runtime_error_has_no_location() {
        let diag = HyError::runtime("number expected").into_diagnostic(None, None);
        assert_eq!(diag.line, 0);
        assert_eq!(diag.column, 0);
        assert!(diag.code.is_none());
    }
}
