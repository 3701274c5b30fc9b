use crate::guest::{Span, SyntaxError};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A positioned compiler message for a guest source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub code: u32,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(file: impl Into<String>, span: Span, code: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: span.line,
            column: span.column,
            code,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    /// A diagnostic not tied to a position, e.g. for a configuration file
    /// that could not be read.
    pub fn global(file: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: 1,
            column: 1,
            code,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn from_syntax(file: &str, error: &SyntaxError) -> Self {
        Self::error(file, error.span, error.code, error.message.clone())
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({},{}): {} G{}: {}",
            self.file, self.line, self.column, self.severity, self.code, self.message
        )
    }
}

/// Renders diagnostics one per line followed by a summary line.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = String::new();
    for diagnostic in diagnostics {
        output.push_str(&diagnostic.to_string());
        output.push('\n');
    }
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    match errors {
        0 => {}
        1 => output.push_str("Found 1 error.\n"),
        n => output.push_str(&format!("Found {} errors.\n", n)),
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_diagnostics() {
        let diagnostics = vec![
            Diagnostic::error("a.ts", Span::new(0, 1, 3, 7), 2322, "Type 'string' is not assignable to type 'number'."),
            Diagnostic::global("tsconfig.json", 5083, "Cannot read file."),
        ];
        let output = format_diagnostics(&diagnostics);
        assert!(output.starts_with(
            "a.ts(3,7): error G2322: Type 'string' is not assignable to type 'number'.\n"
        ));
        assert!(output.ends_with("Found 2 errors.\n"));
        assert_eq!(format_diagnostics(&[]), "");
    }
}
