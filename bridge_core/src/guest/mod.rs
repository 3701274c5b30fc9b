//! The guest language runtime: lexer, parser, values and interpreter.
//!
//! Both guest dialects share one syntax tree. The typed dialect accepts type
//! annotations, aliases, interfaces and body-less declarations, which the
//! interpreter ignores.

pub mod ast;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod span;
pub mod token;
pub mod value;

pub use interpreter::{Exception, Interpreter, DEFAULT_MAX_CALL_DEPTH};
pub use parser::{parse, SyntaxError};
pub use scope::{Scope, ScopeRef};
pub use span::Span;
pub use value::{FunctionRef, GuestFunction, Promise, Value};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which flavour of the guest language a source is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Dynamic guest, `.js` sources evaluated directly.
    Script,
    /// Typed guest, `.ts` sources compiled and checked before evaluation.
    Typed,
}

impl Dialect {
    /// The extension tried when a requested module has none.
    pub fn extension(self) -> &'static str {
        match self {
            Dialect::Script => "js",
            Dialect::Typed => "ts",
        }
    }

    /// Picks the dialect from a file name, defaulting to script.
    pub fn from_path(path: &Path) -> Dialect {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("ts") => Dialect::Typed,
            _ => Dialect::Script,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Script => write!(f, "script"),
            Dialect::Typed => write!(f, "typed"),
        }
    }
}

/// Returns true for declaration-only sources (`*.d.ts`).
pub fn is_declaration_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".d.ts"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_path() {
        assert_eq!(Dialect::from_path(Path::new("a/b.ts")), Dialect::Typed);
        assert_eq!(Dialect::from_path(Path::new("a/b.js")), Dialect::Script);
        assert_eq!(Dialect::from_path(Path::new("a/b")), Dialect::Script);
        assert!(is_declaration_file(Path::new("types/index.d.ts")));
        assert!(!is_declaration_file(Path::new("index.ts")));
    }
}
