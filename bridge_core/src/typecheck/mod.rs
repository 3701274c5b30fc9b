//! Static compilation of typed guest sources.
//!
//! A [`Program`] is built from exactly the roots of one load. Compiler
//! options come from the nearest `tsconfig.json` when it is valid and from
//! [`CompilerOptions::default`] otherwise.

pub mod checker;
pub mod diagnostics;
pub mod options;
pub mod program;
pub mod types;

pub use checker::{Checker, ExportedSymbol, ModuleTypes};
pub use diagnostics::{format_diagnostics, Diagnostic, Severity};
pub use options::{find_project_file, CompilerOptions, ModuleKind, ScriptTarget};
pub use program::{CompiledUnit, Program, SourceUnit};
pub use types::{ParamType, PropertyType, Signature, Type};
