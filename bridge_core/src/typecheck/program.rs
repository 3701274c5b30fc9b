use super::checker::{normalize_path, Checker, ModuleTypes};
use super::diagnostics::Diagnostic;
use super::options::CompilerOptions;
use crate::guest::{ast, is_declaration_file, parse, Dialect};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One root handed to the compiler.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub file: PathBuf,
    pub text: String,
}

impl SourceUnit {
    pub fn new(file: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug)]
pub struct CompiledUnit {
    pub file: PathBuf,
    pub declaration: bool,
    /// `None` when the unit failed to parse.
    pub syntax: Option<ast::Program>,
    pub types: ModuleTypes,
}

/// A compiled set of typed roots. Roots are checked in order, so a root
/// can import the types of any root listed before it.
#[derive(Debug)]
pub struct Program {
    options: CompilerOptions,
    units: Vec<CompiledUnit>,
    diagnostics: Vec<Diagnostic>,
}

impl Program {
    pub fn compile(roots: Vec<SourceUnit>, options: CompilerOptions) -> Program {
        let mut modules: HashMap<PathBuf, ModuleTypes> = HashMap::new();
        let mut units = Vec::with_capacity(roots.len());
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        for root in roots {
            let file = normalize_path(&root.file);
            let name = file.display().to_string();
            let declaration = is_declaration_file(&file);
            match parse(&root.text, Dialect::Typed) {
                Ok(syntax) => {
                    let (types, found) = Checker::new(&file, &options, &modules).check(&syntax);
                    debug!(file = %name, diagnostics = found.len(), "Checked typed unit");
                    diagnostics.extend(found);
                    modules.insert(file.clone(), types.clone());
                    units.push(CompiledUnit {
                        file,
                        declaration,
                        syntax: Some(syntax),
                        types,
                    });
                }
                Err(errors) => {
                    diagnostics.extend(errors.iter().map(|e| Diagnostic::from_syntax(&name, e)));
                    units.push(CompiledUnit {
                        file,
                        declaration,
                        syntax: None,
                        types: ModuleTypes::default(),
                    });
                }
            }
        }

        let mut unique: Vec<Diagnostic> = Vec::with_capacity(diagnostics.len());
        for diagnostic in diagnostics {
            if !unique.contains(&diagnostic) {
                unique.push(diagnostic);
            }
        }

        Program {
            options,
            units,
            diagnostics: unique,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn units(&self) -> &[CompiledUnit] {
        &self.units
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    fn unit(&self, file: &Path) -> Option<&CompiledUnit> {
        let file = normalize_path(file);
        self.units.iter().find(|unit| unit.file == file)
    }

    /// The evaluable output for `file`. Declaration files emit nothing.
    pub fn emit(&self, file: &Path) -> Option<&ast::Program> {
        self.unit(file)
            .filter(|unit| !unit.declaration)
            .and_then(|unit| unit.syntax.as_ref())
    }

    pub fn types(&self, file: &Path) -> Option<&ModuleTypes> {
        self.unit(file).map(|unit| &unit.types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_and_emit() {
        let program = Program::compile(
            vec![SourceUnit::new(
                "/proj/./math.ts",
                "export function add(a: number, b: number): number { return a + b; }",
            )],
            CompilerOptions::default(),
        );
        assert!(!program.has_errors());
        assert!(program.emit(Path::new("/proj/math.ts")).is_some());
        assert!(program.types(Path::new("/proj/math.ts")).unwrap().get("add").is_some());
    }

    #[test]
    fn test_declaration_files_do_not_emit() {
        let program = Program::compile(
            vec![SourceUnit::new("/proj/api.d.ts", "export declare function ping(): string;")],
            CompilerOptions::default(),
        );
        assert!(!program.has_errors(), "{:?}", program.diagnostics());
        assert!(program.emit(Path::new("/proj/api.d.ts")).is_none());
        assert!(program.types(Path::new("/proj/api.d.ts")).is_some());
    }

    #[test]
    fn test_syntax_errors_become_diagnostics() {
        let program = Program::compile(
            vec![SourceUnit::new("/proj/bad.ts", "export function (")],
            CompilerOptions::default(),
        );
        assert!(program.has_errors());
        assert!(program.emit(Path::new("/proj/bad.ts")).is_none());
        assert_eq!(program.diagnostics()[0].file, "/proj/bad.ts");
    }

    #[test]
    fn test_later_roots_import_earlier_ones() {
        let program = Program::compile(
            vec![
                SourceUnit::new("/proj/a.ts", "export const name: string = 'a';"),
                SourceUnit::new("/proj/b.ts", "import { name } from './a';\nexport const n: number = name;"),
            ],
            CompilerOptions::default(),
        );
        let codes: Vec<u32> = program.diagnostics().iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![2322]);
    }
}
