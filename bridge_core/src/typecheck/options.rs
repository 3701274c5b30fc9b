//! Compiler options for the typed dialect and `tsconfig.json` discovery.

use super::diagnostics::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub const PROJECT_FILE_NAME: &str = "tsconfig.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptTarget {
    ES3,
    ES5,
    ES2015,
    ES2016,
    ES2017,
    ES2018,
    ES2019,
    ES2020,
    ES2021,
    ES2022,
    ESNext,
}

impl ScriptTarget {
    const ALL: [(&'static str, ScriptTarget); 11] = [
        ("es3", ScriptTarget::ES3),
        ("es5", ScriptTarget::ES5),
        ("es2015", ScriptTarget::ES2015),
        ("es2016", ScriptTarget::ES2016),
        ("es2017", ScriptTarget::ES2017),
        ("es2018", ScriptTarget::ES2018),
        ("es2019", ScriptTarget::ES2019),
        ("es2020", ScriptTarget::ES2020),
        ("es2021", ScriptTarget::ES2021),
        ("es2022", ScriptTarget::ES2022),
        ("esnext", ScriptTarget::ESNext),
    ];
}

impl FromStr for ScriptTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower == "es6" {
            return Ok(ScriptTarget::ES2015);
        }
        Self::ALL
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, target)| *target)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|(name, _)| *name).collect();
                format!(
                    "Argument for '--target' option must be: '{}'.",
                    names.join("', '")
                )
            })
    }
}

impl fmt::Display for ScriptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    None,
    CommonJS,
    AMD,
    UMD,
    System,
    ES2015,
    ES2020,
    ES2022,
    ESNext,
    Node16,
    NodeNext,
}

impl ModuleKind {
    const ALL: [(&'static str, ModuleKind); 11] = [
        ("none", ModuleKind::None),
        ("commonjs", ModuleKind::CommonJS),
        ("amd", ModuleKind::AMD),
        ("umd", ModuleKind::UMD),
        ("system", ModuleKind::System),
        ("es2015", ModuleKind::ES2015),
        ("es2020", ModuleKind::ES2020),
        ("es2022", ModuleKind::ES2022),
        ("esnext", ModuleKind::ESNext),
        ("node16", ModuleKind::Node16),
        ("nodenext", ModuleKind::NodeNext),
    ];
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower == "es6" {
            return Ok(ModuleKind::ES2015);
        }
        Self::ALL
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|(name, _)| *name).collect();
                format!(
                    "Argument for '--module' option must be: '{}'.",
                    names.join("', '")
                )
            })
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Options the checker runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOptions {
    pub target: ScriptTarget,
    pub module: ModuleKind,
    pub strict: bool,
    /// Report parameters without an annotation or default.
    pub no_implicit_any: bool,
    /// `null` and `undefined` are only assignable to themselves.
    pub strict_null_checks: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            target: ScriptTarget::ES2017,
            module: ModuleKind::CommonJS,
            strict: false,
            no_implicit_any: false,
            strict_null_checks: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFile {
    #[serde(default)]
    compiler_options: RawCompilerOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompilerOptions {
    target: Option<String>,
    module: Option<String>,
    strict: Option<bool>,
    no_implicit_any: Option<bool>,
    strict_null_checks: Option<bool>,
}

impl CompilerOptions {
    /// Reads the `compilerOptions` of a project file on top of the defaults.
    pub fn from_project_file(path: &Path) -> Result<Self, Vec<Diagnostic>> {
        let file = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| {
            vec![Diagnostic::global(
                &file,
                5083,
                format!("Cannot read file '{}': {}.", file, e),
            )]
        })?;
        Self::from_project_json(&file, &content)
    }

    pub fn from_project_json(file: &str, content: &str) -> Result<Self, Vec<Diagnostic>> {
        let project: ProjectFile = serde_json::from_str(content).map_err(|e| {
            vec![Diagnostic {
                line: e.line() as u32,
                column: e.column() as u32,
                ..Diagnostic::global(file, 1005, e.to_string())
            }]
        })?;

        let raw = project.compiler_options;
        let mut options = CompilerOptions::default();
        let mut diagnostics = Vec::new();

        if let Some(target) = &raw.target {
            match target.parse() {
                Ok(target) => options.target = target,
                Err(message) => diagnostics.push(Diagnostic::global(file, 6046, message)),
            }
        }
        if let Some(module) = &raw.module {
            match module.parse() {
                Ok(module) => options.module = module,
                Err(message) => diagnostics.push(Diagnostic::global(file, 6046, message)),
            }
        }

        options.strict = raw.strict.unwrap_or(false);
        options.no_implicit_any = raw.no_implicit_any.unwrap_or(options.strict);
        options.strict_null_checks = raw.strict_null_checks.unwrap_or(options.strict);

        if diagnostics.is_empty() {
            Ok(options)
        } else {
            Err(diagnostics)
        }
    }

    /// Options for a compilation rooted in `dir`: the nearest project file
    /// when it parses cleanly, the defaults otherwise.
    pub fn discover(dir: &Path) -> Self {
        let Some(path) = find_project_file(dir) else {
            return Self::default();
        };
        match Self::from_project_file(&path) {
            Ok(options) => {
                debug!("Using compiler options from {}", path.display());
                options
            }
            Err(diagnostics) => {
                warn!(
                    diagnostics = diagnostics.len(),
                    "Ignoring {} and using default compiler options",
                    path.display()
                );
                Self::default()
            }
        }
    }
}

/// Walks up from `dir` looking for a project file.
pub fn find_project_file(dir: &Path) -> Option<PathBuf> {
    let mut current = Some(dir);
    while let Some(dir) = current {
        let candidate = dir.join(PROJECT_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let options = CompilerOptions::default();
        assert_eq!(options.target, ScriptTarget::ES2017);
        assert_eq!(options.module, ModuleKind::CommonJS);
        assert!(!options.strict);
    }

    #[test]
    fn test_strict_enables_implicit_any_checks() {
        let options = CompilerOptions::from_project_json(
            "tsconfig.json",
            r#"{ "compilerOptions": { "target": "es2020", "strict": true, "strictNullChecks": false } }"#,
        )
        .unwrap();
        assert_eq!(options.target, ScriptTarget::ES2020);
        assert!(options.no_implicit_any);
        assert!(!options.strict_null_checks);
    }

    #[test]
    fn test_invalid_values_are_diagnostics() {
        let errors = CompilerOptions::from_project_json(
            "tsconfig.json",
            r#"{ "compilerOptions": { "target": "es1999" } }"#,
        )
        .unwrap_err();
        assert_eq!(errors[0].code, 6046);

        let errors = CompilerOptions::from_project_json("tsconfig.json", "{ nope").unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_discover_walks_up_and_falls_back() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("src/lib");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(CompilerOptions::discover(&nested), CompilerOptions::default());

        fs::write(
            dir.path().join(PROJECT_FILE_NAME),
            r#"{ "compilerOptions": { "strict": true } }"#,
        )
        .unwrap();
        assert!(CompilerOptions::discover(&nested).strict);

        fs::write(dir.path().join(PROJECT_FILE_NAME), "{ \"compilerOptions\": ").unwrap();
        assert_eq!(CompilerOptions::discover(&nested), CompilerOptions::default());
    }
}
