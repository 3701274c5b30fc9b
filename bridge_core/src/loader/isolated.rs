//! Evaluates roots and their `require` graph, each unit in its own
//! global scope, and rolls a batch back when any root fails.

use super::cache::{CachedModule, InMemoryModuleCache, ModuleCache};
use super::namespace::ModuleNamespace;
use super::resolver::Resolver;
use super::source::{AcquiredSource, SourceAcquirer};
use super::tree::{ModuleRecord, ModuleTree};
use super::LoaderOptions;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::guest::builtins::{install_globals, native};
use crate::guest::interpreter::ErrorType;
use crate::guest::{ast, parse, Dialect, Exception, Interpreter, Scope, ScopeRef, Value};
use crate::id::ModuleId;
use crate::typecheck::{CompilerOptions, Diagnostic, ModuleTypes, Program, SourceUnit};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// One evaluated top-level unit.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    pub key: String,
    pub location: PathBuf,
    pub module_id: ModuleId,
    pub namespace: ModuleNamespace,
    /// Statically known export types, typed dialect only.
    pub types: Option<ModuleTypes>,
}

#[derive(Debug)]
struct LoaderState {
    dialect: Dialect,
    search_paths: Vec<PathBuf>,
    max_call_depth: usize,
    resolver: Resolver,
    cache: Arc<dyn ModuleCache>,
    tree: Mutex<ModuleTree>,
    diagnostics: RwLock<Vec<Diagnostic>>,
}

/// Compiles and evaluates guest sources, each top-level unit in a fresh
/// global scope.
#[derive(Debug, Clone)]
pub struct IsolatedLoader {
    state: Arc<LoaderState>,
}

impl IsolatedLoader {
    pub fn new(dialect: Dialect, config: &BridgeConfig) -> Self {
        Self::with_cache(dialect, config, Arc::new(InMemoryModuleCache::new()))
    }

    /// Creates a loader over an injected module cache.
    pub fn with_cache(dialect: Dialect, config: &BridgeConfig, cache: Arc<dyn ModuleCache>) -> Self {
        Self {
            state: Arc::new(LoaderState {
                dialect,
                search_paths: config.search_paths.clone(),
                max_call_depth: config.max_call_depth,
                resolver: Resolver::new(dialect),
                cache,
                tree: Mutex::new(ModuleTree::new(PathBuf::from(format!("<{} bridge>", dialect)))),
                diagnostics: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.state.dialect
    }

    pub fn cache(&self) -> &Arc<dyn ModuleCache> {
        &self.state.cache
    }

    fn acquirer(&self) -> SourceAcquirer {
        SourceAcquirer::new(self.state.resolver)
    }

    /// Diagnostics of the most recent load, including nested requires.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.state.diagnostics.read().clone()
    }

    /// Number of live module records.
    pub fn module_count(&self) -> usize {
        self.state.tree.lock().len()
    }

    /// Loads a batch of files. Either every unit loads or none does.
    pub fn load_files(&self, root: &Path, requests: &[PathBuf], options: &LoaderOptions) -> Result<Vec<LoadedUnit>> {
        self.state.diagnostics.write().clear();
        let paths = Resolver::module_paths(root, options, &self.state.search_paths);
        let sources = self.acquirer().from_files(requests, root, &paths)?;
        self.load_sources(&sources, options, true)
    }

    /// Loads one in-memory unit. Memory units never enter the module cache.
    pub fn load_memory(&self, root: &Path, name: &str, source: &str, options: &LoaderOptions) -> Result<LoadedUnit> {
        self.state.diagnostics.write().clear();
        let source = self.acquirer().from_memory(root, name, source)?;
        let mut units = self.load_sources(std::slice::from_ref(&source), options, false)?;
        units
            .pop()
            .ok_or_else(|| BridgeError::DiscoveryFailure(format!("{} produced no unit", name)))
    }

    pub fn load_package(&self, package: &str) -> Result<Vec<LoadedUnit>> {
        self.acquirer().from_package(package)?;
        Ok(Vec::new())
    }

    fn load_sources(&self, sources: &[AcquiredSource], options: &LoaderOptions, cache_roots: bool) -> Result<Vec<LoadedUnit>> {
        match self.state.dialect {
            Dialect::Typed => {
                let dir = sources
                    .first()
                    .map(|source| dir_of(&source.location))
                    .unwrap_or_default();
                let roots = sources
                    .iter()
                    .map(|source| SourceUnit::new(source.location.clone(), source.text.clone()))
                    .collect();
                let program = Program::compile(roots, CompilerOptions::discover(&dir));
                self.state
                    .diagnostics
                    .write()
                    .extend(program.diagnostics().iter().cloned());
                if program.has_errors() {
                    return Err(BridgeError::CompileDiagnostic(program.diagnostics().to_vec()));
                }

                let mut prepared = Vec::with_capacity(sources.len());
                for source in sources {
                    let syntax = program.emit(&source.location).ok_or_else(|| {
                        BridgeError::DiscoveryFailure(format!(
                            "{} is not part of the compiled output",
                            source.location.display()
                        ))
                    })?;
                    prepared.push((source, syntax, program.types(&source.location).cloned()));
                }
                self.evaluate_roots(prepared, options, cache_roots)
            }
            Dialect::Script => {
                let mut parsed = Vec::with_capacity(sources.len());
                let mut diagnostics = Vec::new();
                for source in sources {
                    match parse(&source.text, Dialect::Script) {
                        Ok(syntax) => parsed.push(syntax),
                        Err(errors) => {
                            let file = source.location.display().to_string();
                            diagnostics.extend(errors.iter().map(|e| Diagnostic::from_syntax(&file, e)));
                        }
                    }
                }
                if !diagnostics.is_empty() {
                    self.state.diagnostics.write().extend(diagnostics.iter().cloned());
                    return Err(BridgeError::CompileDiagnostic(diagnostics));
                }
                let prepared = sources
                    .iter()
                    .zip(parsed.iter())
                    .map(|(source, syntax)| (source, syntax, None))
                    .collect();
                self.evaluate_roots(prepared, options, cache_roots)
            }
        }
    }

    fn evaluate_roots(
        &self,
        prepared: Vec<(&AcquiredSource, &ast::Program, Option<ModuleTypes>)>,
        options: &LoaderOptions,
        cache_roots: bool,
    ) -> Result<Vec<LoadedUnit>> {
        let root = self.state.tree.lock().root();
        let mut loaded: Vec<LoadedUnit> = Vec::with_capacity(prepared.len());

        for (source, syntax, types) in prepared {
            let dir = dir_of(&source.location);
            let paths = Resolver::module_paths(&dir, options, &self.state.search_paths);
            let mut interpreter = Interpreter::new(self.state.max_call_depth);
            let evaluated = evaluate(
                &self.state,
                &mut interpreter,
                syntax,
                &source.location,
                root,
                paths,
                options,
                cache_roots,
            );
            match evaluated {
                Ok((module_id, module, scope)) => {
                    self.state.tree.lock().detach(module_id);
                    if self.state.dialect == Dialect::Script {
                        promote_declarations(syntax, &module, &scope);
                    }
                    loaded.push(LoadedUnit {
                        key: source.key.clone(),
                        location: source.location.clone(),
                        module_id,
                        namespace: ModuleNamespace::from_exports(&exports_of(&module)),
                        types,
                    });
                }
                Err(exception) => {
                    warn!(location = %source.location.display(), "Evaluation failed: {}", exception);
                    self.release(loaded.iter().map(|unit| unit.module_id));
                    return Err(exception.into());
                }
            }
        }

        info!(
            dialect = %self.state.dialect,
            units = loaded.len(),
            modules = self.module_count(),
            "Loaded guest units"
        );
        Ok(loaded)
    }

    /// Drops the given records and everything they required, evicting the
    /// cache entries they own. Returns the number of records removed.
    pub fn release(&self, module_ids: impl IntoIterator<Item = ModuleId>) -> usize {
        module_ids
            .into_iter()
            .map(|id| discard(&self.state, id))
            .sum()
    }

    /// Forgets every record, cache entry and diagnostic.
    pub fn reset(&self) {
        self.state.tree.lock().clear();
        self.state.cache.clear();
        self.state.diagnostics.write().clear();
    }
}

fn dir_of(location: &Path) -> PathBuf {
    location.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn module_object(location: &Path) -> Value {
    let mut props = IndexMap::new();
    props.insert("filename".to_string(), Value::from(location.display().to_string()));
    props.insert("exports".to_string(), Value::empty_object());
    Value::object(props)
}

fn exports_of(module: &Value) -> Value {
    module
        .as_object()
        .and_then(|props| props.read().get("exports").cloned())
        .unwrap_or_default()
}

/// A dynamic root that exports nothing publishes its top-level function
/// declarations instead, so `function add(a, b) {...}` alone is callable.
fn promote_declarations(syntax: &ast::Program, module: &Value, scope: &ScopeRef) {
    let has_export = syntax
        .body
        .iter()
        .any(|stmt| matches!(stmt, ast::Stmt::Export(_)));
    let exports = exports_of(module);
    let Some(props) = exports.as_object() else {
        return;
    };
    if has_export || !props.read().is_empty() {
        return;
    }
    let mut props = props.write();
    for stmt in &syntax.body {
        if let ast::Stmt::Function(decl) = stmt {
            let Some(name) = decl.name.as_deref() else {
                continue;
            };
            if let Some(value) = scope.lookup(name) {
                props.insert(name.to_string(), value);
            }
        }
    }
    if !props.is_empty() {
        debug!(functions = props.len(), "Published top-level declarations");
    }
}

fn register(state: &LoaderState, location: &Path, paths: Vec<PathBuf>, module: &Value, parent: ModuleId, cache: bool) -> ModuleId {
    let mut record = ModuleRecord::new(location.to_path_buf(), paths, module.clone());
    record.cached = cache;
    let id = state.tree.lock().insert(record, Some(parent));
    if cache {
        state.cache.insert(
            location.to_path_buf(),
            CachedModule {
                id,
                module: module.clone(),
            },
        );
    }
    id
}

fn discard(state: &LoaderState, id: ModuleId) -> usize {
    let removed = state.tree.lock().remove_subtree(id);
    for record in removed.iter().filter(|record| record.cached) {
        let owned = state
            .cache
            .get(&record.filename)
            .is_some_and(|cached| cached.id == record.id);
        if owned {
            state.cache.evict(&record.filename);
            debug!(location = %record.filename.display(), "Evicted module");
        }
    }
    removed.len()
}

/// Evaluates `syntax` as the module at `location`. The record is cached
/// before evaluation so cyclic requires see the partial exports.
#[allow(clippy::too_many_arguments)]
fn evaluate(
    state: &Arc<LoaderState>,
    interpreter: &mut Interpreter,
    syntax: &ast::Program,
    location: &Path,
    parent: ModuleId,
    paths: Vec<PathBuf>,
    options: &LoaderOptions,
    cache: bool,
) -> std::result::Result<(ModuleId, Value, ScopeRef), Exception> {
    let module = module_object(location);
    let id = register(state, location, paths.clone(), &module, parent, cache);
    let dir = dir_of(location);

    let scope = Scope::global();
    install_globals(&scope);
    scope.declare("module", module.clone(), false);
    scope.declare("exports", exports_of(&module), true);
    scope.declare("__filename", Value::from(location.display().to_string()), false);
    scope.declare("__dirname", Value::from(dir.display().to_string()), false);
    let context = RequireContext {
        state: Arc::downgrade(state),
        module_id: id,
        dir,
        paths,
        options: options.clone(),
    };
    scope.declare(
        "require",
        native("require", &["id"], move |interpreter, args| context.require(interpreter, args)),
        false,
    );

    match interpreter.run_module(syntax, &scope) {
        Ok(()) => Ok((id, module, scope)),
        Err(exception) => {
            discard(state, id);
            Err(exception)
        }
    }
}

/// What a module's `require` needs to resolve and evaluate dependencies.
struct RequireContext {
    state: Weak<LoaderState>,
    module_id: ModuleId,
    dir: PathBuf,
    paths: Vec<PathBuf>,
    options: LoaderOptions,
}

impl RequireContext {
    fn require(&self, interpreter: &mut Interpreter, args: &[Value]) -> std::result::Result<Value, Exception> {
        let Some(specifier) = args.first().and_then(Value::as_str) else {
            return Err(Exception::type_error("The \"id\" argument must be of type string"));
        };
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| Exception::error(ErrorType::Error, "Module loader has been released"))?;
        let location = state
            .resolver
            .resolve_require(specifier, &self.dir, &self.paths)
            .ok_or_else(|| Exception::error(ErrorType::Error, format!("Cannot find module '{}'", specifier)))?;

        if let Some(cached) = state.cache.get(&location) {
            debug!(specifier, location = %location.display(), "Module cache hit");
            return Ok(cached.exports());
        }

        let text = fs::read_to_string(&location).map_err(|e| {
            Exception::error(ErrorType::Error, format!("Cannot read module '{}': {}", specifier, e))
        })?;
        let dir = dir_of(&location);
        let paths = Resolver::module_paths(&dir, &self.options, &state.search_paths);
        debug!(specifier, location = %location.display(), "Evaluating dependency");

        let module = match location.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    Exception::error(ErrorType::SyntaxError, format!("{}: {}", location.display(), e))
                })?;
                let module = module_object(&location);
                if let Some(props) = module.as_object() {
                    props.write().insert("exports".to_string(), Value::from_json(&json));
                }
                register(&state, &location, paths, &module, self.module_id, true);
                module
            }
            Some("ts") => {
                let program = Program::compile(
                    vec![SourceUnit::new(location.clone(), text)],
                    CompilerOptions::discover(&dir),
                );
                if program.has_errors() {
                    state
                        .diagnostics
                        .write()
                        .extend(program.diagnostics().iter().cloned());
                    return Err(compile_failure(specifier, program.diagnostics()));
                }
                let syntax = program.emit(&location).ok_or_else(|| {
                    Exception::error(ErrorType::Error, format!("Module '{}' has no output", specifier))
                })?;
                let (_, module, _) = evaluate(
                    &state,
                    interpreter,
                    syntax,
                    &location,
                    self.module_id,
                    paths,
                    &self.options,
                    true,
                )?;
                module
            }
            _ => {
                let file = location.display().to_string();
                let syntax = parse(&text, Dialect::Script).map_err(|errors| {
                    let diagnostics: Vec<Diagnostic> =
                        errors.iter().map(|e| Diagnostic::from_syntax(&file, e)).collect();
                    state.diagnostics.write().extend(diagnostics.iter().cloned());
                    compile_failure(specifier, &diagnostics)
                })?;
                let (_, module, _) = evaluate(
                    &state,
                    interpreter,
                    &syntax,
                    &location,
                    self.module_id,
                    paths,
                    &self.options,
                    true,
                )?;
                module
            }
        };
        Ok(exports_of(&module))
    }
}

fn compile_failure(specifier: &str, diagnostics: &[Diagnostic]) -> Exception {
    let detail = diagnostics
        .first()
        .map(ToString::to_string)
        .unwrap_or_default();
    Exception::error(
        ErrorType::SyntaxError,
        format!("Cannot compile module '{}': {}", specifier, detail),
    )
}
