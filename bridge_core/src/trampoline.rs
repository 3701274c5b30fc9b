//! The fixed operation set an orchestrator calls into.
//!
//! A process registers exactly one [`Trampoline`] before dispatching any
//! operation. Every operation is funneled: errors and panics are logged,
//! kept as the last error, and turned into the operation's default result.

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::discovery::{DiscoveryMap, TypeIdMap};
use crate::error::{BridgeError, ErrorKind, Result};
use crate::guest::Dialect;
use crate::handle::HandleRef;
use crate::id::HandleId;
use crate::lifecycle::host_with_typed_child;
use crate::loader::LoaderOptions;
use crate::typecheck::{format_diagnostics, Diagnostic};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Returned by the `test` operation.
pub const TEST_MESSAGE: &str = "Guest Bridge Test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ExecutionPath,
    LoadFromFile,
    LoadFromMemory,
    LoadFromPackage,
    Clear,
    Discover,
    Destroy,
    Test,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::ExecutionPath,
        Operation::LoadFromFile,
        Operation::LoadFromMemory,
        Operation::LoadFromPackage,
        Operation::Clear,
        Operation::Discover,
        Operation::Destroy,
        Operation::Test,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::ExecutionPath => "execution_path",
            Operation::LoadFromFile => "load_from_file",
            Operation::LoadFromMemory => "load_from_memory",
            Operation::LoadFromPackage => "load_from_package",
            Operation::Clear => "clear",
            Operation::Discover => "discover",
            Operation::Destroy => "destroy",
            Operation::Test => "test",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Operation::ExecutionPath | Operation::Destroy => (0, 0),
            Operation::LoadFromFile => (1, 2),
            Operation::LoadFromMemory => (2, 3),
            Operation::LoadFromPackage | Operation::Clear | Operation::Discover => (1, 1),
            Operation::Test => (0, 1),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An argument passed through name-based dispatch.
#[derive(Debug, Clone)]
pub enum Argument {
    Text(String),
    Paths(Vec<PathBuf>),
    Handle(HandleId),
    Options(LoaderOptions),
    Json(serde_json::Value),
}

impl Argument {
    fn kind(&self) -> &'static str {
        match self {
            Argument::Text(_) => "text",
            Argument::Paths(_) => "paths",
            Argument::Handle(_) => "handle",
            Argument::Options(_) => "options",
            Argument::Json(_) => "json",
        }
    }
}

/// What a successful load reports: the handle and each unit's exports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedHandle {
    pub handle_id: HandleId,
    pub exports: IndexMap<String, Vec<String>>,
}

impl LoadedHandle {
    pub fn from_handle(handle: &HandleRef) -> Self {
        Self {
            handle_id: handle.id(),
            exports: handle
                .units()
                .iter()
                .map(|(key, unit)| {
                    let names = unit.namespace.names().into_iter().map(String::from).collect();
                    (key.clone(), names)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Text(String),
    Loaded(Option<LoadedHandle>),
    Discovery(DiscoveryMap),
    Bool(bool),
    Unit,
}

/// The last funneled failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub operation: Operation,
    pub kind: ErrorKind,
    pub message: String,
}

/// Operation set bound to one implementation identifier and target.
#[derive(Debug)]
pub struct Trampoline {
    implementation: String,
    target: String,
    host: Arc<Bridge>,
    bridge: Arc<Bridge>,
    debug: bool,
    last_error: Mutex<Option<LastError>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl Trampoline {
    /// Builds the bridges for `dialect`. A typed trampoline serves a typed
    /// bridge hosted as the child of a dynamic one.
    pub fn new(implementation: &str, target: &str, dialect: Dialect, config: BridgeConfig) -> Result<Self> {
        if implementation.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("implementation identifier is empty".into()));
        }
        let debug = config.debug;
        let (host, bridge) = match dialect {
            Dialect::Script => {
                let host = Arc::new(Bridge::new(Dialect::Script, config));
                (host.clone(), host)
            }
            Dialect::Typed => host_with_typed_child(config),
        };
        Ok(Self {
            implementation: implementation.to_string(),
            target: target.to_string(),
            host,
            bridge,
            debug,
            last_error: Mutex::new(None),
            diagnostics: Mutex::new(Vec::new()),
        })
    }

    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The bridge serving operations.
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().clone()
    }

    /// Diagnostics of the most recent load.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    pub fn formatted_diagnostics(&self) -> String {
        format_diagnostics(&self.diagnostics())
    }

    fn funnel<T, F>(&self, operation: Operation, inputs: &dyn fmt::Debug, default: T, call: F) -> T
    where
        T: fmt::Debug,
        F: FnOnce() -> Result<T>,
    {
        if self.debug {
            debug!(operation = %operation, inputs = ?inputs, "call");
        }
        let failure = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(value)) => {
                if self.debug {
                    debug!(operation = %operation, output = ?value, "return");
                }
                return value;
            }
            Ok(Err(e)) => LastError {
                operation,
                kind: e.kind(),
                message: e.to_string(),
            },
            Err(payload) => LastError {
                operation,
                kind: ErrorKind::Panic,
                message: panic_message(payload.as_ref()),
            },
        };
        self.record_failure(failure);
        if self.debug {
            debug!(operation = %operation, output = ?default, "return");
        }
        default
    }

    fn record_failure(&self, failure: LastError) {
        error!(
            implementation = %self.implementation,
            operation = %failure.operation,
            kind = ?failure.kind,
            "{}",
            failure.message
        );
        *self.last_error.lock() = Some(failure);
    }

    fn record_diagnostics(&self) {
        *self.diagnostics.lock() = self.bridge.diagnostics();
    }

    pub fn execution_path(&self) -> String {
        self.funnel(Operation::ExecutionPath, &(), String::new(), || {
            Ok(self.bridge.execution_path())
        })
    }

    pub fn load_from_file(&self, paths: &[PathBuf], options: Option<&LoaderOptions>) -> Option<HandleRef> {
        let handle = self.funnel(Operation::LoadFromFile, &(paths, options), None, || {
            self.bridge.load_from_file(paths, options).map(Some)
        });
        self.record_diagnostics();
        handle
    }

    pub fn load_from_memory(&self, name: &str, source: &str, options: Option<&LoaderOptions>) -> Option<HandleRef> {
        let handle = self.funnel(Operation::LoadFromMemory, &(name, options), None, || {
            self.bridge.load_from_memory(name, source, options).map(Some)
        });
        self.record_diagnostics();
        handle
    }

    pub fn load_from_package(&self, package: &str) -> Option<HandleRef> {
        self.funnel(Operation::LoadFromPackage, &package, None, || {
            self.bridge.load_from_package(package).map(Some)
        })
    }

    pub fn clear(&self, handle_id: HandleId) {
        self.funnel(Operation::Clear, &handle_id, (), || {
            self.bridge.clear(handle_id);
            Ok(())
        })
    }

    pub fn discover(&self, handle_id: HandleId) -> DiscoveryMap {
        self.funnel(Operation::Discover, &handle_id, DiscoveryMap::new(), || {
            Ok(self.bridge.discover(handle_id))
        })
    }

    /// Aggregated discovery over several handles.
    pub fn discover_all(&self, handle_ids: &[HandleId]) -> DiscoveryMap {
        self.funnel(Operation::Discover, &handle_ids, DiscoveryMap::new(), || {
            self.bridge.discover_all(handle_ids)
        })
    }

    /// Bridge type ids of a handle's typed exports, with names registered
    /// through [`Bridge::register_type`].
    pub fn type_ids(&self, handle_id: HandleId) -> TypeIdMap {
        self.funnel(Operation::Discover, &handle_id, TypeIdMap::new(), || {
            Ok(self.bridge.type_ids(handle_id))
        })
    }

    /// Tears down the typed child (when any) and then the host bridge.
    pub fn destroy(&self) -> bool {
        self.funnel(Operation::Destroy, &(), false, || Ok(self.host.destroy()))
    }

    pub fn test(&self, value: Option<&serde_json::Value>) -> String {
        self.funnel(Operation::Test, &value, String::new(), || {
            match value {
                Some(value) => info!(
                    implementation = %self.implementation,
                    target = %self.target,
                    value = %value,
                    "{}",
                    TEST_MESSAGE
                ),
                None => info!(implementation = %self.implementation, target = %self.target, "{}", TEST_MESSAGE),
            }
            Ok(TEST_MESSAGE.to_string())
        })
    }

    /// Name-based dispatch. Unknown names fail. Wrong arity and argument
    /// shapes are funneled like any other failure of the named operation.
    pub fn dispatch(&self, name: &str, args: Vec<Argument>) -> Result<Response> {
        let Some(operation) = Operation::from_name(name) else {
            error!(implementation = %self.implementation, operation = name, "Unknown operation");
            return Err(BridgeError::InvalidArgument(format!("unknown operation '{}'", name)));
        };
        match self.dispatch_operation(operation, args) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.record_failure(LastError {
                    operation,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Ok(default_response(operation))
            }
        }
    }

    fn dispatch_operation(&self, operation: Operation, args: Vec<Argument>) -> Result<Response> {
        let (min, max) = operation.arity();
        if args.len() < min || args.len() > max {
            return Err(BridgeError::InvalidArgument(format!(
                "{} takes {} to {} argument(s), got {}",
                operation,
                min,
                max,
                args.len()
            )));
        }

        let mut args = args.into_iter();
        let response = match operation {
            Operation::ExecutionPath => Response::Text(self.execution_path()),
            Operation::LoadFromFile => {
                let paths = match args.next() {
                    Some(Argument::Paths(paths)) => paths,
                    Some(Argument::Text(path)) => vec![PathBuf::from(path)],
                    other => return Err(shape_error(operation, "paths", other)),
                };
                let options = optional_options(operation, args.next())?;
                let handle = self.load_from_file(&paths, options.as_ref());
                Response::Loaded(handle.as_ref().map(LoadedHandle::from_handle))
            }
            Operation::LoadFromMemory => {
                let name = expect_text(operation, args.next())?;
                let source = expect_text(operation, args.next())?;
                let options = optional_options(operation, args.next())?;
                let handle = self.load_from_memory(&name, &source, options.as_ref());
                Response::Loaded(handle.as_ref().map(LoadedHandle::from_handle))
            }
            Operation::LoadFromPackage => {
                let package = expect_text(operation, args.next())?;
                let handle = self.load_from_package(&package);
                Response::Loaded(handle.as_ref().map(LoadedHandle::from_handle))
            }
            Operation::Clear => {
                self.clear(expect_handle(operation, args.next())?);
                Response::Unit
            }
            Operation::Discover => match args.next() {
                Some(Argument::Json(serde_json::Value::Array(items))) => {
                    let ids = items
                        .iter()
                        .map(|item| match item.as_str() {
                            Some(text) => parse_handle(text),
                            None => Err(BridgeError::InvalidArgument(format!("'{}' is not a handle id", item))),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Response::Discovery(self.discover_all(&ids))
                }
                other => Response::Discovery(self.discover(expect_handle(operation, other)?)),
            },
            Operation::Destroy => Response::Bool(self.destroy()),
            Operation::Test => {
                let value = match args.next() {
                    None => None,
                    Some(Argument::Json(value)) => Some(value),
                    Some(Argument::Text(text)) => Some(serde_json::Value::String(text)),
                    other => return Err(shape_error(operation, "json", other)),
                };
                Response::Text(self.test(value.as_ref()))
            }
        };
        Ok(response)
    }
}

/// What a funneled operation returns when it fails.
fn default_response(operation: Operation) -> Response {
    match operation {
        Operation::ExecutionPath | Operation::Test => Response::Text(String::new()),
        Operation::LoadFromFile | Operation::LoadFromMemory | Operation::LoadFromPackage => Response::Loaded(None),
        Operation::Clear => Response::Unit,
        Operation::Discover => Response::Discovery(DiscoveryMap::new()),
        Operation::Destroy => Response::Bool(false),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic".to_string()
    }
}

fn shape_error(operation: Operation, expected: &str, got: Option<Argument>) -> BridgeError {
    let got = got.as_ref().map(Argument::kind).unwrap_or("nothing");
    BridgeError::InvalidArgument(format!("{} expects {}, got {}", operation, expected, got))
}

fn expect_text(operation: Operation, arg: Option<Argument>) -> Result<String> {
    match arg {
        Some(Argument::Text(text)) => Ok(text),
        other => Err(shape_error(operation, "text", other)),
    }
}

fn parse_handle(text: &str) -> Result<HandleId> {
    text.parse()
        .map_err(|_| BridgeError::InvalidArgument(format!("'{}' is not a handle id", text)))
}

fn expect_handle(operation: Operation, arg: Option<Argument>) -> Result<HandleId> {
    match arg {
        Some(Argument::Handle(id)) => Ok(id),
        Some(Argument::Text(text)) => parse_handle(&text),
        other => Err(shape_error(operation, "handle", other)),
    }
}

fn optional_options(operation: Operation, arg: Option<Argument>) -> Result<Option<LoaderOptions>> {
    match arg {
        None => Ok(None),
        Some(Argument::Options(options)) => Ok(Some(options)),
        Some(Argument::Json(json)) => Ok(Some(serde_json::from_value(json)?)),
        other => Err(shape_error(operation, "options", other)),
    }
}

static TRAMPOLINE: OnceCell<Trampoline> = OnceCell::new();

/// Registers the process-wide trampoline. Only the first call succeeds.
pub fn register(implementation: &str, target: &str, dialect: Dialect, config: BridgeConfig) -> Result<&'static Trampoline> {
    if let Some(existing) = TRAMPOLINE.get() {
        return Err(BridgeError::AlreadyRegistered(existing.implementation.clone()));
    }
    let trampoline = Trampoline::new(implementation, target, dialect, config)?;
    TRAMPOLINE
        .set(trampoline)
        .map_err(|rejected| BridgeError::AlreadyRegistered(rejected.implementation))?;
    let registered = registered()?;
    info!(implementation, target, dialect = %dialect, "Registered trampoline");
    Ok(registered)
}

/// The registered trampoline, or `NotRegistered`.
pub fn registered() -> Result<&'static Trampoline> {
    TRAMPOLINE.get().ok_or_else(|| {
        error!("Operation invoked before the trampoline was registered");
        BridgeError::NotRegistered
    })
}

/// Dispatches through the registered trampoline.
pub fn dispatch(name: &str, args: Vec<Argument>) -> Result<Response> {
    registered()?.dispatch(name, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{capture_logs, init_test_logging};

    fn trampoline(dialect: Dialect) -> Trampoline {
        Trampoline::new("test-impl", "0x0", dialect, BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_operation_set_is_closed() {
        let names: Vec<&str> = Operation::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            vec![
                "execution_path",
                "load_from_file",
                "load_from_memory",
                "load_from_package",
                "clear",
                "discover",
                "destroy",
                "test"
            ]
        );
        assert_eq!(Operation::from_name("load"), None);
    }

    #[test]
    fn test_failures_become_defaults() {
        init_test_logging();
        let trampoline = trampoline(Dialect::Script);
        assert!(trampoline.load_from_file(&[PathBuf::from("/nonexistent/x.js")], None).is_none());
        let last = trampoline.last_error().unwrap();
        assert_eq!(last.operation, Operation::LoadFromFile);
        assert_eq!(last.kind, ErrorKind::ModuleNotFound);
        assert_eq!(trampoline.bridge().handle_count(), 0);

        assert!(trampoline.load_from_package("pkg").is_none());
        assert_eq!(trampoline.last_error().unwrap().kind, ErrorKind::NotImplemented);
    }

    #[test]
    fn test_guest_exceptions_do_not_escape() {
        init_test_logging();
        let trampoline = trampoline(Dialect::Script);
        assert!(trampoline.load_from_memory("boom.js", "throw Error('boom');", None).is_none());
        let last = trampoline.last_error().unwrap();
        assert_eq!(last.kind, ErrorKind::Guest);
        assert!(last.message.contains("boom"));
    }

    #[test]
    fn test_panics_are_funneled() {
        let trampoline = trampoline(Dialect::Script);
        let value: Option<u8> = trampoline.funnel(Operation::Test, &(), None, || panic!("exploded"));
        assert_eq!(value, None);
        let last = trampoline.last_error().unwrap();
        assert_eq!(last.kind, ErrorKind::Panic);
        assert_eq!(last.message, "panic: exploded");
    }

    #[test]
    fn test_typed_diagnostics_are_kept() {
        let trampoline = trampoline(Dialect::Typed);
        let handle = trampoline.load_from_memory("bad.ts", "const n: number = 'text';", None);
        assert!(handle.is_none());
        assert_eq!(trampoline.last_error().unwrap().kind, ErrorKind::CompileDiagnostic);
        assert_eq!(trampoline.diagnostics()[0].code, 2322);
        assert!(trampoline.formatted_diagnostics().contains("G2322"));
    }

    #[test]
    fn test_dispatch_by_name() {
        let trampoline = trampoline(Dialect::Script);
        let loaded = trampoline
            .dispatch(
                "load_from_memory",
                vec![
                    Argument::Text("m.js".into()),
                    Argument::Text("export function add(left, right) { return left + right; }".into()),
                ],
            )
            .unwrap();
        let Response::Loaded(Some(loaded)) = loaded else {
            panic!("expected a handle, got {:?}", loaded);
        };
        assert_eq!(loaded.exports["m.js"], vec!["add"]);

        let discovered = trampoline
            .dispatch("discover", vec![Argument::Text(loaded.handle_id.to_string())])
            .unwrap();
        let Response::Discovery(records) = discovered else {
            panic!("expected discovery");
        };
        assert_eq!(records["add"].signature, vec!["left", "right"]);

        assert_eq!(
            trampoline.dispatch("test", vec![]).unwrap(),
            Response::Text(TEST_MESSAGE.into())
        );
        let err = trampoline.dispatch("reload", vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_dispatch_validation_is_funneled() {
        init_test_logging();
        let trampoline = trampoline(Dialect::Script);
        assert_eq!(trampoline.dispatch("clear", vec![]).unwrap(), Response::Unit);
        let last = trampoline.last_error().unwrap();
        assert_eq!(last.operation, Operation::Clear);
        assert_eq!(last.kind, ErrorKind::InvalidArgument);

        assert_eq!(
            trampoline.dispatch("clear", vec![Argument::Paths(vec![])]).unwrap(),
            Response::Unit
        );
        assert!(trampoline.last_error().unwrap().message.contains("expects handle"));

        assert_eq!(
            trampoline.dispatch("load_from_memory", vec![Argument::Text("m.js".into())]).unwrap(),
            Response::Loaded(None)
        );
        assert_eq!(trampoline.last_error().unwrap().operation, Operation::LoadFromMemory);
        assert_eq!(
            trampoline.dispatch("discover", vec![Argument::Text("not-an-id".into())]).unwrap(),
            Response::Discovery(DiscoveryMap::new())
        );
        assert_eq!(
            trampoline.dispatch("destroy", vec![Argument::Text("x".into())]).unwrap(),
            Response::Bool(false)
        );
        assert_eq!(
            trampoline.dispatch("test", vec![Argument::Paths(vec![])]).unwrap(),
            Response::Text(String::new())
        );
        assert_eq!(trampoline.bridge().handle_count(), 0);
    }

    #[test]
    fn test_dispatch_discover_over_handle_list() {
        let trampoline = trampoline(Dialect::Script);
        let first = trampoline.load_from_memory("a.js", "export function one(a) {}", None).unwrap();
        let second = trampoline.load_from_memory("b.js", "export function two(a, b) {}", None).unwrap();
        let ids = serde_json::json!([first.id().to_string(), second.id().to_string()]);

        let Response::Discovery(records) = trampoline.dispatch("discover", vec![Argument::Json(ids)]).unwrap() else {
            panic!("expected discovery");
        };
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["one", "two"]);
        assert_eq!(records["two"].signature, vec!["a", "b"]);

        let bad = serde_json::json!([first.id().to_string(), 7]);
        assert_eq!(
            trampoline.dispatch("discover", vec![Argument::Json(bad)]).unwrap(),
            Response::Discovery(DiscoveryMap::new())
        );
        assert_eq!(trampoline.last_error().unwrap().kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_traces_and_test_value_reach_crate_filter() {
        let config = BridgeConfig {
            debug: true,
            ..BridgeConfig::default()
        };
        let trampoline = Trampoline::new("test-impl", "0x0", Dialect::Script, config).unwrap();
        let logs = capture_logs("bridge_core=debug", || {
            trampoline.test(Some(&serde_json::json!({ "ping": 1 })));
        });
        assert!(logs.contains("operation=test"));
        assert!(logs.contains("return"));
        assert!(logs.contains(TEST_MESSAGE));
        assert!(logs.contains(r#"value={"ping":1}"#));
    }

    #[test]
    fn test_type_ids_funnel_through_discover() {
        let trampoline = trampoline(Dialect::Typed);
        let handle = trampoline
            .load_from_memory("t.ts", "export async function fetchCount(scale: number) { return scale; }", None)
            .unwrap();
        let ids = trampoline.type_ids(handle.id());
        assert_eq!(ids["fetchCount"].params, vec![Some(crate::discovery::BridgeType::Double)]);
        assert_eq!(ids["fetchCount"].ret, Some(crate::discovery::BridgeType::Future));
    }

    #[test]
    fn test_destroy_tears_down_typed_child() {
        let trampoline = trampoline(Dialect::Typed);
        assert!(trampoline
            .load_from_memory("t.ts", "export function id(x: number): number { return x; }", None)
            .is_some());
        assert!(trampoline.destroy());
        assert_eq!(trampoline.bridge().handle_count(), 0);
    }
}
