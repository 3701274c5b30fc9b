use bridge_core::trampoline::{self, TEST_MESSAGE};
use bridge_core::{
    Bridge, BridgeConfig, BridgeError, CollisionPolicy, Dialect, ErrorKind, InMemoryModuleCache,
    LoaderOptions, ModuleCache, Response, SignatureRecord, Trampoline, Value,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("bridge_core=debug,guest=debug"))
        .with_test_writer()
        .with_target(true)
        .try_init();
}

fn config_at(root: &Path) -> BridgeConfig {
    BridgeConfig {
        execution_path: Some(root.to_path_buf()),
        ..BridgeConfig::default()
    }
}

fn script_bridge() -> Bridge {
    Bridge::new(Dialect::Script, BridgeConfig::default())
}

#[test]
fn test_round_trip_parameter_names() {
    init_test_logging();
    let bridge = script_bridge();
    let handle = bridge
        .load_from_memory("m", "export function f(a, b) { return [a, b]; }", None)
        .unwrap();
    let records = bridge.discover(handle.id());
    assert_eq!(records["f"].signature, vec!["a", "b"]);
    assert!(records["f"].types.is_empty());
    assert_eq!(records["f"].ret, None);
}

#[test]
fn test_add_scenario() {
    init_test_logging();
    let bridge = script_bridge();
    let handle = bridge
        .load_from_memory("add", "function add(left, right) { return left + right; }", None)
        .unwrap();
    assert_eq!(
        bridge.discover(handle.id())["add"],
        SignatureRecord {
            signature: vec!["left".into(), "right".into()],
            types: vec![],
            ret: None,
            is_async: false,
        }
    );
    let result = bridge
        .call(handle.id(), "add", &[Value::from(2.0), Value::from(3.0)])
        .unwrap();
    assert_eq!(result.as_number(), Some(5.0));
}

#[test]
fn test_declarations_publish_only_without_exports() {
    let bridge = script_bridge();
    let explicit = bridge
        .load_from_memory("e", "function helper() {}\nexport function run() { return helper(); }", None)
        .unwrap();
    let names: Vec<_> = bridge.discover(explicit.id()).keys().cloned().collect();
    assert_eq!(names, vec!["run"]);

    let commonjs = bridge
        .load_from_memory("c", "function helper() {}\nexports.run = function run(a) { return a; };", None)
        .unwrap();
    let names: Vec<_> = bridge.discover(commonjs.id()).keys().cloned().collect();
    assert_eq!(names, vec!["run"]);
}

#[test]
fn test_deeply_nested_source_is_a_diagnostic() {
    let trampoline = Trampoline::new("nesting", "0x0", Dialect::Script, BridgeConfig::default()).unwrap();
    let chain = format!("export const v = 1{};", " + 1".repeat(5000));
    assert!(trampoline.load_from_memory("chain", &chain, None).is_none());
    assert_eq!(trampoline.last_error().unwrap().kind, ErrorKind::CompileDiagnostic);
    assert!(trampoline
        .diagnostics()
        .iter()
        .any(|d| d.message == "Expression nested too deeply."));

    let parens = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
    assert!(trampoline.load_from_memory("deep", &parens, None).is_none());

    let shallow = format!("export const v = 1{};", " + 1".repeat(100));
    let handle = trampoline.load_from_memory("shallow", &shallow, None).unwrap();
    assert_eq!(handle.export("v").map(|e| e.to_value().as_number()), Some(Some(101.0)));
}

#[test]
fn test_synthesized_parameter_names() {
    let bridge = script_bridge();
    let handle = bridge
        .load_from_memory("g", "export function g({ x }, y) { return x + y; }", None)
        .unwrap();
    assert_eq!(bridge.discover(handle.id())["g"].signature, vec!["arg0", "y"]);
}

#[test]
fn test_idempotent_clear_and_cache_consistency() {
    let bridge = script_bridge();
    let handle = bridge
        .load_from_memory("m", "export function f(a) { return a; }", None)
        .unwrap();
    let other = bridge
        .load_from_memory("n", "export function h() {}", None)
        .unwrap();

    bridge.clear(handle.id());
    let after_once = (bridge.handle_count(), bridge.discover(other.id()));
    bridge.clear(handle.id());
    let after_twice = (bridge.handle_count(), bridge.discover(other.id()));

    assert_eq!(after_once, after_twice);
    assert!(bridge.discover(handle.id()).is_empty());
    assert!(bridge.handle(handle.id()).is_none());
    assert_eq!(bridge.handle_count(), 1);
}

#[test]
fn test_memory_loads_are_isolated() {
    let bridge = script_bridge();
    let source = "let counter = 0;\nexport function bump() { counter += 1; return counter; }";
    let first = bridge.load_from_memory("counter", source, None).unwrap();
    let second = bridge.load_from_memory("counter", source, None).unwrap();
    assert_ne!(first.id(), second.id());

    for _ in 0..3 {
        bridge.call(first.id(), "bump", &[]).unwrap();
    }
    let second_count = bridge.call(second.id(), "bump", &[]).unwrap();
    assert_eq!(second_count.as_number(), Some(1.0));

    let shadow = bridge
        .load_from_memory("shadow", "let counter = 100;\nexport function peek() { return counter; }", None)
        .unwrap();
    let peeked = bridge.call(shadow.id(), "peek", &[]).unwrap();
    assert_eq!(peeked.as_number(), Some(100.0));
    let first_count = bridge.call(first.id(), "bump", &[]).unwrap();
    assert_eq!(first_count.as_number(), Some(4.0));
}

#[test]
fn test_same_name_loads_do_not_alias() {
    let bridge = script_bridge();
    let first = bridge
        .load_from_memory("same", "export const state = { n: 1 };", None)
        .unwrap();
    let second = bridge
        .load_from_memory("same", "export const state = { n: 1 };", None)
        .unwrap();
    let first_state = first.export("state").map(|e| e.to_value()).unwrap();
    let second_state = second.export("state").map(|e| e.to_value()).unwrap();
    if let Some(props) = first_state.as_object() {
        props.write().insert("n".into(), Value::from(2.0));
    }
    let n = second_state
        .as_object()
        .and_then(|props| props.read().get("n").and_then(Value::as_number));
    assert_eq!(n, Some(1.0));

    bridge.clear(first.id());
    assert!(bridge.handle(second.id()).is_some());
}

#[test]
fn test_nonexistent_file_creates_no_handle() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let trampoline = Trampoline::new("script", "0x1", Dialect::Script, config_at(dir.path())).unwrap();
    let handle = trampoline.load_from_file(&[PathBuf::from("does/not/exist.js")], None);
    assert!(handle.is_none());
    assert_eq!(trampoline.bridge().handle_count(), 0);
    assert_eq!(trampoline.last_error().unwrap().kind, ErrorKind::ModuleNotFound);
}

#[test]
fn test_file_batch_with_nested_requires() {
    let dir = tempdir().unwrap();
    let vendor = dir.path().join("vendor");
    fs::create_dir_all(dir.path().join("guest_modules")).unwrap();
    fs::create_dir_all(&vendor).unwrap();
    fs::write(
        dir.path().join("guest_modules/strings.js"),
        "exports.shout = function (s) { return s.toUpperCase(); };",
    )
    .unwrap();
    fs::write(vendor.join("numbers.js"), "exports.double = function (n) { return n * 2; };").unwrap();
    fs::write(
        dir.path().join("api.js"),
        "const strings = require('strings');\nconst numbers = require('numbers');\n\
         export function greet(name) { return strings.shout('hi ' + name); }\n\
         export function twice(n) { return numbers.double(n); }",
    )
    .unwrap();
    fs::write(dir.path().join("extra.js"), "export async function later(ms) { return ms; }").unwrap();

    let cache = Arc::new(InMemoryModuleCache::new());
    let bridge = Bridge::with_cache(Dialect::Script, config_at(dir.path()), cache.clone());
    let options = LoaderOptions::new().append(&vendor);
    let handle = bridge
        .load_from_file(&[PathBuf::from("api"), PathBuf::from("extra.js")], Some(&options))
        .unwrap();

    assert_eq!(handle.units().keys().collect::<Vec<_>>(), vec!["api", "extra.js"]);
    let records = bridge.discover(handle.id());
    assert_eq!(records.keys().collect::<Vec<_>>(), vec!["greet", "twice", "later"]);
    assert!(records["later"].is_async);
    let greeting = bridge.call(handle.id(), "greet", &[Value::from("bob")]).unwrap();
    assert_eq!(greeting.as_str(), Some("HI BOB"));
    let later = bridge.call(handle.id(), "later", &[Value::from(5.0)]).unwrap();
    assert_eq!(later.as_number(), Some(5.0));
    assert_eq!(cache.len(), 4);

    bridge.clear(handle.id());
    assert!(cache.is_empty());
}

#[test]
fn test_typed_discovery_reports_types() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("math.ts"),
        "export function scale(x: number, factor: number): number { return x * factor; }\n\
         export async function fetchCount(name: string) { return name.length; }\n\
         export function pick(x: number): number;\n\
         export function pick(x: string): string;\n\
         export function pick(x: any): any { return x; }\n\
         export function tag({ id }: { id: number }, label?: string): string { return 'tag' + id; }",
    )
    .unwrap();

    let bridge = Bridge::new(Dialect::Typed, config_at(dir.path()));
    let handle = bridge.load_from_file(&[PathBuf::from("math")], None).unwrap();
    let records = bridge.discover(handle.id());

    assert_eq!(records["scale"].signature, vec!["x", "factor"]);
    assert_eq!(records["scale"].types, vec!["number", "number"]);
    assert_eq!(records["scale"].ret.as_deref(), Some("number"));
    assert!(!records["scale"].is_async);

    assert!(records["fetchCount"].is_async);
    assert_eq!(records["fetchCount"].ret.as_deref(), Some("Promise<number>"));

    assert_eq!(records["pick"].types, vec!["number"]);
    assert_eq!(records["pick"].ret.as_deref(), Some("number"));

    assert_eq!(records["tag"].signature, vec!["arg0", "label"]);

    let scaled = bridge
        .call(handle.id(), "scale", &[Value::from(3.0), Value::from(4.0)])
        .unwrap();
    assert_eq!(scaled.as_number(), Some(12.0));
}

#[test]
fn test_typed_compile_errors_are_diagnostics() {
    let dir = tempdir().unwrap();
    let bridge = Bridge::new(Dialect::Typed, config_at(dir.path()));
    let err = bridge
        .load_from_memory("bad.ts", "export function f(a: number) { return a; }\nf('x');", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CompileDiagnostic);
    assert_eq!(bridge.diagnostics()[0].code, 2345);
    assert_eq!(bridge.handle_count(), 0);
    let rendered = bridge_core::format_diagnostics(&bridge.diagnostics());
    assert!(rendered.contains("bad.ts"));
}

#[test]
fn test_project_config_only_used_when_valid() {
    let source = "export function loose(x) { return x; }";

    let strict = tempdir().unwrap();
    fs::write(strict.path().join("tsconfig.json"), r#"{ "compilerOptions": { "strict": true } }"#).unwrap();
    fs::write(strict.path().join("loose.ts"), source).unwrap();
    let bridge = Bridge::new(Dialect::Typed, config_at(strict.path()));
    let err = bridge.load_from_file(&[PathBuf::from("loose.ts")], None).unwrap_err();
    assert!(err.diagnostics().iter().any(|d| d.code == 7006));

    let broken = tempdir().unwrap();
    fs::write(broken.path().join("tsconfig.json"), r#"{ "compilerOptions": { "strict": true "#).unwrap();
    fs::write(broken.path().join("loose.ts"), source).unwrap();
    let bridge = Bridge::new(Dialect::Typed, config_at(broken.path()));
    let handle = bridge.load_from_file(&[PathBuf::from("loose.ts")], None).unwrap();
    assert_eq!(bridge.discover(handle.id())["loose"].types, vec!["any"]);
}

#[test]
fn test_declaration_file_is_discovery_failure() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("types.d.ts"), "export declare function ping(host: string): boolean;").unwrap();
    let bridge = Bridge::new(Dialect::Typed, config_at(dir.path()));
    let err = bridge.load_from_file(&[PathBuf::from("types.d.ts")], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiscoveryFailure);
    assert_eq!(bridge.handle_count(), 0);
}

#[test]
fn test_package_loads_are_explicitly_unimplemented() {
    let trampoline = Trampoline::new("script", "0x2", Dialect::Script, BridgeConfig::default()).unwrap();
    assert!(trampoline.load_from_package("some-package").is_none());
    assert_eq!(trampoline.last_error().unwrap().kind, ErrorKind::NotImplemented);
}

#[test]
fn test_aggregated_discovery_policies() {
    let bridge = script_bridge();
    let first = bridge.load_from_memory("one", "export function run(a) {}", None).unwrap();
    let second = bridge.load_from_memory("two", "export function run(b, c) {}", None).unwrap();
    let err = bridge.discover_all(&[first.id(), second.id()]).unwrap_err();
    assert!(matches!(err, BridgeError::SymbolCollision { ref name, .. } if name == "run"));

    let lenient = Bridge::new(
        Dialect::Script,
        BridgeConfig {
            collision_policy: CollisionPolicy::LastWins,
            ..BridgeConfig::default()
        },
    );
    let first = lenient.load_from_memory("one", "export function run(a) {}", None).unwrap();
    let second = lenient.load_from_memory("two", "export function run(b, c) {}", None).unwrap();
    let merged = lenient.discover_all(&[first.id(), second.id()]).unwrap();
    assert_eq!(merged["run"].signature, vec!["b", "c"]);
}

#[test]
fn test_destroy_cascades_to_typed_child() {
    let trampoline = Trampoline::new("typed", "0x3", Dialect::Typed, BridgeConfig::default()).unwrap();
    let typed = trampoline.bridge().clone();
    assert_eq!(typed.dialect(), Dialect::Typed);
    trampoline
        .load_from_memory("t.ts", "export function id(x: number): number { return x; }", None)
        .unwrap();
    assert_eq!(typed.handle_count(), 1);

    assert!(trampoline.destroy());
    assert_eq!(typed.handle_count(), 0);
}

#[test]
fn test_process_trampoline_registration() {
    init_test_logging();
    let before = trampoline::dispatch("test", vec![]).unwrap_err();
    assert_eq!(before.kind(), ErrorKind::NotRegistered);

    let registered = trampoline::register("script", "0xfeed", Dialect::Script, BridgeConfig::default()).unwrap();
    assert_eq!(registered.implementation(), "script");
    assert_eq!(registered.target(), "0xfeed");

    let again = trampoline::register("other", "0x0", Dialect::Typed, BridgeConfig::default()).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::AlreadyRegistered);

    assert_eq!(
        trampoline::dispatch("test", vec![]).unwrap(),
        Response::Text(TEST_MESSAGE.to_string())
    );
    assert!(matches!(
        trampoline::dispatch("destroy", vec![]).unwrap(),
        Response::Bool(true)
    ));
}
