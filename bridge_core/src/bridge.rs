//! The bridge: loads guest sources into handles and answers discovery.

use crate::config::BridgeConfig;
use crate::discovery::{aggregate, classify_all, discover_namespace, BridgeType, DiscoveryMap, TypeIdMap, TypeRegistry};
use crate::error::{BridgeError, Result};
use crate::guest::{Dialect, Value};
use crate::handle::{Handle, HandleRef, HandleTable};
use crate::id::{BridgeId, HandleId};
use crate::loader::{IsolatedLoader, LoadedUnit, LoaderOptions, ModuleCache};
use crate::typecheck::Diagnostic;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One guest dialect's loader, handle table and child bridges.
#[derive(Debug)]
pub struct Bridge {
    pub(crate) id: BridgeId,
    pub(crate) config: BridgeConfig,
    pub(crate) loader: IsolatedLoader,
    pub(crate) handles: HandleTable,
    pub(crate) children: RwLock<IndexMap<BridgeId, Arc<Bridge>>>,
    types: RwLock<TypeRegistry>,
}

impl Bridge {
    pub fn new(dialect: Dialect, config: BridgeConfig) -> Self {
        let loader = IsolatedLoader::new(dialect, &config);
        Self::with_loader(config, loader)
    }

    /// Creates a bridge whose loader uses an injected module cache.
    pub fn with_cache(dialect: Dialect, config: BridgeConfig, cache: Arc<dyn ModuleCache>) -> Self {
        let loader = IsolatedLoader::with_cache(dialect, &config, cache);
        Self::with_loader(config, loader)
    }

    fn with_loader(config: BridgeConfig, loader: IsolatedLoader) -> Self {
        let bridge = Self {
            id: BridgeId::new(),
            config,
            loader,
            handles: HandleTable::new(),
            children: RwLock::new(IndexMap::new()),
            types: RwLock::new(TypeRegistry::new()),
        };
        debug!(bridge_id = %bridge.id, dialect = %bridge.dialect(), "Created bridge");
        bridge
    }

    pub fn id(&self) -> BridgeId {
        self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.loader.dialect()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ModuleCache> {
        self.loader.cache()
    }

    fn root(&self) -> PathBuf {
        self.config.root().unwrap_or_default()
    }

    /// Loads a batch of files into one new handle.
    pub fn load_from_file(&self, paths: &[PathBuf], options: Option<&LoaderOptions>) -> Result<HandleRef> {
        let options = options.cloned().unwrap_or_default();
        let units = self.loader.load_files(&self.root(), paths, &options)?;
        self.register(units)
    }

    /// Loads in-memory source into one new handle keyed by `name`.
    pub fn load_from_memory(&self, name: &str, source: &str, options: Option<&LoaderOptions>) -> Result<HandleRef> {
        let options = options.cloned().unwrap_or_default();
        let unit = self.loader.load_memory(&self.root(), name, source, &options)?;
        self.register(vec![unit])
    }

    pub fn load_from_package(&self, package: &str) -> Result<HandleRef> {
        let units = self.loader.load_package(package)?;
        self.register(units)
    }

    fn register(&self, units: Vec<LoadedUnit>) -> Result<HandleRef> {
        let per_unit: Vec<(String, DiscoveryMap)> = units
            .iter()
            .map(|unit| (unit.key.clone(), discover_namespace(&unit.namespace, unit.types.as_ref())))
            .collect();
        let discovery = match aggregate(
            per_unit.iter().map(|(key, set)| (key.as_str(), set)),
            self.config.collision_policy,
        ) {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!(bridge_id = %self.id, "Discarding load: {}", e);
                self.loader.release(units.iter().map(|unit| unit.module_id));
                return Err(e);
            }
        };

        let handle = Arc::new(Handle::new(self.dialect(), units));
        let handle_id = self.handles.insert(handle.clone(), discovery);
        info!(
            bridge_id = %self.id,
            handle_id = %handle_id,
            units = handle.units().len(),
            "Loaded handle"
        );
        Ok(handle)
    }

    /// Cached signature records of a handle. Unknown or cleared handles
    /// report nothing.
    pub fn discover(&self, handle_id: HandleId) -> DiscoveryMap {
        self.handles.discovery(handle_id).unwrap_or_default()
    }

    /// Union of several handles' records under the configured collision
    /// policy.
    pub fn discover_all(&self, handle_ids: &[HandleId]) -> Result<DiscoveryMap> {
        self.handles
            .discover_all(handle_ids, self.config.collision_policy)
    }

    /// Maps a type name, such as an interface, onto a bridge type id for
    /// [`Bridge::type_ids`]. Returns the previous mapping.
    pub fn register_type(&self, name: impl Into<String>, ty: BridgeType) -> Option<BridgeType> {
        self.types.write().register(name, ty)
    }

    /// Bridge type ids of a handle's typed records.
    pub fn type_ids(&self, handle_id: HandleId) -> TypeIdMap {
        classify_all(&self.discover(handle_id), &self.types.read())
    }

    pub fn handle(&self, handle_id: HandleId) -> Option<HandleRef> {
        self.handles.get(handle_id)
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Calls an exported function of a live handle.
    pub fn call(&self, handle_id: HandleId, name: &str, args: &[Value]) -> Result<Value> {
        let handle = self
            .handle(handle_id)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown handle {}", handle_id)))?;
        handle.call(name, args, self.config.max_call_depth)
    }

    /// Diagnostics of the most recent load.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.loader.diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::discovery::CollisionPolicy;
    use std::fs;
    use tempfile::tempdir;

    fn bridge_at(dialect: Dialect, root: &std::path::Path) -> Bridge {
        let config = BridgeConfig {
            execution_path: Some(root.to_path_buf()),
            ..BridgeConfig::default()
        };
        Bridge::new(dialect, config)
    }

    #[test]
    fn test_memory_load_and_call() {
        let bridge = Bridge::new(Dialect::Script, BridgeConfig::default());
        let handle = bridge
            .load_from_memory("m.js", "function add(left, right) { return left + right; }", None)
            .unwrap();
        let records = bridge.discover(handle.id());
        assert_eq!(records["add"].signature, vec!["left", "right"]);
        let sum = bridge
            .call(handle.id(), "add", &[Value::from(2.0), Value::from(3.0)])
            .unwrap();
        assert_eq!(sum.as_number(), Some(5.0));
    }

    #[test]
    fn test_batch_collision_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "export function run() {}").unwrap();
        fs::write(dir.path().join("b.js"), "export function run(x) {}").unwrap();

        let bridge = bridge_at(Dialect::Script, dir.path());
        let paths = [PathBuf::from("a.js"), PathBuf::from("b.js")];
        let err = bridge.load_from_file(&paths, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolCollision);
        assert_eq!(bridge.handle_count(), 0);
        assert_eq!(bridge.loader.module_count(), 0);

        let config = BridgeConfig {
            execution_path: Some(dir.path().to_path_buf()),
            collision_policy: CollisionPolicy::LastWins,
            ..BridgeConfig::default()
        };
        let lenient = Bridge::new(Dialect::Script, config);
        let handle = lenient.load_from_file(&paths, None).unwrap();
        assert_eq!(lenient.discover(handle.id())["run"].signature, vec!["x"]);
    }

    #[test]
    fn test_package_loads_not_implemented() {
        let bridge = Bridge::new(Dialect::Script, BridgeConfig::default());
        let err = bridge.load_from_package("left-pad").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
    }

    #[test]
    fn test_type_ids_use_registered_names() {
        let bridge = Bridge::new(Dialect::Typed, BridgeConfig::default());
        let handle = bridge
            .load_from_memory(
                "shapes.ts",
                "interface Point { x: number; y: number }\n\
                 export function shift(p: Point, dx: number): Point { return { x: p.x + dx, y: p.y }; }",
                None,
            )
            .unwrap();
        let before = bridge.type_ids(handle.id());
        assert_eq!(before["shift"].params, vec![None, Some(BridgeType::Double)]);

        assert_eq!(bridge.register_type("Point", BridgeType::Map), None);
        let after = bridge.type_ids(handle.id());
        assert_eq!(after["shift"].params[0], Some(BridgeType::Map));
        assert_eq!(after["shift"].ret, Some(BridgeType::Map));

        let script = Bridge::new(Dialect::Script, BridgeConfig::default());
        let handle = script
            .load_from_memory("m.js", "export function f(a) { return a; }", None)
            .unwrap();
        assert!(script.type_ids(handle.id()).is_empty());
    }
}
