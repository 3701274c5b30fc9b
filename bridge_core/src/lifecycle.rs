//! Clearing handles, tearing bridges down, and the child bridge tree.

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::guest::Dialect;
use crate::id::{BridgeId, HandleId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reported by [`Bridge::execution_path`] when no root is known.
pub const NO_EXECUTION_PATH: &str = "";

impl Bridge {
    /// Forgets a handle: its module records and owned cache entries, then
    /// its namespaces and discovery together. Clearing an unknown handle
    /// does nothing.
    pub fn clear(&self, handle_id: HandleId) {
        let Some(handle) = self.handles.remove(handle_id) else {
            debug!(handle_id = %handle_id, "Clear of unknown handle ignored");
            return;
        };
        let released = self.loader.release(handle.module_ids().iter().copied());
        info!(handle_id = %handle_id, modules = released, "Cleared handle");
    }

    /// The module resolution root, or [`NO_EXECUTION_PATH`].
    pub fn execution_path(&self) -> String {
        self.config
            .root()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| NO_EXECUTION_PATH.to_string())
    }

    /// Creates a bridge owned by this one, sharing its configuration.
    pub fn spawn_child(&self, dialect: Dialect) -> Arc<Bridge> {
        let child = Arc::new(Bridge::new(dialect, self.config.clone()));
        self.attach_child(child.clone());
        child
    }

    pub fn attach_child(&self, child: Arc<Bridge>) {
        debug!(parent = %self.id, child = %child.id(), "Attached child bridge");
        self.children.write().insert(child.id(), child);
    }

    /// Unlinks a child without tearing it down.
    pub fn detach_child(&self, child_id: BridgeId) -> Option<Arc<Bridge>> {
        self.children.write().shift_remove(&child_id)
    }

    pub fn children(&self) -> Vec<Arc<Bridge>> {
        self.children.read().values().cloned().collect()
    }

    /// Tears every child down through `teardown`, detaches them, then
    /// releases this bridge's handles, module cache and module tree.
    /// Returns whether every child reported a clean teardown.
    pub fn destroy_with<F>(&self, mut teardown: F) -> bool
    where
        F: FnMut(&Bridge) -> bool,
    {
        let children = self.children();
        let mut clean = true;
        for child in &children {
            if !teardown(child.as_ref()) {
                warn!(parent = %self.id, child = %child.id(), "Child bridge did not tear down cleanly");
                clean = false;
            }
            self.detach_child(child.id());
        }

        let handles = self.handles.drain();
        self.loader.reset();
        info!(
            bridge_id = %self.id,
            children = children.len(),
            handles = handles.len(),
            clean,
            "Destroyed bridge"
        );
        clean
    }

    /// Destroys children recursively, then this bridge.
    pub fn destroy(&self) -> bool {
        self.destroy_with(|child| child.destroy())
    }
}

/// A dynamic host bridge owning a typed child, the layout used when the
/// typed dialect is served.
pub fn host_with_typed_child(config: BridgeConfig) -> (Arc<Bridge>, Arc<Bridge>) {
    let host = Arc::new(Bridge::new(Dialect::Script, config));
    let typed = host.spawn_child(Dialect::Typed);
    (host, typed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::loader::{InMemoryModuleCache, ModuleCache};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_clear_is_idempotent() {
        let bridge = Bridge::new(Dialect::Script, BridgeConfig::default());
        let handle = bridge
            .load_from_memory("m.js", "export function f(a, b) { return a; }", None)
            .unwrap();
        assert_eq!(bridge.discover(handle.id()).len(), 1);

        bridge.clear(handle.id());
        assert!(bridge.discover(handle.id()).is_empty());
        bridge.clear(handle.id());
        bridge.clear(HandleId::new());
        assert_eq!(bridge.handle_count(), 0);
    }

    #[test]
    fn test_clear_evicts_injected_cache() {
        init_test_logging();
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "const dep = require('./dep');\nexport const v = dep.v;").unwrap();
        fs::write(dir.path().join("dep.js"), "exports.v = 7;").unwrap();

        let cache = Arc::new(InMemoryModuleCache::new());
        let config = BridgeConfig {
            execution_path: Some(dir.path().to_path_buf()),
            ..BridgeConfig::default()
        };
        let bridge = Bridge::with_cache(Dialect::Script, config, cache.clone());
        let handle = bridge.load_from_file(&[PathBuf::from("main.js")], None).unwrap();
        assert_eq!(cache.len(), 2);

        bridge.clear(handle.id());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_destroy_reaches_children_first() {
        let (host, typed) = host_with_typed_child(BridgeConfig::default());
        typed
            .load_from_memory("t.ts", "export function id(x: number): number { return x; }", None)
            .unwrap();
        assert_eq!(host.children().len(), 1);

        let mut torn_down = Vec::new();
        let clean = host.destroy_with(|child| {
            torn_down.push(child.id());
            child.destroy()
        });
        assert!(clean);
        assert_eq!(torn_down, vec![typed.id()]);
        assert!(host.children().is_empty());
        assert_eq!(typed.handle_count(), 0);
    }

    #[test]
    fn test_destroy_reports_unclean_child() {
        let host = Bridge::new(Dialect::Script, BridgeConfig::default());
        host.spawn_child(Dialect::Typed);
        assert!(!host.destroy_with(|_| false));
        assert!(host.children().is_empty());
    }

    #[test]
    fn test_execution_path_uses_config() {
        let config = BridgeConfig {
            execution_path: Some(PathBuf::from("/srv/guest")),
            ..BridgeConfig::default()
        };
        assert_eq!(Bridge::new(Dialect::Script, config).execution_path(), "/srv/guest");
    }
}
