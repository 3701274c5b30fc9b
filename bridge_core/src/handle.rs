//! Loaded handles and the table that owns them.

use crate::discovery::{aggregate, CollisionPolicy, DiscoveryMap};
use crate::error::{BridgeError, Result};
use crate::guest::{Dialect, Value};
use crate::id::{HandleId, ModuleId};
use crate::loader::{Export, LoadedUnit, ModuleNamespace};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// One loaded unit inside a handle.
#[derive(Debug, Clone)]
pub struct HandleUnit {
    pub location: PathBuf,
    pub module_id: ModuleId,
    pub namespace: ModuleNamespace,
}

/// The namespaces produced by one load.
#[derive(Debug)]
pub struct Handle {
    id: HandleId,
    dialect: Dialect,
    loaded_at: DateTime<Utc>,
    units: IndexMap<String, HandleUnit>,
    module_ids: Vec<ModuleId>,
}

pub type HandleRef = Arc<Handle>;

impl Handle {
    pub fn new(dialect: Dialect, loaded: Vec<LoadedUnit>) -> Self {
        let module_ids = loaded.iter().map(|unit| unit.module_id).collect();
        let units = loaded
            .into_iter()
            .map(|unit| {
                (
                    unit.key,
                    HandleUnit {
                        location: unit.location,
                        module_id: unit.module_id,
                        namespace: unit.namespace,
                    },
                )
            })
            .collect();
        Self {
            id: HandleId::new(),
            dialect,
            loaded_at: Utc::now(),
            units,
            module_ids,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Units keyed by requested path or memory name, in load order.
    pub fn units(&self) -> &IndexMap<String, HandleUnit> {
        &self.units
    }

    pub fn unit(&self, key: &str) -> Option<&HandleUnit> {
        self.units.get(key)
    }

    /// Module records owned by this handle.
    pub fn module_ids(&self) -> &[ModuleId] {
        &self.module_ids
    }

    /// Looks an export up across all units, first unit first.
    pub fn export(&self, name: &str) -> Option<&Export> {
        self.units.values().find_map(|unit| unit.namespace.get(name))
    }

    /// Calls an exported function.
    pub fn call(&self, name: &str, args: &[Value], max_depth: usize) -> Result<Value> {
        let unit = self
            .units
            .values()
            .find(|unit| matches!(unit.namespace.get(name), Some(Export::Callable(_))))
            .ok_or_else(|| {
                BridgeError::InvalidArgument(format!("handle {} exports no function '{}'", self.id, name))
            })?;
        unit.namespace.call(name, args, max_depth)
    }
}

#[derive(Debug)]
struct HandleEntry {
    handle: HandleRef,
    discovery: DiscoveryMap,
}

/// Live handles with their cached discovery. A handle and its discovery
/// are inserted and removed together.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: RwLock<HashMap<HandleId, HandleEntry>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: HandleRef, discovery: DiscoveryMap) -> HandleId {
        let id = handle.id();
        debug!(handle_id = %id, symbols = discovery.len(), "Registering handle");
        self.entries.write().insert(id, HandleEntry { handle, discovery });
        id
    }

    pub fn get(&self, id: HandleId) -> Option<HandleRef> {
        self.entries.read().get(&id).map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Cached discovery of one handle.
    pub fn discovery(&self, id: HandleId) -> Option<DiscoveryMap> {
        self.entries.read().get(&id).map(|entry| entry.discovery.clone())
    }

    /// Union of the discovery of several handles, in the given order.
    /// Unknown handles contribute nothing.
    pub fn discover_all(&self, ids: &[HandleId], policy: CollisionPolicy) -> Result<DiscoveryMap> {
        let entries = self.entries.read();
        let origins: Vec<(String, &DiscoveryMap)> = ids
            .iter()
            .filter_map(|id| entries.get(id).map(|entry| (id.to_string(), &entry.discovery)))
            .collect();
        aggregate(
            origins.iter().map(|(origin, set)| (origin.as_str(), *set)),
            policy,
        )
    }

    pub fn remove(&self, id: HandleId) -> Option<HandleRef> {
        self.entries.write().remove(&id).map(|entry| entry.handle)
    }

    /// Removes every handle, returning them.
    pub fn drain(&self) -> Vec<HandleRef> {
        self.entries
            .write()
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{discover_namespace, SignatureRecord};
    use crate::error::ErrorKind;
    use crate::guest::builtins::native;

    fn handle_exporting(name: &'static str) -> HandleRef {
        let namespace = ModuleNamespace::from_exports(&native(name, &["x"], |_, args| {
            Ok(args.first().cloned().unwrap_or_default())
        }));
        Arc::new(Handle::new(
            Dialect::Script,
            vec![LoadedUnit {
                key: format!("{}.js", name),
                location: PathBuf::from(format!("/srv/{}.js", name)),
                module_id: ModuleId::new(),
                namespace,
                types: None,
            }],
        ))
    }

    fn register(table: &HandleTable, handle: &HandleRef) -> HandleId {
        let unit = handle.units().values().next().unwrap();
        table.insert(handle.clone(), discover_namespace(&unit.namespace, None))
    }

    #[test]
    fn test_insert_discover_remove() {
        let table = HandleTable::new();
        let handle = handle_exporting("echo");
        let id = register(&table, &handle);

        assert!(table.contains(id));
        let discovery = table.discovery(id).unwrap();
        assert_eq!(
            discovery["echo"],
            SignatureRecord {
                signature: vec!["x".into()],
                types: vec![],
                ret: None,
                is_async: false,
            }
        );
        let echoed = table.get(id).unwrap().call("echo", &[Value::from("hi")], 10).unwrap();
        assert_eq!(echoed.as_str(), Some("hi"));

        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.discovery(id).is_none());
    }

    #[test]
    fn test_discover_all_collisions() {
        let table = HandleTable::new();
        let first = register(&table, &handle_exporting("same"));
        let second = register(&table, &handle_exporting("same"));
        let other = register(&table, &handle_exporting("other"));

        let err = table
            .discover_all(&[first, second], CollisionPolicy::Reject)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolCollision);

        let merged = table
            .discover_all(&[first, other, HandleId::new()], CollisionPolicy::Reject)
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(table.drain().len(), 3);
        assert!(table.is_empty());
    }
}
