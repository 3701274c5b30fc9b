//! Module cache keyed by resolved location.

use crate::guest::Value;
use crate::id::ModuleId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// An evaluated (or evaluating) module. `module` is the guest `module`
/// object, so a cyclic `require` sees whatever `module.exports` holds at
/// that moment.
#[derive(Debug, Clone)]
pub struct CachedModule {
    pub id: ModuleId,
    pub module: Value,
}

impl CachedModule {
    pub fn exports(&self) -> Value {
        match &self.module {
            Value::Object(props) => props.read().get("exports").cloned().unwrap_or_default(),
            _ => Value::Undefined,
        }
    }
}

/// Cache of evaluated modules. The bridge only mutates it through this
/// trait, so tests can observe evictions with their own implementation.
pub trait ModuleCache: Send + Sync + fmt::Debug {
    fn get(&self, location: &Path) -> Option<CachedModule>;

    fn insert(&self, location: PathBuf, module: CachedModule);

    /// Removes `location`, returning whether it was cached.
    fn evict(&self, location: &Path) -> bool;

    fn locations(&self) -> Vec<PathBuf>;

    fn clear(&self);

    fn contains(&self, location: &Path) -> bool {
        self.get(location).is_some()
    }

    fn len(&self) -> usize {
        self.locations().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryModuleCache {
    entries: RwLock<HashMap<PathBuf, CachedModule>>,
}

impl InMemoryModuleCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModuleCache for InMemoryModuleCache {
    fn get(&self, location: &Path) -> Option<CachedModule> {
        self.entries.read().get(location).cloned()
    }

    fn insert(&self, location: PathBuf, module: CachedModule) {
        self.entries.write().insert(location, module);
    }

    fn evict(&self, location: &Path) -> bool {
        self.entries.write().remove(location).is_some()
    }

    fn locations(&self) -> Vec<PathBuf> {
        self.entries.read().keys().cloned().collect()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn module_with_exports(exports: Value) -> Value {
        let mut props = IndexMap::new();
        props.insert("exports".to_string(), exports);
        Value::object(props)
    }

    #[test]
    fn test_insert_get_evict() {
        let cache = InMemoryModuleCache::new();
        let location = PathBuf::from("/srv/a.js");
        cache.insert(
            location.clone(),
            CachedModule {
                id: ModuleId::new(),
                module: module_with_exports(Value::from(1.0)),
            },
        );
        assert!(cache.contains(&location));
        assert_eq!(cache.get(&location).unwrap().exports().as_number(), Some(1.0));
        assert!(cache.evict(&location));
        assert!(!cache.evict(&location));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_exports_reflect_later_writes() {
        let cache = InMemoryModuleCache::new();
        let module = module_with_exports(Value::empty_object());
        cache.insert(
            PathBuf::from("/srv/b.js"),
            CachedModule {
                id: ModuleId::new(),
                module: module.clone(),
            },
        );
        if let Value::Object(props) = &module {
            props.write().insert("exports".to_string(), Value::from("replaced"));
        }
        let cached = cache.get(Path::new("/srv/b.js")).unwrap();
        assert_eq!(cached.exports().as_str(), Some("replaced"));
    }
}
