//! Ownership tree of evaluated module records.

use crate::guest::Value;
use crate::id::ModuleId;
use std::collections::HashMap;
use std::path::PathBuf;

/// One evaluated unit of guest source.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub filename: PathBuf,
    /// Private resolution path list for bare specifiers.
    pub paths: Vec<PathBuf>,
    /// The guest `module` object.
    pub module: Value,
    /// Whether the record lives in the module cache under `filename`.
    pub cached: bool,
    pub parent: Option<ModuleId>,
    pub children: Vec<ModuleId>,
}

impl ModuleRecord {
    pub fn new(filename: PathBuf, paths: Vec<PathBuf>, module: Value) -> Self {
        Self {
            id: ModuleId::new(),
            filename,
            paths,
            module,
            cached: false,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Records keyed by id with explicit parent/child links. The root record
/// belongs to the bridge and is never removed.
#[derive(Debug)]
pub struct ModuleTree {
    root: ModuleId,
    records: HashMap<ModuleId, ModuleRecord>,
}

impl ModuleTree {
    pub fn new(root_filename: PathBuf) -> Self {
        let root = ModuleRecord::new(root_filename, Vec::new(), Value::Undefined);
        let root_id = root.id;
        let mut records = HashMap::new();
        records.insert(root_id, root);
        Self {
            root: root_id,
            records,
        }
    }

    pub fn root(&self) -> ModuleId {
        self.root
    }

    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.records.get(&id)
    }

    /// Number of records besides the root.
    pub fn len(&self) -> usize {
        self.records.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a record under `parent`.
    pub fn insert(&mut self, mut record: ModuleRecord, parent: Option<ModuleId>) -> ModuleId {
        let id = record.id;
        record.parent = None;
        self.records.insert(id, record);
        if let Some(parent) = parent {
            self.attach(id, parent);
        }
        id
    }

    pub fn attach(&mut self, child: ModuleId, parent: ModuleId) -> bool {
        if child == parent || !self.records.contains_key(&child) {
            return false;
        }
        let Some(parent_record) = self.records.get_mut(&parent) else {
            return false;
        };
        if !parent_record.children.contains(&child) {
            parent_record.children.push(child);
        }
        if let Some(record) = self.records.get_mut(&child) {
            record.parent = Some(parent);
        }
        true
    }

    /// Unlinks a record from its parent. The record and its own children
    /// stay in the tree.
    pub fn detach(&mut self, id: ModuleId) -> bool {
        let Some(parent) = self.records.get_mut(&id).and_then(|r| r.parent.take()) else {
            return false;
        };
        if let Some(parent) = self.records.get_mut(&parent) {
            parent.children.retain(|child| *child != id);
        }
        true
    }

    /// `id` followed by all of its descendants.
    pub fn subtree(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(record) = self.records.get(&current) else {
                continue;
            };
            if found.contains(&current) {
                continue;
            }
            found.push(current);
            stack.extend(record.children.iter().rev().copied());
        }
        found
    }

    /// Detaches and removes `id` with its descendants.
    pub fn remove_subtree(&mut self, id: ModuleId) -> Vec<ModuleRecord> {
        if id == self.root {
            return Vec::new();
        }
        self.detach(id);
        self.subtree(id)
            .into_iter()
            .filter_map(|member| self.records.remove(&member))
            .collect()
    }

    /// Drops every record except the root.
    pub fn clear(&mut self) {
        let root = self.root;
        self.records.retain(|id, _| *id == root);
        if let Some(root) = self.records.get_mut(&root) {
            root.children.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> ModuleRecord {
        ModuleRecord::new(PathBuf::from(name), Vec::new(), Value::Undefined)
    }

    #[test]
    fn test_attach_and_detach() {
        let mut tree = ModuleTree::new(PathBuf::from("/root"));
        let root = tree.root();
        let top = tree.insert(record("/a.js"), Some(root));
        let nested = tree.insert(record("/b.js"), Some(top));
        assert_eq!(tree.get(root).unwrap().children, vec![top]);
        assert_eq!(tree.subtree(top), vec![top, nested]);

        assert!(tree.detach(top));
        assert!(!tree.detach(top));
        assert!(tree.get(root).unwrap().children.is_empty());
        assert_eq!(tree.get(nested).unwrap().parent, Some(top));
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = ModuleTree::new(PathBuf::from("/root"));
        let top = tree.insert(record("/a.js"), None);
        tree.insert(record("/b.js"), Some(top));
        let other = tree.insert(record("/c.js"), None);

        let removed = tree.remove_subtree(top);
        assert_eq!(removed.len(), 2);
        assert_eq!(tree.len(), 1);
        assert!(tree.get(other).is_some());
        assert!(tree.remove_subtree(tree.root()).is_empty());

        tree.clear();
        assert!(tree.is_empty());
    }
}
