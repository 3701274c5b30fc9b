use super::interpreter::Exception;
use super::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type ScopeRef = Arc<Scope>;

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

/// A lexical scope. Each module gets a fresh global scope with no parent,
/// so nothing declared by one load is visible to another.
#[derive(Debug, Default)]
pub struct Scope {
    bindings: RwLock<HashMap<String, Binding>>,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub fn global() -> ScopeRef {
        Arc::new(Scope::default())
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Arc::new(Scope {
            bindings: RwLock::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    /// Declares (or redeclares) a binding in this scope.
    pub fn declare(&self, name: impl Into<String>, value: Value, mutable: bool) {
        self.bindings
            .write()
            .insert(name.into(), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.bindings.read().get(name) {
            return Some(binding.value.clone());
        }
        let mut current = self.parent.clone();
        while let Some(scope) = current {
            if let Some(binding) = scope.bindings.read().get(name) {
                return Some(binding.value.clone());
            }
            current = scope.parent.clone();
        }
        None
    }

    pub fn has(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Updates the nearest binding named `name`.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), Exception> {
        {
            let mut bindings = self.bindings.write();
            if let Some(binding) = bindings.get_mut(name) {
                if !binding.mutable {
                    return Err(Exception::type_error("Assignment to constant variable."));
                }
                binding.value = value;
                return Ok(());
            }
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(Exception::reference_error(format!("{} is not defined", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_scope_shadows_and_assigns_through() {
        let global = Scope::global();
        global.declare("a", Value::Number(1.0), true);
        let child = Scope::child(&global);
        child.declare("b", Value::Number(2.0), false);

        child.assign("a", Value::Number(3.0)).unwrap();
        assert_eq!(global.lookup("a").and_then(|v| v.as_number()), Some(3.0));
        assert!(global.lookup("b").is_none());
    }

    #[test]
    fn test_const_and_undeclared_assignment_fail() {
        let scope = Scope::global();
        scope.declare("c", Value::Null, false);
        assert!(scope.assign("c", Value::Null).is_err());
        assert!(scope.assign("missing", Value::Null).is_err());
    }
}
