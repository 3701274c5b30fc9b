//! A loaded unit's exports, normalized into callables and plain values.

use crate::error::{BridgeError, Result};
use crate::guest::{Exception, FunctionRef, Interpreter, Promise, Value};
use indexmap::IndexMap;

/// One exported symbol.
#[derive(Debug, Clone)]
pub enum Export {
    Callable(FunctionRef),
    Value(Value),
}

impl Export {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Function(function) => Export::Callable(function),
            other => Export::Value(other),
        }
    }

    pub fn as_callable(&self) -> Option<&FunctionRef> {
        match self {
            Export::Callable(function) => Some(function),
            Export::Value(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Export::Callable(function) => Value::Function(function.clone()),
            Export::Value(value) => value.clone(),
        }
    }
}

/// Exported names of one loaded unit, in export order.
#[derive(Debug, Clone, Default)]
pub struct ModuleNamespace {
    entries: IndexMap<String, Export>,
}

impl ModuleNamespace {
    /// Normalizes a module's `exports` value. A lone function is keyed by
    /// its name (`default` when anonymous); any other non-object value is
    /// keyed `default`.
    pub fn from_exports(exports: &Value) -> Self {
        let mut entries = IndexMap::new();
        match exports {
            Value::Function(function) => {
                let name = match function.name() {
                    "" => "default",
                    name => name,
                };
                entries.insert(name.to_string(), Export::Callable(function.clone()));
            }
            Value::Object(props) => {
                for (name, value) in props.read().iter() {
                    entries.insert(name.clone(), Export::from_value(value.clone()));
                }
            }
            other => {
                entries.insert("default".to_string(), Export::Value(other.clone()));
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Export)> {
        self.entries.iter().map(|(name, export)| (name.as_str(), export))
    }

    pub fn callables(&self) -> impl Iterator<Item = (&str, &FunctionRef)> {
        self.iter()
            .filter_map(|(name, export)| export.as_callable().map(|f| (name, f)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Calls an exported function. A returned promise is unwrapped.
    pub fn call(&self, name: &str, args: &[Value], max_depth: usize) -> Result<Value> {
        let function = self
            .get(name)
            .and_then(Export::as_callable)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("'{}' is not an exported function", name)))?;
        let mut interpreter = Interpreter::new(max_depth);
        let result = interpreter.call(&Value::Function(function.clone()), args)?;
        match result {
            Value::Promise(promise) => match promise.as_ref() {
                Promise::Fulfilled(value) => Ok(value.clone()),
                Promise::Rejected(reason) => Err(Exception::Thrown(reason.clone()).into()),
            },
            value => Ok(value),
        }
    }
}
