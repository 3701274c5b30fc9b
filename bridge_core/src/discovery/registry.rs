//! Mapping from rendered typed-guest type names to bridge type ids.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Type ids an orchestrator maps onto its own value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeType {
    Bool,
    Double,
    String,
    Null,
    Map,
    Array,
    Function,
    Future,
}

impl fmt::Display for BridgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeType::Bool => "Bool",
            BridgeType::Double => "Double",
            BridgeType::String => "String",
            BridgeType::Null => "Null",
            BridgeType::Map => "Map",
            BridgeType::Array => "Array",
            BridgeType::Function => "Function",
            BridgeType::Future => "Future",
        };
        f.write_str(name)
    }
}

lazy_static! {
    static ref BUILTIN_TYPES: HashMap<&'static str, BridgeType> = {
        let mut types = HashMap::new();
        types.insert("boolean", BridgeType::Bool);
        types.insert("number", BridgeType::Double);
        types.insert("string", BridgeType::String);
        types.insert("null", BridgeType::Null);
        types.insert("undefined", BridgeType::Null);
        types.insert("void", BridgeType::Null);
        types.insert("object", BridgeType::Map);
        types.insert("Record<any, any>", BridgeType::Map);
        types.insert("any[]", BridgeType::Array);
        types.insert("(...args: any[]) => any", BridgeType::Function);
        types
    };
}

/// Classifies type names, built-in ones first, then registered aliases,
/// then by the shape of the rendered name.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    aliases: HashMap<String, BridgeType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named type, e.g. an interface the orchestrator knows.
    pub fn register(&mut self, name: impl Into<String>, ty: BridgeType) -> Option<BridgeType> {
        self.aliases.insert(name.into(), ty)
    }

    pub fn classify(&self, name: &str) -> Option<BridgeType> {
        let name = name.trim();
        if let Some(ty) = BUILTIN_TYPES.get(name) {
            return Some(*ty);
        }
        if let Some(ty) = self.aliases.get(name) {
            return Some(*ty);
        }
        if name.starts_with("Promise<") {
            Some(BridgeType::Future)
        } else if name.ends_with("[]") || name.starts_with('[') || name.starts_with("Array<") {
            Some(BridgeType::Array)
        } else if name.starts_with("Record<") || name.starts_with('{') {
            Some(BridgeType::Map)
        } else if name.starts_with('(') && name.contains("=>") {
            Some(BridgeType::Function)
        } else {
            None
        }
    }
}
