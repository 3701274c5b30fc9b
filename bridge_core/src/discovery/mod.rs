//! Signature records for exported callables.
//!
//! Typed units are described from the checker's export types; everything
//! else falls back to the declared parameters of the function value.

pub mod params;
pub mod registry;

pub use params::parameter_names;
pub use registry::{BridgeType, TypeRegistry};

use crate::error::{BridgeError, Result};
use crate::guest::GuestFunction;
use crate::loader::ModuleNamespace;
use crate::typecheck::{ExportedSymbol, ModuleTypes};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Discovered metadata of one exported callable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// Parameter names in declaration order.
    pub signature: Vec<String>,
    /// Rendered parameter types, empty for dynamic guests.
    pub types: Vec<String>,
    pub ret: Option<String>,
    #[serde(rename = "async")]
    pub is_async: bool,
}

impl SignatureRecord {
    /// Describes a function from its declared parameters.
    pub fn from_function(function: &GuestFunction) -> Self {
        let signature = match function {
            GuestFunction::Closure(closure) => parameter_names(&closure.decl.params),
            GuestFunction::Native(native) => native.params.iter().map(|p| p.to_string()).collect(),
        };
        Self {
            signature,
            types: Vec::new(),
            ret: None,
            is_async: function.is_async(),
        }
    }

    /// Describes a typed export from its first call signature.
    pub fn from_symbol(symbol: &ExportedSymbol) -> Option<Self> {
        let first = symbol.signatures.first()?;
        let declared: Vec<Option<&str>> = first
            .params
            .iter()
            .map(|param| Some(param.name.as_str()).filter(|name| !name.is_empty()))
            .collect();
        Some(Self {
            signature: params::synthesize(&declared),
            types: first.params.iter().map(|param| param.ty.to_string()).collect(),
            ret: Some(first.ret.to_string()),
            is_async: symbol.is_async,
        })
    }

    pub fn arity(&self) -> usize {
        self.signature.len()
    }

    /// Bridge type ids of the parameters and return, `None` where unknown.
    /// Untyped records classify as `None`.
    pub fn classify(&self, registry: &TypeRegistry) -> Option<TypeIds> {
        let ret = self.ret.as_ref()?;
        Some(TypeIds {
            params: self.types.iter().map(|ty| registry.classify(ty)).collect(),
            ret: registry.classify(ret),
        })
    }
}

/// A typed record's parameter and return types as bridge type ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeIds {
    pub params: Vec<Option<BridgeType>>,
    pub ret: Option<BridgeType>,
}

/// Exported name → record.
pub type DiscoveryMap = IndexMap<String, SignatureRecord>;

/// Exported name → bridge type ids, typed records only.
pub type TypeIdMap = IndexMap<String, TypeIds>;

/// Classifies every typed record of `discovery`.
pub fn classify_all(discovery: &DiscoveryMap, registry: &TypeRegistry) -> TypeIdMap {
    discovery
        .iter()
        .filter_map(|(name, record)| Some((name.clone(), record.classify(registry)?)))
        .collect()
}

/// What happens when two discovery sets export the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Fail with [`BridgeError::SymbolCollision`].
    #[default]
    Reject,
    /// The set registered last replaces earlier records.
    LastWins,
}

/// Records for every callable of one namespace.
pub fn discover_namespace(namespace: &ModuleNamespace, types: Option<&ModuleTypes>) -> DiscoveryMap {
    let mut records = DiscoveryMap::new();
    for (name, function) in namespace.callables() {
        let typed = types
            .and_then(|types| types.get(name))
            .and_then(SignatureRecord::from_symbol);
        let record = match typed {
            Some(mut record) => {
                record.is_async |= function.is_async();
                record
            }
            None => {
                if types.is_some() {
                    debug!(name, "No static signature, using declared parameters");
                }
                SignatureRecord::from_function(function)
            }
        };
        records.insert(name.to_string(), record);
    }
    records
}

/// Unions discovery sets in order. `origin` names each set in collision
/// errors.
pub fn aggregate<'a, I>(sets: I, policy: CollisionPolicy) -> Result<DiscoveryMap>
where
    I: IntoIterator<Item = (&'a str, &'a DiscoveryMap)>,
{
    let mut merged = DiscoveryMap::new();
    let mut origins: IndexMap<&str, &str> = IndexMap::new();
    for (origin, set) in sets {
        for (name, record) in set {
            if let Some(first) = origins.get(name.as_str()) {
                match policy {
                    CollisionPolicy::Reject => {
                        return Err(BridgeError::SymbolCollision {
                            name: name.clone(),
                            first: first.to_string(),
                            second: origin.to_string(),
                        });
                    }
                    CollisionPolicy::LastWins => {
                        warn!(name = %name, first = %first, second = %origin, "Replacing discovered symbol");
                    }
                }
            }
            origins.insert(name.as_str(), origin);
            merged.insert(name.clone(), record.clone());
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::guest::builtins::native;
    use crate::guest::Value;

    fn record(params: &[&str]) -> SignatureRecord {
        SignatureRecord {
            signature: params.iter().map(|p| p.to_string()).collect(),
            types: Vec::new(),
            ret: None,
            is_async: false,
        }
    }

    #[test]
    fn test_record_serializes_async_key() {
        let json = serde_json::to_value(record(&["a"])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "signature": ["a"], "types": [], "ret": null, "async": false })
        );
    }

    #[test]
    fn test_native_exports_report_fixed_params() {
        let namespace = ModuleNamespace::from_exports(&native("clamp", &["value", "low", "high"], |_, _| {
            Ok(Value::Undefined)
        }));
        let records = discover_namespace(&namespace, None);
        assert_eq!(records["clamp"].signature, vec!["value", "low", "high"]);
        assert!(records["clamp"].types.is_empty());
    }

    #[test]
    fn test_aggregate_rejects_collisions() {
        let mut first = DiscoveryMap::new();
        first.insert("run".into(), record(&["a"]));
        let mut second = DiscoveryMap::new();
        second.insert("run".into(), record(&["b", "c"]));
        second.insert("stop".into(), record(&[]));

        let err = aggregate([("one", &first), ("two", &second)], CollisionPolicy::Reject).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolCollision);
        assert_eq!(err.to_string(), "Symbol 'run' is exported by both one and two");

        let merged = aggregate([("one", &first), ("two", &second)], CollisionPolicy::LastWins).unwrap();
        assert_eq!(merged["run"].arity(), 2);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_collision_policy_names() {
        let policy: CollisionPolicy = serde_json::from_str("\"last_wins\"").unwrap();
        assert_eq!(policy, CollisionPolicy::LastWins);
        assert_eq!(CollisionPolicy::default(), CollisionPolicy::Reject);
    }

    #[test]
    fn test_classify_typed_records_only() {
        let mut registry = TypeRegistry::new();
        registry.register("Point", BridgeType::Map);
        let mut discovery = DiscoveryMap::new();
        discovery.insert("untyped".into(), record(&["a"]));
        discovery.insert(
            "move".into(),
            SignatureRecord {
                signature: vec!["p".into(), "dx".into(), "label".into()],
                types: vec!["Point".into(), "number".into(), "string | number".into()],
                ret: Some("Promise<Point>".into()),
                is_async: true,
            },
        );

        let ids = classify_all(&discovery, &registry);
        assert_eq!(ids.len(), 1);
        assert_eq!(
            ids["move"],
            TypeIds {
                params: vec![Some(BridgeType::Map), Some(BridgeType::Double), None],
                ret: Some(BridgeType::Future),
            }
        );
    }
}
