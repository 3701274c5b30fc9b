//! Strongly-typed identifiers for bridges, handles and module records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// Get the underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

/// Marker type for loaded handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleMarker;
/// Identifier for a loaded handle.
pub type HandleId = Id<HandleMarker>;

/// Marker type for bridges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BridgeMarker;
/// Identifier for a bridge instance.
pub type BridgeId = Id<BridgeMarker>;

/// Marker type for module records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModuleMarker;
/// Identifier for an evaluated module record.
pub type ModuleId = Id<ModuleMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_new() {
        let id1 = HandleId::new();
        let id2 = HandleId::new();
        assert_ne!(id1, id2, "Generated IDs should be unique");
    }

    #[test]
    fn test_id_display() {
        let id = BridgeId::new();
        assert_eq!(id.to_string().len(), 36, "UUID string should be 36 characters");
    }

    #[test]
    fn test_id_from_str() {
        let id = ModuleId::new();
        let parsed: ModuleId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<HandleId>().is_err());
    }
}
