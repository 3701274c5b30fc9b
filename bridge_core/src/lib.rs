//! Loads guest-language sources into isolated namespaces and reports the
//! signatures of everything they export.
//!
//! A [`Bridge`] serves one guest [`Dialect`]. Loads produce a
//! [`HandleRef`] whose discovery is computed once and cached in the
//! bridge's [`HandleTable`]. The process-wide [`Trampoline`] exposes the
//! fixed operation set to an external orchestrator.

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod error;
pub mod guest;
pub mod handle;
pub mod id;
pub mod lifecycle;
pub mod loader;
pub mod trampoline;
pub mod typecheck;

#[cfg(test)]
pub mod test_utils;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use discovery::{BridgeType, CollisionPolicy, DiscoveryMap, SignatureRecord, TypeIdMap, TypeIds};
pub use error::{BridgeError, ErrorKind, Result};
pub use guest::{Dialect, Value};
pub use handle::{Handle, HandleRef, HandleTable};
pub use id::{BridgeId, HandleId, ModuleId};
pub use loader::{InMemoryModuleCache, LoaderOptions, ModuleCache};
pub use trampoline::{Argument, Operation, Response, Trampoline};
pub use typecheck::{format_diagnostics, Diagnostic};
