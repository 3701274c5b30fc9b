//! Acquiring, compiling and evaluating guest sources in isolation.
//!
//! Every top-level unit is evaluated in a fresh global scope and gets its
//! own [`ModuleRecord`]. Nested `require`/`import` calls resolve through the
//! requiring record's private path list and share the injected
//! [`ModuleCache`].

pub mod cache;
pub mod isolated;
pub mod namespace;
pub mod resolver;
pub mod source;
pub mod tree;

pub use cache::{CachedModule, InMemoryModuleCache, ModuleCache};
pub use isolated::{IsolatedLoader, LoadedUnit};
pub use namespace::{Export, ModuleNamespace};
pub use resolver::{Resolver, MODULES_DIR};
pub use source::{AcquiredSource, SourceAcquirer, SourceOrigin};
pub use tree::{ModuleRecord, ModuleTree};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Extra resolution directories for nested imports. They never change
/// which handle a load produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Searched before the default `guest_modules` directories.
    pub prepend_paths: Vec<PathBuf>,
    /// Searched after the configured search paths.
    pub append_paths: Vec<PathBuf>,
}

impl LoaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepend(mut self, path: impl Into<PathBuf>) -> Self {
        self.prepend_paths.push(path.into());
        self
    }

    pub fn append(mut self, path: impl Into<PathBuf>) -> Self {
        self.append_paths.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json() {
        let options: LoaderOptions =
            serde_json::from_str(r#"{ "prepend_paths": ["/opt/first"] }"#).unwrap();
        assert_eq!(options, LoaderOptions::new().prepend("/opt/first"));
        assert!(options.append_paths.is_empty());
    }

    #[test]
    fn test_options_from_toml() {
        let options: LoaderOptions = toml::from_str("append_paths = [\"/opt/last\"]").unwrap();
        assert_eq!(options.append_paths, vec![PathBuf::from("/opt/last")]);
    }
}
