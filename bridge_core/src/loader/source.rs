//! Turns load requests into guest source text: resolved files, or named
//! in-memory text with a synthetic location.

use super::resolver::Resolver;
use crate::error::{BridgeError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    File,
    Memory,
}

/// Guest source text together with where it came from.
#[derive(Debug, Clone)]
pub struct AcquiredSource {
    /// The key the unit is registered under in its handle: the requested
    /// path for files, the given name for memory sources.
    pub key: String,
    /// Resolved (or synthetic) location of the unit.
    pub location: PathBuf,
    pub text: String,
    pub origin: SourceOrigin,
}

/// Obtains guest source from files, memory buffers or packages.
#[derive(Debug, Clone, Copy)]
pub struct SourceAcquirer {
    resolver: Resolver,
}

impl SourceAcquirer {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    /// Resolves and reads every requested path. Resolution of the whole
    /// batch happens before anything is read, so one missing path fails
    /// the batch without side effects.
    pub fn from_files(&self, requests: &[PathBuf], root: &Path, paths: &[PathBuf]) -> Result<Vec<AcquiredSource>> {
        if requests.is_empty() {
            return Err(BridgeError::InvalidArgument("no paths given".into()));
        }
        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            let location = self
                .resolver
                .resolve_root(request, root, paths)
                .ok_or_else(|| BridgeError::ModuleNotFound(request.display().to_string()))?;
            debug!(request = %request.display(), location = %location.display(), "Resolved root");
            resolved.push((request, location));
        }

        resolved
            .into_iter()
            .map(|(request, location)| {
                let text = fs::read_to_string(&location)?;
                Ok(AcquiredSource {
                    key: request.display().to_string(),
                    location,
                    text,
                    origin: SourceOrigin::File,
                })
            })
            .collect()
    }

    /// Wraps in-memory text. The synthetic location is `<root>/<name>`.
    pub fn from_memory(&self, root: &Path, name: &str, source: &str) -> Result<AcquiredSource> {
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument("module name must not be empty".into()));
        }
        if source.contains('\0') {
            return Err(BridgeError::InvalidArgument(format!(
                "source for '{}' is not text",
                name
            )));
        }
        Ok(AcquiredSource {
            key: name.to_string(),
            location: root.join(name),
            text: source.to_string(),
            origin: SourceOrigin::Memory,
        })
    }

    pub fn from_package(&self, package: &str) -> Result<Vec<AcquiredSource>> {
        Err(BridgeError::NotImplemented(format!(
            "loading from package '{}'",
            package
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::guest::Dialect;
    use tempfile::tempdir;

    fn acquirer() -> SourceAcquirer {
        SourceAcquirer::new(Resolver::new(Dialect::Script))
    }

    #[test]
    fn test_batch_fails_on_missing_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("present.js"), "export const a = 1;").unwrap();
        let requests = vec![PathBuf::from("present"), PathBuf::from("absent")];
        let err = acquirer().from_files(&requests, dir.path(), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModuleNotFound);

        let sources = acquirer()
            .from_files(&requests[..1], dir.path(), &[])
            .unwrap();
        assert_eq!(sources[0].key, "present");
        assert_eq!(sources[0].location, dir.path().join("present.js"));
    }

    #[test]
    fn test_memory_validation() {
        let root = Path::new("/srv");
        let source = acquirer().from_memory(root, "m.js", "export const a = 1;").unwrap();
        assert_eq!(source.location, PathBuf::from("/srv/m.js"));
        assert_eq!(source.origin, SourceOrigin::Memory);

        let empty = acquirer().from_memory(root, "", "1").unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::InvalidArgument);
        let nul = acquirer().from_memory(root, "m", "a\0b").unwrap_err();
        assert_eq!(nul.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_package_not_implemented() {
        let err = acquirer().from_package("left-pad").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
    }
}
