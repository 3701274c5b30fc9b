use super::LoaderOptions;
use crate::guest::Dialect;
use crate::typecheck::checker::normalize_path;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory searched for bare specifiers in every ancestor of a module.
pub const MODULES_DIR: &str = "guest_modules";

/// Maps requested module names to files on disk.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    dialect: Dialect,
}

impl Resolver {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Extensions tried when a request names no existing file.
    fn extensions(&self) -> &'static [&'static str] {
        match self.dialect {
            Dialect::Script => &["js"],
            Dialect::Typed => &["ts", "js"],
        }
    }

    /// `guest_modules` under `dir` and each of its ancestors, nearest first.
    pub fn default_paths(dir: &Path) -> Vec<PathBuf> {
        dir.ancestors()
            .filter(|ancestor| ancestor.file_name() != Some(OsStr::new(MODULES_DIR)))
            .map(|ancestor| ancestor.join(MODULES_DIR))
            .collect()
    }

    /// The private path list of a module living in `dir`.
    pub fn module_paths(dir: &Path, options: &LoaderOptions, search_paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths = options.prepend_paths.clone();
        paths.extend(Self::default_paths(dir));
        paths.extend(search_paths.iter().cloned());
        paths.extend(options.append_paths.iter().cloned());
        paths
    }

    /// Tries the exact name, then each extension, then `index.<ext>`.
    pub fn locate(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(normalize_path(candidate));
        }
        for ext in self.extensions() {
            let mut with_ext = candidate.as_os_str().to_os_string();
            with_ext.push(".");
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return Some(normalize_path(&with_ext));
            }
        }
        if candidate.is_dir() {
            for ext in self.extensions() {
                let index = candidate.join(format!("index.{}", ext));
                if index.is_file() {
                    return Some(normalize_path(&index));
                }
            }
        }
        None
    }

    /// Resolves a top-level load request against the execution root, then
    /// the path list.
    pub fn resolve_root(&self, request: &Path, root: &Path, paths: &[PathBuf]) -> Option<PathBuf> {
        if request.is_absolute() {
            return self.locate(request);
        }
        if let Some(found) = self.locate(&root.join(request)) {
            return Some(found);
        }
        self.search(request, paths)
    }

    /// Resolves a `require`/`import` specifier made from a module in `dir`.
    /// Relative specifiers are resolved against `dir`, bare ones through
    /// the module's path list.
    pub fn resolve_require(&self, specifier: &str, dir: &Path, paths: &[PathBuf]) -> Option<PathBuf> {
        let request = Path::new(specifier);
        if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".." {
            return self.locate(&dir.join(request));
        }
        if request.is_absolute() {
            return self.locate(request);
        }
        self.search(request, paths)
    }

    fn search(&self, request: &Path, paths: &[PathBuf]) -> Option<PathBuf> {
        let found = paths.iter().find_map(|dir| self.locate(&dir.join(request)));
        if found.is_none() {
            debug!(request = %request.display(), searched = paths.len(), "Module not resolved");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_locate_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("exact"), "").unwrap();
        fs::write(root.join("lib.js"), "").unwrap();
        fs::create_dir(root.join("pkg")).unwrap();
        fs::write(root.join("pkg/index.js"), "").unwrap();

        let resolver = Resolver::new(Dialect::Script);
        assert_eq!(resolver.locate(&root.join("exact")), Some(root.join("exact")));
        assert_eq!(resolver.locate(&root.join("lib")), Some(root.join("lib.js")));
        assert_eq!(resolver.locate(&root.join("pkg")), Some(root.join("pkg/index.js")));
        assert_eq!(resolver.locate(&root.join("missing")), None);
    }

    #[test]
    fn test_typed_prefers_ts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("m.ts"), "").unwrap();
        fs::write(dir.path().join("m.js"), "").unwrap();
        let resolver = Resolver::new(Dialect::Typed);
        assert_eq!(resolver.locate(&dir.path().join("m")), Some(dir.path().join("m.ts")));
    }

    #[test]
    fn test_bare_specifiers_use_path_order() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("dep.js"), "").unwrap();
        fs::write(first.join("dep.js"), "").unwrap();

        let options = LoaderOptions {
            prepend_paths: vec![first.clone()],
            append_paths: vec![second.clone()],
        };
        let paths = Resolver::module_paths(dir.path(), &options, &[]);
        assert_eq!(paths.first(), Some(&first));
        assert_eq!(paths.last(), Some(&second));

        let resolver = Resolver::new(Dialect::Script);
        assert_eq!(
            resolver.resolve_require("dep", dir.path(), &paths),
            Some(first.join("dep.js"))
        );
    }

    #[test]
    fn test_default_paths_walk_up() {
        let paths = Resolver::default_paths(Path::new("/a/b"));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/a/b/guest_modules"),
                PathBuf::from("/a/guest_modules"),
                PathBuf::from("/guest_modules"),
            ]
        );
    }
}
