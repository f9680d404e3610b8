use crate::runtime::environment::ScopeRef;
use crate::runtime::error::{ErrorKind, RuntimeError, RuntimeResult};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

/// Module-loader state: resolution base, the `require` cache, and the
/// in-progress set that detects circular imports. Loading itself re-enters
/// the interpreter, so execution lives on `Interpreter`; this holds the data.
pub struct ModuleSystem {
    base_path: PathBuf,
    cache: HashMap<PathBuf, ScopeRef>,
    loading: HashSet<PathBuf>,
}

impl ModuleSystem {
    /// `ZELO_PATH`, when set, overrides the base path.
    pub fn new() -> Self {
        let base_path = env::var("ZELO_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        Self {
            base_path,
            cache: HashMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: HashMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolution order: absolute path, working directory, configured base
    /// path, base path's `lib/`. A missing extension defaults to `.z`.
    pub fn resolve(&self, module: &str, line: usize) -> RuntimeResult<PathBuf> {
        let mut path = PathBuf::from(module);
        if path.is_absolute() {
            return Ok(path);
        }
        if path.extension().is_none() {
            path.set_extension("z");
        }

        if let Ok(current) = env::current_dir() {
            let candidate = current.join(&path);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        let candidate = self.base_path.join(&path);
        if candidate.exists() {
            return Ok(candidate);
        }
        let candidate = self.base_path.join("lib").join(&path);
        if candidate.exists() {
            return Ok(candidate);
        }

        Err(RuntimeError::new(
            ErrorKind::ModuleNotFound {
                path: module.to_string(),
            },
            line,
        ))
    }

    pub fn cached(&self, resolved: &Path) -> Option<ScopeRef> {
        self.cache.get(resolved).cloned()
    }

    pub fn store(&mut self, resolved: PathBuf, scope: ScopeRef) {
        self.cache.insert(resolved, scope);
    }

    /// Marks a path as in progress; a second entry while loading is a
    /// circular import.
    pub fn begin_load(&mut self, resolved: &Path, line: usize) -> RuntimeResult<()> {
        if !self.loading.insert(resolved.to_path_buf()) {
            return Err(RuntimeError::new(
                ErrorKind::CircularImport {
                    path: resolved.display().to_string(),
                },
                line,
            ));
        }
        Ok(())
    }

    pub fn finish_load(&mut self, resolved: &Path) {
        self.loading.remove(resolved);
    }
}

impl Default for ModuleSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolution_appends_extension_and_prefers_base_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("util.z"), "loc x = 1;").unwrap();
        let modules = ModuleSystem::with_base_path(dir.path());
        let resolved = modules.resolve("util", 1).unwrap();
        assert_eq!(resolved, dir.path().join("util.z"));
    }

    #[test]
    fn resolution_falls_back_to_lib() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/strings.z"), "").unwrap();
        let modules = ModuleSystem::with_base_path(dir.path());
        let resolved = modules.resolve("strings", 1).unwrap();
        assert_eq!(resolved, dir.path().join("lib/strings.z"));
    }

    #[test]
    fn missing_module_reports_module_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let modules = ModuleSystem::with_base_path(dir.path());
        let err = modules.resolve("nope", 3).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ModuleNotFound { .. }));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn reentrant_load_is_a_circular_import() {
        let mut modules = ModuleSystem::with_base_path(".");
        let path = PathBuf::from("a.z");
        modules.begin_load(&path, 1).unwrap();
        let err = modules.begin_load(&path, 2).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CircularImport { .. }));
        modules.finish_load(&path);
        assert!(modules.begin_load(&path, 3).is_ok());
    }
}
