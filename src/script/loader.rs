//! Loading user modules from a materialized code directory.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::error::{ErrorKind, ScriptError};
use super::interp::{LoadedSource, SourceLoader};
use super::parser::{parse_module, ParseError};
use crate::instrument::instrument;

pub const SOURCE_EXTENSION: &str = "flow";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid entry point '{0}': expected 'file.{SOURCE_EXTENSION}:function'")]
    BadEntryPoint(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error in {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: ParseError,
    },
    #[error("module '{module}' failed to load:\n{}", .error.render())]
    Script { module: String, error: ScriptError },
    #[error("module '{module}' has no function '{function}'")]
    MissingFunction { module: String, function: String },
}

/// `path/to/file.flow:function`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Path relative to the code directory.
    pub file: PathBuf,
    pub module: String,
    pub function: String,
}

impl EntryPoint {
    pub fn parse(spec: &str) -> Result<Self, LoadError> {
        let bad = || LoadError::BadEntryPoint(spec.to_string());
        let (file, function) = spec.rsplit_once(':').ok_or_else(bad)?;
        let stem = file
            .strip_suffix(&format!(".{SOURCE_EXTENSION}"))
            .ok_or_else(bad)?;
        let valid_ident = |s: &str| {
            !s.is_empty()
                && !s.starts_with(|c: char| c.is_ascii_digit())
                && s.chars().all(|c| c.is_alphanumeric() || c == '_')
        };
        if !valid_ident(function) || stem.is_empty() || Path::new(file).is_absolute() {
            return Err(bad());
        }
        let module = stem.trim_start_matches("./").replace(['/', '\\'], ".");
        if !module.split('.').all(valid_ident) {
            return Err(bad());
        }
        Ok(Self {
            file: PathBuf::from(file),
            module,
            function: function.to_string(),
        })
    }
}

/// Source loader over a code directory. Every module it loads is
/// instrumented and remembered as a user module.
pub struct CodeDir {
    root: PathBuf,
    hook: String,
    loaded: RefCell<BTreeSet<String>>,
}

impl CodeDir {
    pub fn new(root: impl Into<PathBuf>, hook: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            hook: hook.into(),
            loaded: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `module` was loaded from this directory.
    pub fn is_user_module(&self, module: &str) -> bool {
        self.loaded.borrow().contains(module)
    }

    fn module_path(&self, module: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in module.split('.') {
            path.push(part);
        }
        path.set_extension(SOURCE_EXTENSION);
        path
    }

    /// Read, parse and instrument `module` from `path`.
    pub fn read(&self, module: &str, path: &Path) -> Result<LoadedSource, LoadError> {
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = path.display().to_string();
        let parsed = parse_module(&source, module, &file).map_err(|source| LoadError::Parse {
            file: file.clone(),
            source,
        })?;
        self.loaded.borrow_mut().insert(module.to_string());
        tracing::debug!(module, file = %file, "Loaded user module");
        Ok(LoadedSource {
            module: instrument(parsed, &self.hook),
            source,
        })
    }

    pub fn read_entry(&self, entry: &EntryPoint) -> Result<LoadedSource, LoadError> {
        self.read(&entry.module, &self.root.join(&entry.file))
    }
}

impl SourceLoader for CodeDir {
    fn load(&self, name: &str) -> Result<Option<LoadedSource>, ScriptError> {
        let path = self.module_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        self.read(name, &path)
            .map(Some)
            .map_err(|e| ScriptError::new(ErrorKind::ImportError, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::HOOK_NAME;
    use tempfile::TempDir;

    #[test]
    fn entry_points_name_a_file_and_function() {
        let entry = EntryPoint::parse("flows/orders.flow:main").unwrap();
        assert_eq!(entry.file, PathBuf::from("flows/orders.flow"));
        assert_eq!(entry.module, "flows.orders");
        assert_eq!(entry.function, "main");

        for bad in ["orders.flow", "orders.py:main", "orders.flow:", "/abs/x.flow:main", "a-b.flow:main"] {
            assert!(EntryPoint::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn imports_resolve_inside_the_code_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/util.flow"), "def double(x):\n    return x * 2\n").unwrap();
        let code = CodeDir::new(dir.path(), HOOK_NAME);

        let loaded = code.load("lib.util").unwrap().unwrap();
        assert_eq!(loaded.module.name, "lib.util");
        assert!(code.is_user_module("lib.util"));
        assert!(code.load("missing").unwrap().is_none());
        assert!(!code.is_user_module("missing"));
    }

    #[test]
    fn syntax_errors_are_load_errors() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.flow"), "def broken(:\n").unwrap();
        let code = CodeDir::new(dir.path(), HOOK_NAME);
        let entry = EntryPoint::parse("broken.flow:main").unwrap();
        assert!(matches!(code.read_entry(&entry), Err(LoadError::Parse { .. })));
    }
}
