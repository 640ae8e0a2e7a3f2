//! `metadata.name` and `metadata.version` from a `setup.cfg` file.
//!
//! Aims to match setuptools behaviour as closely as possible without ever
//! executing Python code: the `file:` directive reads a version file, the
//! `attr:` directive finds a literal assignment in the named module's AST.
//! Both refuse to read outside the project directory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use configparser::ini::Ini;
use regex::Regex;
use rustpython_parser::ast;
use rustpython_parser::{parse, Mode};
use tracing::{debug, error, info};

use crate::literal::{any_to_version, is_truthy, PyLiteral};
use crate::setup_py::{top_level_assignment, LineIndex, Lookup};
use crate::Error;

/// Valid Python name: a letter or underscore followed by word characters.
fn module_name_re() -> &'static Regex {
    static MODULE_NAME_RE: OnceLock<Regex> = OnceLock::new();
    MODULE_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

pub(crate) struct SetupCfg {
    top_dir: PathBuf,
    ini: Option<Ini>,
}

impl SetupCfg {
    /// Load `setup.cfg` from the project directory. `None` if the file does
    /// not exist; a file that fails to parse still loads, but yields nothing.
    pub(crate) fn load(top_dir: &Path) -> Option<Self> {
        let path = top_dir.join("setup.cfg");
        if !path.is_file() {
            return None;
        }
        debug!("Parsing setup.cfg at {}", path.display());
        let mut ini = Ini::new();
        ini.set_multiline(true);
        let ini = match ini.load(&path) {
            Ok(_) => Some(ini),
            Err(err) => {
                error!("Failed to parse setup.cfg: {err}");
                None
            }
        };
        Some(Self {
            top_dir: top_dir.to_path_buf(),
            ini,
        })
    }

    /// `metadata.name`, if present.
    pub(crate) fn name(&self) -> Option<String> {
        let name = self.get("metadata", "name");
        match name {
            Some(name) if !name.is_empty() => {
                info!("Found metadata.name in setup.cfg: {name:?}");
                Some(name)
            }
            _ => {
                info!("No metadata.name in setup.cfg");
                None
            }
        }
    }

    /// `metadata.version`, if present and resolvable.
    pub(crate) fn version(&self) -> Result<Option<String>, Error> {
        let Some(raw) = self.get("metadata", "version") else {
            info!("No metadata.version in setup.cfg");
            return Ok(None);
        };
        debug!("Resolving metadata.version in setup.cfg from {raw:?}");

        let resolved = if let Some(file_arg) = raw.strip_prefix("file:") {
            self.read_version_from_file(file_arg.trim())?
                .map(PyLiteral::Str)
        } else if let Some(attr_arg) = raw.strip_prefix("attr:") {
            self.read_version_from_attr(attr_arg.trim())?
        } else {
            Some(PyLiteral::Str(raw))
        };

        match resolved {
            Some(value) if is_truthy(&value) => {
                let version = any_to_version(&value);
                info!("Found metadata.version in setup.cfg: {version:?}");
                Ok(Some(version))
            }
            _ => {
                // Falsy values also count as "failed to resolve".
                info!("Failed to resolve metadata.version in setup.cfg");
                Ok(None)
            }
        }
    }

    fn get(&self, section: &str, option: &str) -> Option<String> {
        self.ini.as_ref()?.get(section, option)
    }

    /// Read the version from a file, which must live under the project dir.
    fn read_version_from_file(&self, file_path: &str) -> Result<Option<String>, Error> {
        let full_path = self.ensure_local(Path::new(file_path))?;
        if full_path.is_file() {
            let version = fs_err::read_to_string(&full_path)?.trim().to_string();
            debug!("Read version from {file_path:?}: {version:?}");
            Ok(Some(version))
        } else {
            error!("Version file {file_path:?} does not exist or is not a file");
            Ok(None)
        }
    }

    /// Read the version from a module attribute, e.g. `package.__version__`.
    ///
    /// Like setuptools, finds the attribute by looking for literal
    /// assignments in the module's AST; unlike setuptools, never falls back
    /// to executing the module.
    fn read_version_from_attr(&self, attr_spec: &str) -> Result<Option<PyLiteral>, Error> {
        let (module_name, attr_name) = match attr_spec.rsplit_once('.') {
            Some((module_name, attr_name)) => (module_name.to_string(), attr_name),
            // Assume the current directory is a package, look in __init__.py.
            None => ("__init__".to_string(), attr_spec),
        };
        debug!("Attempting to find attribute {attr_name:?} in {module_name:?}");

        let Some(module_file) = self.find_module(&module_name, &self.package_dirs())? else {
            error!("Module {module_name:?} not found");
            return Ok(None);
        };
        debug!("Found module {module_name:?} at {}", module_file.display());

        let source = fs_err::read_to_string(&module_file)?;
        let module = match parse(&source, Mode::Module, &module_file.to_string_lossy()) {
            Ok(ast::Mod::Module(module)) => module,
            Ok(_) => return Ok(None),
            Err(err) => {
                error!("Syntax error when parsing module: {err}");
                return Ok(None);
            }
        };

        let lines = LineIndex::new(&source);
        match top_level_assignment(&module.body, attr_name, None, &lines) {
            Lookup::Found(value) => {
                debug!("Found attribute {attr_name:?} in {module_name:?}");
                Ok(Some(value))
            }
            Lookup::NotLiteral => {
                error!("Attribute {attr_name:?} is not assigned to a literal expression");
                Ok(None)
            }
            Lookup::NotFound => {
                error!("Could not find attribute {attr_name:?} in {module_name:?}");
                Ok(None)
            }
        }
    }

    /// Find a module in the project directory, returning its source file.
    fn find_module(
        &self,
        module_name: &str,
        package_dirs: &HashMap<String, String>,
    ) -> Result<Option<PathBuf>, Error> {
        let parts = self.convert_to_path(module_name)?;
        let root_module = parts[0].clone();

        let module_path = if let Some(custom) = package_dirs.get(&root_module) {
            debug!("Custom path set for root module {root_module:?}: {custom:?}");
            // A custom path replaces the root module.
            let mut path = PathBuf::from(custom);
            path.extend(&parts[1..]);
            path
        } else if let Some(custom) = package_dirs.get("") {
            debug!("Custom path set for all root modules: {custom:?}");
            // A catch-all custom path does not replace the root module.
            let mut path = PathBuf::from(custom);
            path.extend(&parts);
            path
        } else {
            parts.iter().collect()
        };

        let full_module_path = self.ensure_local(&module_path)?;

        let package_init = full_module_path.join("__init__.py");
        if package_init.is_file() {
            return Ok(Some(package_init));
        }
        let mut module_py = full_module_path.into_os_string();
        module_py.push(".py");
        let module_py = PathBuf::from(module_py);
        if module_py.is_file() {
            return Ok(Some(module_py));
        }
        Ok(None)
    }

    /// Check that the module name is valid and convert it to path segments.
    fn convert_to_path(&self, module_name: &str) -> Result<Vec<String>, Error> {
        let mut parts: Vec<&str> = module_name.split('.').collect();
        if parts.first() == Some(&"") {
            // Relative import, supported only to the extent that one leading
            // '.' is ignored.
            parts.remove(0);
        }
        if parts.is_empty() || !parts.iter().all(|part| module_name_re().is_match(part)) {
            return Err(Error::InvalidModuleName(module_name.to_string()));
        }
        Ok(parts.into_iter().map(ToString::to_string).collect())
    }

    /// Resolve a relative path against the project directory, refusing
    /// anything that would escape it.
    fn ensure_local(&self, path: &Path) -> Result<PathBuf, Error> {
        let escape = || Error::PathEscape {
            path: path.display().to_string(),
            root: self.top_dir.display().to_string(),
        };

        let mut resolved = self.top_dir.clone();
        let mut depth = 0usize;
        for component in path.components() {
            match component {
                Component::Normal(segment) => {
                    resolved.push(segment);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(escape());
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }
        Ok(resolved)
    }

    /// `options.package_dir`, converted to a map if present.
    fn package_dirs(&self) -> HashMap<String, String> {
        let Some(value) = self.get("options", "package_dir") else {
            return HashMap::new();
        };

        let items: Vec<&str> = if value.contains('\n') {
            value.lines().collect()
        } else {
            value.split(',').collect()
        };

        let mut package_dirs = HashMap::new();
        for item in items {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            // A missing '=' means the entry is malformed; skip it.
            if let Some((package, dir)) = item.split_once('=') {
                package_dirs.insert(package.trim().to_string(), dir.trim().to_string());
            }
        }
        package_dirs
    }
}
