//! Runtime host: module objects, the module registry and the seams a
//! source executor plugs into.

use crate::chain::{ChainContext, FindOutcome, ImportStrategy, ImportSystem};
use crate::error::ImportError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A value bound in a module namespace
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Module(Arc<ModuleObject>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Modules compare by identity
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Module(m) => write!(f, "<module '{}'>", m.name()),
        }
    }
}

/// Runtime representation of an imported module.
///
/// Metadata is fixed at construction; the attribute namespace is filled
/// in by the executor afterwards.
pub struct ModuleObject {
    name: String,
    origin: Option<String>,
    path: Option<String>,
    package: Option<String>,
    loader: String,
    is_package: bool,
    attrs: RwLock<HashMap<String, Value>>,
}

impl fmt::Debug for ModuleObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Attributes may hold modules that point back here
        f.debug_struct("ModuleObject")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("package", &self.package)
            .field("loader", &self.loader)
            .field("is_package", &self.is_package)
            .finish()
    }
}

impl ModuleObject {
    /// Create a module with no origin and no package
    pub fn new(name: impl Into<String>, loader: impl Into<String>) -> Self {
        let name = name.into();
        let mut attrs = HashMap::new();
        attrs.insert("__name__".to_string(), Value::Str(name.clone()));

        Self {
            name,
            origin: None,
            path: None,
            package: None,
            loader: loader.into(),
            is_package: false,
            attrs: RwLock::new(attrs),
        }
    }

    /// Set the origin (`__file__`) and derive the search path from it.
    ///
    /// The path is the origin up to and including its last `/`.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        let dir = match origin.rfind('/') {
            Some(pos) => &origin[..=pos],
            None => "/",
        };
        self.path = Some(dir.to_string());
        self.attrs
            .get_mut()
            .insert("__file__".to_string(), Value::Str(origin.clone()));
        self.origin = Some(origin);
        self
    }

    /// Set the enclosing package (`__package__`)
    pub fn with_package(mut self, package: Option<String>) -> Self {
        let value = match &package {
            Some(p) => Value::Str(p.clone()),
            None => Value::None,
        };
        self.attrs.get_mut().insert("__package__".to_string(), value);
        self.package = package;
        self
    }

    /// Mark the module as a package initializer
    pub fn as_package(mut self, is_package: bool) -> Self {
        self.is_package = is_package;
        self
    }

    /// Dotted name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the source came from (URL, or `root#path` for archives)
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Directory of the origin, with a trailing `/`
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Package used to resolve relative imports
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// Key of the strategy that produced this module
    pub fn loader(&self) -> &str {
        &self.loader
    }

    pub fn is_package(&self) -> bool {
        self.is_package
    }

    /// Get an attribute
    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.read().get(name).cloned()
    }

    /// Set an attribute
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.attrs.write().insert(name.into(), value);
    }

    /// Whether an attribute is bound
    pub fn has(&self, name: &str) -> bool {
        self.attrs.read().contains_key(name)
    }

    /// Attributes not starting with `_`, sorted by name
    pub fn public_attributes(&self) -> Vec<(String, Value)> {
        let mut attrs: Vec<_> = self
            .attrs
            .read()
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        attrs.sort_by(|a, b| a.0.cmp(&b.0));
        attrs
    }
}

/// The process's table of loaded modules, keyed by dotted name
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<ModuleObject>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleObject>> {
        self.modules.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().contains_key(name)
    }

    /// Register a module, returning the one it replaced
    pub fn insert(&self, name: impl Into<String>, module: Arc<ModuleObject>) -> Option<Arc<ModuleObject>> {
        self.modules.write().insert(name.into(), module)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ModuleObject>> {
        self.modules.write().remove(name)
    }

    /// Remove `name` only if it is still bound to `module`
    pub fn remove_if_same(&self, name: &str, module: &Arc<ModuleObject>) -> bool {
        let mut modules = self.modules.write();
        match modules.get(name) {
            Some(current) if Arc::ptr_eq(current, module) => {
                modules.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

/// Entry point module bodies use to import other modules
pub trait Importer {
    fn import_module(&self, name: &str) -> Result<Arc<ModuleObject>, ImportError>;
}

/// Executes fetched source text against a module's namespace
pub trait SourceExecutor: Send + Sync {
    /// Run `source` with `module` as its namespace.
    ///
    /// Imports issued by the source go through `importer`.
    fn execute(&self, source: &str, module: &Arc<ModuleObject>, importer: &dyn Importer) -> Result<(), ImportError>;
}

/// Local, non-remote modules available without any network access
#[derive(Debug, Default)]
pub struct BuiltinModules {
    modules: RwLock<HashMap<String, Arc<ModuleObject>>>,
}

impl BuiltinModules {
    pub const KEY: &'static str = "builtin";

    /// No modules
    pub fn new() -> Self {
        Self::default()
    }

    /// The `netimport` module, exposing `__version__`
    pub fn standard() -> Self {
        let builtins = Self::new();
        let module = ModuleObject::new("netimport", Self::KEY);
        module.set("__version__", Value::Str(env!("CARGO_PKG_VERSION").to_string()));
        builtins.insert(module);
        builtins
    }

    /// Add a module
    pub fn insert(&self, module: ModuleObject) {
        self.modules
            .write()
            .insert(module.name().to_string(), Arc::new(module));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().contains_key(name)
    }
}

impl ImportStrategy for BuiltinModules {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn provides(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn find(&self, name: &str, _context: &ChainContext<'_>) -> Result<FindOutcome, ImportError> {
        Ok(if self.contains(name) {
            FindOutcome::Claim
        } else {
            FindOutcome::Decline
        })
    }

    fn load(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError> {
        let module = self
            .modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ImportError::not_found(name, Self::KEY))?;
        system.registry().insert(name, module.clone());
        Ok(module)
    }
}
