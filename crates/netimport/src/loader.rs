//! The execution half of the import hook: fetch a claimed module, build its
//! module object and run its source.

use crate::chain::ImportSystem;
use crate::error::ImportError;
use crate::finder::RemoteModuleFinder;
use crate::path::{parent_name, DottedName};
use crate::runtime::{ModuleObject, ModuleRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a load interacts with the module registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Return a registered module as is; otherwise register, then execute
    Register,
    /// Like `Register`, but always fetch and execute again
    Reload,
    /// Build and execute without registering; execution failures are logged
    OnDemand,
}

/// Loads modules claimed by a [`RemoteModuleFinder`]
pub struct RemoteModuleLoader {
    finder: Arc<RemoteModuleFinder>,
}

impl RemoteModuleLoader {
    pub fn new(finder: Arc<RemoteModuleFinder>) -> Self {
        Self { finder }
    }

    pub fn finder(&self) -> &Arc<RemoteModuleFinder> {
        &self.finder
    }

    /// Produce the module object for `name`.
    ///
    /// Runs under the import system's load lock. Returns
    /// [`ImportError::NotFound`] when the root does not serve `name`.
    pub fn load(&self, name: &str, system: &ImportSystem, mode: LoadMode) -> Result<Arc<ModuleObject>, ImportError> {
        let _lock = system.lock_loads();
        let dotted = DottedName::parse(name)?;
        let registry = system.registry();

        if mode == LoadMode::Register {
            if let Some(existing) = registry.get(name) {
                debug!("'{}' is already loaded", name);
                self.finder.forget(name);
                return Ok(existing);
            }
        }

        if mode != LoadMode::OnDemand && !dotted.is_simple() {
            // A registered top-level module named like the leaf is returned as is
            if let Some(shadow) = registry.get(dotted.leaf()) {
                debug!("'{}' is shadowed by top-level module '{}'", name, dotted.leaf());
                self.finder.forget(name);
                return Ok(shadow);
            }
        }

        let root = self.finder.root();
        let record = match self.finder.take_record(name) {
            Some(record) => record,
            None => {
                debug!("'{}' has not been located yet; locating", name);
                self.finder
                    .locate(name)?
                    .ok_or_else(|| ImportError::not_found(name, root.url()))?
            }
        };

        let bytes = root.read(&record)?;
        let source = String::from_utf8(bytes)
            .map_err(|_| ImportError::execution(name, "source is not valid UTF-8"))?;

        let is_package = record.is_package();
        let package = derive_package(&dotted, is_package, registry);
        debug!(
            "Package set to {:?} for {} '{}'",
            package,
            if is_package { "package" } else { "module" },
            name
        );

        let module = Arc::new(
            ModuleObject::new(name, root.url())
                .with_origin(record.origin)
                .with_package(package)
                .as_package(is_package),
        );

        if mode == LoadMode::OnDemand {
            if let Err(e) = execute(name, &source, &module, system) {
                warn!(
                    "Module '{}' failed while executing outside the registry (it may use relative imports): {}",
                    name, e
                );
            }
            return Ok(module);
        }

        info!("Loading '{}' into the registry", name);
        let previous = registry.insert(name, module.clone());
        if let Err(e) = execute(name, &source, &module, system) {
            if registry.remove_if_same(name, &module) {
                if let Some(previous) = previous {
                    debug!("Restoring the previous '{}' after a failed reload", name);
                    registry.insert(name, previous);
                }
            }
            return Err(e);
        }

        Ok(registry.get(name).unwrap_or(module))
    }
}

fn execute(name: &str, source: &str, module: &Arc<ModuleObject>, system: &ImportSystem) -> Result<(), ImportError> {
    system
        .executor()
        .execute(source, module, system)
        .map_err(|e| {
            // A failed nested import must not read as "this root lacks `name`"
            if e.is_not_found() {
                ImportError::execution(name, e.to_string())
            } else {
                e
            }
        })
}

/// Package used to resolve relative imports inside `name`.
///
/// A package initializer is its own package. A module nested two or more
/// levels deep takes the nearest registered ancestor that is its own
/// package, falling back to the top-level segment when an ancestor is not
/// registered. Any other module takes its top-level segment, and a
/// top-level module has none.
pub fn derive_package(name: &DottedName, is_package: bool, registry: &ModuleRegistry) -> Option<String> {
    if is_package {
        return Some(name.as_str().to_string());
    }

    let parent = name.parent()?;
    if name.depth() == 2 {
        return Some(parent);
    }

    let mut candidate = parent;
    loop {
        match registry.get(&candidate) {
            Some(module) if module.package() == Some(candidate.as_str()) => return Some(candidate),
            Some(_) => match parent_name(&candidate) {
                Some(up) => candidate = up.to_string(),
                None => return Some(candidate),
            },
            None => return Some(name.top_level().to_string()),
        }
    }
}
