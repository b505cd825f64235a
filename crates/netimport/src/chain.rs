//! The ordered chain of import strategies and the import system around it
//!
//! [`ImportSystem`] owns the chain, the module registry, the source
//! executor and the process-wide load lock. Remote roots are inserted into
//! the chain with [`ImportSystem::register`] and taken out with
//! [`ImportSystem::unregister`] or by dropping the [`RootGuard`] returned
//! by the scoped helpers.

use crate::config::{Config, ConfigError, RootOptions};
use crate::error::ImportError;
use crate::importer::RemoteImporter;
use crate::index::{PackageIndexImporter, DEFAULT_INDEX_URL};
use crate::path::DottedName;
use crate::root::{normalize_url, RemoteRoot};
use crate::runtime::{BuiltinModules, Importer, ModuleObject, ModuleRegistry, SourceExecutor, Value};
use crate::script::ScriptExecutor;
use crate::services::GitService;
use crate::transport::{HttpTransport, Transport};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Outcome of asking a strategy about a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    /// The strategy will serve the name
    Claim,
    /// Defer to the next strategy
    Decline,
}

/// Where a new strategy goes in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainPosition {
    /// Consulted before everything already registered
    Prepend,
    /// Consulted after everything already registered
    #[default]
    Append,
}

/// What a strategy can see of the chain while deciding
pub struct ChainContext<'a> {
    strategies: &'a [Arc<dyn ImportStrategy>],
}

impl<'a> ChainContext<'a> {
    pub fn new(strategies: &'a [Arc<dyn ImportStrategy>]) -> Self {
        Self { strategies }
    }

    /// A context with no other strategies
    pub fn detached() -> ChainContext<'static> {
        ChainContext { strategies: &[] }
    }

    /// Whether a non-remote strategy anywhere in the chain provides `name`.
    ///
    /// Remote roots never shadow local modules, whatever their position.
    pub fn resolvable_locally(&self, name: &str) -> bool {
        self.strategies
            .iter()
            .any(|strategy| !strategy.is_remote() && strategy.provides(name))
    }
}

/// One entry of the import chain: a finder and a loader
pub trait ImportStrategy: Send + Sync {
    /// Key used to find the entry again (the root URL for remote roots)
    fn key(&self) -> &str;

    /// Whether the strategy fetches code from the network
    fn is_remote(&self) -> bool {
        true
    }

    /// Whether `name` is available without any network access
    fn provides(&self, _name: &str) -> bool {
        false
    }

    /// Claim or decline `name`
    fn find(&self, name: &str, context: &ChainContext<'_>) -> Result<FindOutcome, ImportError>;

    /// Load a claimed name. [`ImportError::NotFound`] passes to the next strategy.
    fn load(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError>;

    /// Load a claimed name, fetching and executing it again
    fn reload(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError> {
        self.load(name, system)
    }
}

fn same_strategy(a: &Arc<dyn ImportStrategy>, b: &Arc<dyn ImportStrategy>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Removes its strategy from the chain when dropped
#[must_use = "the root is unregistered as soon as the guard is dropped"]
pub struct RootGuard<'a> {
    system: &'a ImportSystem,
    strategy: Arc<dyn ImportStrategy>,
}

impl RootGuard<'_> {
    /// Key of the guarded strategy
    pub fn key(&self) -> &str {
        self.strategy.key()
    }
}

impl Drop for RootGuard<'_> {
    fn drop(&mut self) {
        if self.system.remove_strategy(&self.strategy) {
            debug!("Unregistered '{}'", self.strategy.key());
        }
    }
}

/// Chain, registry, executor and load lock
pub struct ImportSystem {
    strategies: RwLock<Vec<Arc<dyn ImportStrategy>>>,
    registry: ModuleRegistry,
    executor: Arc<dyn SourceExecutor>,
    transport: Arc<dyn Transport>,
    config: RwLock<Config>,
    load_lock: ReentrantMutex<()>,
    always_reload: AtomicBool,
    /// Names being imported, per thread
    importing: Mutex<HashSet<(ThreadId, String)>>,
}

/// Clears an importing mark on drop
struct Importing<'a> {
    system: &'a ImportSystem,
    key: (ThreadId, String),
}

impl Drop for Importing<'_> {
    fn drop(&mut self) {
        self.system.importing.lock().remove(&self.key);
    }
}

static GLOBAL: Lazy<ImportSystem> = Lazy::new(|| {
    let config = Config::load().unwrap_or_else(|e| {
        warn!("Ignoring user configuration: {}", e);
        Config::builtin()
    });
    let system = ImportSystem::new(Arc::new(ScriptExecutor::new()), Arc::new(HttpTransport::new()))
        .with_config(config);
    system.register(Arc::new(BuiltinModules::standard()), ChainPosition::Append);
    system
});

/// The process-wide import system: script executor, HTTP transport, the
/// user's configuration and the standard built-in modules.
pub fn global() -> &'static ImportSystem {
    &GLOBAL
}

impl ImportSystem {
    /// An empty chain with built-in configuration
    pub fn new(executor: Arc<dyn SourceExecutor>, transport: Arc<dyn Transport>) -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            registry: ModuleRegistry::new(),
            executor,
            transport,
            config: RwLock::new(Config::builtin()),
            load_lock: ReentrantMutex::new(()),
            always_reload: AtomicBool::new(false),
            importing: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the configuration
    pub fn with_config(self, config: Config) -> Self {
        *self.config.write() = config;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<dyn SourceExecutor> {
        &self.executor
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Snapshot of the configuration
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Overlay TOML profile text on the configuration
    pub fn set_profile(&self, text: &str) -> Result<(), ConfigError> {
        self.config.write().merge_str(text)
    }

    /// Re-fetch and re-execute modules on every import, even when they
    /// are registered. A module importing itself while it executes gets
    /// the registered object.
    pub fn set_always_reload(&self, enabled: bool) {
        self.always_reload.store(enabled, Ordering::SeqCst);
    }

    pub fn always_reload(&self) -> bool {
        self.always_reload.load(Ordering::SeqCst)
    }

    /// Take the process-wide load lock. Reentrant on the same thread.
    pub fn lock_loads(&self) -> ReentrantMutexGuard<'_, ()> {
        self.load_lock.lock()
    }

    /// Keys of the chain, in order
    pub fn strategy_keys(&self) -> Vec<String> {
        self.strategies
            .read()
            .iter()
            .map(|s| s.key().to_string())
            .collect()
    }

    /// Insert a strategy into the chain
    pub fn register(&self, strategy: Arc<dyn ImportStrategy>, position: ChainPosition) {
        debug!("Registering '{}' ({:?})", strategy.key(), position);
        let mut strategies = self.strategies.write();
        match position {
            ChainPosition::Prepend => strategies.insert(0, strategy),
            ChainPosition::Append => strategies.push(strategy),
        }
    }

    /// Insert a remote root into the chain
    pub fn register_root(&self, root: RemoteRoot, position: ChainPosition) -> Arc<RemoteImporter> {
        let importer = Arc::new(RemoteImporter::new(root));
        self.register(importer.clone(), position);
        importer
    }

    /// Remove the first remote strategy whose key starts with `prefix`.
    ///
    /// A trailing `/` on `prefix` is ignored. Returns whether one was removed.
    pub fn unregister(&self, prefix: &str) -> bool {
        let prefix = normalize_url(prefix);
        let mut strategies = self.strategies.write();
        match strategies
            .iter()
            .position(|s| s.is_remote() && s.key().starts_with(&prefix))
        {
            Some(index) => {
                let removed = strategies.remove(index);
                info!("Unregistered '{}'", removed.key());
                true
            }
            None => false,
        }
    }

    fn remove_strategy(&self, strategy: &Arc<dyn ImportStrategy>) -> bool {
        let mut strategies = self.strategies.write();
        match strategies.iter().position(|s| same_strategy(s, strategy)) {
            Some(index) => {
                strategies.remove(index);
                true
            }
            None => false,
        }
    }

    /// Register `strategy` until the returned guard is dropped
    pub fn scoped(&self, strategy: Arc<dyn ImportStrategy>, position: ChainPosition) -> RootGuard<'_> {
        self.register(strategy.clone(), position);
        RootGuard {
            system: self,
            strategy,
        }
    }

    fn root_from_profile(&self, url: Option<&str>, profile: Option<&str>) -> Result<RemoteRoot, ImportError> {
        let resolved = self.config.read().resolve(url, profile)?;
        let url = resolved
            .url
            .ok_or_else(|| ConfigError::MissingUrl(profile.unwrap_or("default").to_string()))?;
        RemoteRoot::new(&url, resolved.options, self.transport.clone())
    }

    /// Append a root built from a URL and/or profile to the chain
    pub fn add_remote_repo(&self, url: Option<&str>, profile: Option<&str>) -> Result<Arc<RemoteImporter>, ImportError> {
        let root = self.root_from_profile(url, profile)?;
        Ok(self.register_root(root, ChainPosition::Append))
    }

    /// Append a root for the duration of the returned guard
    pub fn remote_repo(&self, url: Option<&str>, profile: Option<&str>) -> Result<RootGuard<'_>, ImportError> {
        let root = self.root_from_profile(url, profile)?;
        Ok(self.scoped(Arc::new(RemoteImporter::new(root)), ChainPosition::Append))
    }

    /// Append a Git hosting service's raw-content root for the duration of
    /// the returned guard. `git_ref` defaults to `master`.
    pub fn git_repo(
        &self,
        service: GitService,
        user: &str,
        repo: &str,
        git_ref: Option<&str>,
        domain: Option<&str>,
        profile: Option<&str>,
    ) -> Result<RootGuard<'_>, ImportError> {
        let url = service.url(user, repo, git_ref, domain);
        self.remote_repo(Some(&url), profile)
    }

    /// Append a package index importer for the duration of the returned
    /// guard. The index URL comes from the profile's `url`, or the public
    /// index.
    ///
    /// `allowed_kinds` lists distribution kinds in preference order; `None`
    /// means wheels, then source distributions.
    pub fn pypi_repo(&self, profile: Option<&str>, allowed_kinds: Option<&[&str]>) -> Result<RootGuard<'_>, ImportError> {
        let resolved = self.config.read().resolve(None, profile)?;
        let template = resolved.url.unwrap_or_else(|| DEFAULT_INDEX_URL.to_string());
        let mut importer = PackageIndexImporter::new(&template, resolved.options, self.transport.clone())?;
        if let Some(kinds) = allowed_kinds {
            importer = importer.with_allowed_kinds(kinds.iter().copied());
        }
        Ok(self.scoped(Arc::new(importer), ChainPosition::Append))
    }

    /// Load `name` from a root without registering it or the root.
    ///
    /// Execution failures are logged and the partially executed module is
    /// returned.
    pub fn load(&self, name: &str, url: Option<&str>, profile: Option<&str>) -> Result<Arc<ModuleObject>, ImportError> {
        let root = self.root_from_profile(url, profile)?;
        RemoteImporter::new(root).load_on_demand(name, self)
    }

    /// Load `name` from an explicit root without registering anything
    pub fn load_from(&self, name: &str, url: &str, options: RootOptions) -> Result<Arc<ModuleObject>, ImportError> {
        let root = RemoteRoot::new(url, options, self.transport.clone())?;
        RemoteImporter::new(root).load_on_demand(name, self)
    }

    /// Import `name`, importing its ancestors first.
    ///
    /// Registered modules are returned without consulting the chain,
    /// unless always-reload is enabled.
    pub fn import_module(&self, name: &str) -> Result<Arc<ModuleObject>, ImportError> {
        let dotted = DottedName::parse(name)?;
        let forced = self.always_reload() && !self.is_importing(name);

        if !forced {
            if let Some(module) = self.registered(name) {
                return Ok(module);
            }
        }

        self.import_dotted(&dotted, forced)
    }

    /// Import `name` again, fetching and executing it even if registered
    pub fn reload(&self, name: &str) -> Result<Arc<ModuleObject>, ImportError> {
        let dotted = DottedName::parse(name)?;
        self.import_dotted(&dotted, true)
    }

    fn registered(&self, name: &str) -> Option<Arc<ModuleObject>> {
        // Waits for a load of the same module on another thread
        let _lock = self.lock_loads();
        self.registry.get(name)
    }

    fn is_importing(&self, name: &str) -> bool {
        self.importing
            .lock()
            .contains(&(thread::current().id(), name.to_string()))
    }

    fn begin_importing(&self, name: &str) -> Option<Importing<'_>> {
        let key = (thread::current().id(), name.to_string());
        if !self.importing.lock().insert(key.clone()) {
            return None;
        }
        Some(Importing { system: self, key })
    }

    fn import_dotted(&self, dotted: &DottedName, reload: bool) -> Result<Arc<ModuleObject>, ImportError> {
        let _importing = self.begin_importing(dotted.as_str());

        // Ancestors are only loaded when missing
        let parent = match dotted.parent() {
            Some(parent) => match self.registered(&parent) {
                Some(module) => Some(module),
                None => Some(self.import_module(&parent)?),
            },
            None => None,
        };

        let module = self.walk_chain(dotted.as_str(), reload)?;

        if let Some(parent) = parent {
            parent.set(dotted.leaf(), Value::Module(module.clone()));
        }
        Ok(module)
    }

    fn walk_chain(&self, name: &str, reload: bool) -> Result<Arc<ModuleObject>, ImportError> {
        let strategies = self.strategies.read().clone();

        let context = ChainContext::new(&strategies);
        for strategy in strategies.iter() {
            if strategy.find(name, &context)? == FindOutcome::Decline {
                continue;
            }

            let loaded = if reload || self.always_reload() {
                strategy.reload(name, self)
            } else {
                strategy.load(name, self)
            };

            match loaded {
                Ok(module) => return Ok(module),
                Err(ImportError::NotFound { root, .. }) => {
                    debug!("'{}' claimed but not found in '{}'; trying next", name, root);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ImportError::ModuleNotFound(name.to_string()))
    }
}

impl Importer for ImportSystem {
    fn import_module(&self, name: &str) -> Result<Arc<ModuleObject>, ImportError> {
        ImportSystem::import_module(self, name)
    }
}
