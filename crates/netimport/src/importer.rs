//! A remote root as one entry of the import chain

use crate::chain::{ChainContext, FindOutcome, ImportStrategy, ImportSystem};
use crate::error::ImportError;
use crate::finder::RemoteModuleFinder;
use crate::loader::{LoadMode, RemoteModuleLoader};
use crate::root::RemoteRoot;
use crate::runtime::ModuleObject;
use std::sync::Arc;

/// Finder and loader over one [`RemoteRoot`]
pub struct RemoteImporter {
    finder: Arc<RemoteModuleFinder>,
    loader: RemoteModuleLoader,
}

impl RemoteImporter {
    pub fn new(root: RemoteRoot) -> Self {
        let finder = Arc::new(RemoteModuleFinder::new(Arc::new(root)));
        Self {
            loader: RemoteModuleLoader::new(finder.clone()),
            finder,
        }
    }

    pub fn root(&self) -> &Arc<RemoteRoot> {
        self.finder.root()
    }

    pub fn url(&self) -> &str {
        self.finder.root().url()
    }

    pub fn finder(&self) -> &RemoteModuleFinder {
        &self.finder
    }

    /// Build and execute `name` without registering it.
    ///
    /// Unlike a chain import, a missing module is an error here.
    pub fn load_on_demand(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError> {
        self.loader.load(name, system, LoadMode::OnDemand)
    }
}

impl ImportStrategy for RemoteImporter {
    fn key(&self) -> &str {
        self.url()
    }

    fn find(&self, name: &str, context: &ChainContext<'_>) -> Result<FindOutcome, ImportError> {
        self.finder.find(name, context)
    }

    fn load(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError> {
        self.loader.load(name, system, LoadMode::Register)
    }

    fn reload(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError> {
        self.loader.load(name, system, LoadMode::Reload)
    }
}
