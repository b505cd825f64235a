//! netimport: remote module resolution and loading
//!
//! Resolves dotted module names to source code served by a remote root and
//! loads it into an in-process module registry, without writing anything
//! to disk. Roots can be:
//! - HTTP/HTTPS directories (listable or not)
//! - Archives (tar, tar.gz, tar.bz2, tar.xz, zip with optional password)
//! - Raw-content URLs of GitHub, GitLab and Bitbucket repositories
//! - Distributions picked through a PyPI-style package index
//!
//! Each root is an entry in the [`ImportSystem`] chain: a finder that
//! claims or declines names, and a loader that fetches, builds and executes
//! the module.

pub mod archive;
pub mod chain;
pub mod config;
pub mod error;
pub mod finder;
pub mod importer;
pub mod index;
pub mod loader;
pub mod path;
pub mod root;
pub mod runtime;
pub mod script;
pub mod services;
pub mod source;
pub mod transport;
pub mod version;

pub use archive::{Archive, ArchiveError, ArchiveFormat, Compression};
pub use chain::{global, ChainContext, ChainPosition, FindOutcome, ImportStrategy, ImportSystem, RootGuard};
pub use config::{insecure, set_insecure, Config, ConfigError, ProfileOptions, RootOptions};
pub use error::ImportError;
pub use finder::{DiscoveryCache, RemoteModuleFinder};
pub use importer::RemoteImporter;
pub use index::{IndexClient, IndexError, PackageIndexImporter, DEFAULT_INDEX_URL};
pub use loader::{LoadMode, RemoteModuleLoader};
pub use path::{Candidate, CandidateKind, DottedName, PathResolver};
pub use root::{ModuleRecord, RemoteRoot};
pub use runtime::{BuiltinModules, Importer, ModuleObject, ModuleRegistry, SourceExecutor, Value};
pub use script::ScriptExecutor;
pub use services::GitService;
pub use source::{ContentKind, ContentSource};
pub use transport::{HttpTransport, MemoryTransport, Transport, TransportError, TransportOptions};
pub use version::{Constraint, Version, VersionError};
