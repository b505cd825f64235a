//! Package index roots
//!
//! Resolves a project name to one concrete distribution URL through a
//! PyPI-style JSON API (`GET {index}/{project}/json`), then serves modules
//! from that distribution as an ordinary remote root.

use crate::chain::{ChainContext, FindOutcome, ImportStrategy, ImportSystem};
use crate::config::RootOptions;
use crate::error::ImportError;
use crate::importer::RemoteImporter;
use crate::path::DottedName;
use crate::root::{check_plaintext, RemoteRoot};
use crate::runtime::ModuleObject;
use crate::source::ContentKind;
use crate::transport::{Request, Transport, TransportError, TransportOptions};
use crate::version::{Constraint, Version};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Public index, `{project}` is replaced by the project name
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi/{project}/json";

/// Distribution kinds tried when none are given, in order
pub const DEFAULT_ALLOWED_KINDS: [&str; 2] = ["bdist_wheel", "sdist"];

/// Errors that can occur during index lookups
#[derive(Debug, Error)]
pub enum IndexError {
    /// Request to the index failed
    #[error("Index request failed: {0}")]
    Transport(#[from] TransportError),

    /// Project not found
    #[error("Project not found in the index: {0}")]
    ProjectNotFound(String),

    /// Index answered with something other than JSON
    #[error("Index did not respond with JSON for '{project}' (HTTP status {status})")]
    NotJson { project: String, status: u16 },

    /// Version not found
    #[error("Version {version} not available for project {project}")]
    VersionNotFound { project: String, version: String },

    /// No release satisfies the requirement
    #[error("No release of {project} satisfies {constraint}")]
    NoMatchingVersion { project: String, constraint: String },

    /// Release has no file of an allowed kind
    #[error("No allowed distribution for {project}=={version}; allowed kinds: {allowed}")]
    NoAllowedDistribution {
        project: String,
        version: String,
        allowed: String,
    },
}

/// Response from GET /{project}/json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub info: ProjectInfo,

    /// Version -> files of that release
    #[serde(default)]
    pub releases: HashMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Latest version
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One downloadable file of a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseFile {
    /// Distribution kind (`bdist_wheel`, `sdist`, ...)
    pub packagetype: String,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Blocking client for a JSON package index
pub struct IndexClient {
    template: String,
    options: TransportOptions,
    transport: Arc<dyn Transport>,
}

impl IndexClient {
    /// Create a client for an index URL template containing `{project}`
    pub fn new(template: impl Into<String>, options: TransportOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            template: template.into(),
            options,
            transport,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Metadata URL of a project
    pub fn project_url(&self, project: &str) -> String {
        self.template.replace("{project}", project)
    }

    /// Get project metadata
    pub fn get_project(&self, project: &str) -> Result<ProjectResponse, IndexError> {
        let url = self.project_url(project);
        debug!("Querying index URL '{}'", url);

        let response = self.transport.request(&Request::get(&url, &self.options))?;
        if response.status == 404 {
            return Err(IndexError::ProjectNotFound(project.to_string()));
        }

        serde_json::from_slice(&response.body).map_err(|_| IndexError::NotJson {
            project: project.to_string(),
            status: response.status,
        })
    }

    /// URL of one distribution of `project`.
    ///
    /// Without a constraint the index's latest version is used; `==` pins
    /// the version and a range picks the highest satisfying release. Within
    /// the release, the first kind in `allowed` that has a file wins.
    pub fn resolve(&self, project: &str, constraint: Option<&Constraint>, allowed: &[String]) -> Result<String, IndexError> {
        let metadata = self.get_project(project)?;
        let version = select_version(project, &metadata, constraint)?;

        let files = metadata
            .releases
            .get(&version)
            .ok_or_else(|| IndexError::VersionNotFound {
                project: project.to_string(),
                version: version.clone(),
            })?;
        if files.is_empty() {
            warn!("Version '{}' is an empty release of '{}'", version, project);
        }

        for kind in allowed {
            let url = files
                .iter()
                .filter(|file| &file.packagetype == kind)
                .find_map(|file| file.url.clone());
            if let Some(url) = url {
                info!("Using {} of {}=={}: '{}'", kind, project, version, url);
                return Ok(url);
            }
        }

        Err(IndexError::NoAllowedDistribution {
            project: project.to_string(),
            version,
            allowed: allowed.join(", "),
        })
    }
}

fn select_version(project: &str, metadata: &ProjectResponse, constraint: Option<&Constraint>) -> Result<String, IndexError> {
    match constraint {
        None | Some(Constraint::Any) => Ok(metadata.info.version.clone()),
        Some(Constraint::Exact(version)) => Ok(version.to_string()),
        Some(range) => metadata
            .releases
            .keys()
            .filter_map(|key| Version::parse(key).ok().map(|v| (v, key)))
            .filter(|(v, _)| range.matches(v))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, key)| key.clone())
            .ok_or_else(|| IndexError::NoMatchingVersion {
                project: project.to_string(),
                constraint: range.to_string(),
            }),
    }
}

/// Import strategy resolving top-level modules through a package index.
///
/// The distribution root picked for a top-level module is kept for every
/// later name under it.
pub struct PackageIndexImporter {
    client: IndexClient,
    options: RootOptions,
    transport: Arc<dyn Transport>,
    allowed: Vec<String>,
    importers: RwLock<HashMap<String, Arc<RemoteImporter>>>,
}

impl PackageIndexImporter {
    /// Create an importer for an index URL template.
    ///
    /// Plaintext index URLs are refused like plaintext roots.
    pub fn new(template: &str, options: RootOptions, transport: Arc<dyn Transport>) -> Result<Self, ImportError> {
        check_plaintext(&template.replace("{project}", "project"), options.allow_plaintext)?;

        Ok(Self {
            client: IndexClient::new(template, options.transport(), transport.clone()),
            options,
            transport,
            allowed: DEFAULT_ALLOWED_KINDS.iter().map(|k| k.to_string()).collect(),
            importers: RwLock::new(HashMap::new()),
        })
    }

    /// Distribution kinds to accept, in preference order
    pub fn with_allowed_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::PackageIndex
    }

    /// Root chosen for a top-level module, if any yet
    pub fn resolved_root(&self, top_level: &str) -> Option<Arc<RemoteRoot>> {
        self.importers
            .read()
            .get(top_level)
            .map(|importer| importer.root().clone())
    }

    fn project_for(&self, top_level: &str) -> String {
        self.options
            .project_names
            .get(top_level)
            .cloned()
            .unwrap_or_else(|| top_level.to_string())
    }

    fn claim(&self, name: &str, context: &ChainContext<'_>) -> Result<Option<Arc<RemoteImporter>>, ImportError> {
        let dotted = DottedName::parse(name)?;
        let top = dotted.top_level();

        let cached = self.importers.read().get(top).cloned();
        if let Some(importer) = cached {
            return Ok(match importer.find(name, context)? {
                FindOutcome::Claim => Some(importer),
                FindOutcome::Decline => None,
            });
        }

        if context.resolvable_locally(top) {
            return Ok(None);
        }

        let project = self.project_for(top);
        let constraint = self.options.requirements.get(&project);
        let url = match self.client.resolve(&project, constraint, &self.allowed) {
            Ok(url) => url,
            Err(IndexError::Transport(e)) => return Err(ImportError::Transport(e)),
            Err(e) => {
                warn!("Module '{}' cannot be found in the index: {}", name, e);
                return Ok(None);
            }
        };

        let root = RemoteRoot::new(&url, self.options.clone(), self.transport.clone())?;
        let importer = Arc::new(RemoteImporter::new(root));
        match importer.find(name, context)? {
            FindOutcome::Claim => {
                info!("Module '{}' can be loaded from project '{}'", name, project);
                self.importers
                    .write()
                    .insert(top.to_string(), importer.clone());
                Ok(Some(importer))
            }
            FindOutcome::Decline => {
                warn!("Module '{}' is not in '{}'", name, url);
                Ok(None)
            }
        }
    }

    fn importer_for(&self, name: &str) -> Result<Arc<RemoteImporter>, ImportError> {
        let dotted = DottedName::parse(name)?;
        let cached = self.importers.read().get(dotted.top_level()).cloned();
        if let Some(importer) = cached {
            return Ok(importer);
        }

        debug!("'{}' has not been looked up yet; querying the index", name);
        self.claim(name, &ChainContext::detached())?
            .ok_or_else(|| ImportError::not_found(name, self.client.template()))
    }
}

impl ImportStrategy for PackageIndexImporter {
    fn key(&self) -> &str {
        self.client.template()
    }

    fn find(&self, name: &str, context: &ChainContext<'_>) -> Result<FindOutcome, ImportError> {
        info!("Trying to find '{}' in the package index", name);
        Ok(match self.claim(name, context)? {
            Some(_) => FindOutcome::Claim,
            None => FindOutcome::Decline,
        })
    }

    fn load(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError> {
        self.importer_for(name)?.load(name, system)
    }

    fn reload(&self, name: &str, system: &ImportSystem) -> Result<Arc<ModuleObject>, ImportError> {
        self.importer_for(name)?.reload(name, system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    const INDEX: &str = "https://index.example.com/pypi/{project}/json";

    fn client_with(project: &str, body: serde_json::Value) -> IndexClient {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(
            format!("https://index.example.com/pypi/{}/json", project),
            body.to_string(),
        );
        IndexClient::new(INDEX, TransportOptions::default(), transport)
    }

    fn sample() -> serde_json::Value {
        json!({
            "info": { "version": "2.0.0", "name": "sample" },
            "releases": {
                "1.0.0": [
                    { "packagetype": "sdist", "url": "https://files.example.com/sample-1.0.0.tar.gz" }
                ],
                "1.5.0": [
                    { "packagetype": "bdist_wheel", "url": "https://files.example.com/sample-1.5.0.whl" },
                    { "packagetype": "sdist", "url": "https://files.example.com/sample-1.5.0.tar.gz" }
                ],
                "2.0.0": [
                    { "packagetype": "sdist", "url": "https://files.example.com/sample-2.0.0.tar.gz" },
                    { "packagetype": "bdist_wheel", "url": "https://files.example.com/sample-2.0.0.whl" }
                ],
                "3.0.0": []
            }
        })
    }

    fn allowed() -> Vec<String> {
        DEFAULT_ALLOWED_KINDS.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_latest_prefers_wheel() {
        let client = client_with("sample", sample());
        let url = client.resolve("sample", None, &allowed()).unwrap();
        assert_eq!(url, "https://files.example.com/sample-2.0.0.whl");
    }

    #[test]
    fn test_caller_order_wins() {
        let client = client_with("sample", sample());
        let sdist_first = vec!["sdist".to_string(), "bdist_wheel".to_string()];
        let url = client.resolve("sample", None, &sdist_first).unwrap();
        assert_eq!(url, "https://files.example.com/sample-2.0.0.tar.gz");
    }

    #[test]
    fn test_pinned_version() {
        let client = client_with("sample", sample());
        let pin = Constraint::parse("==1.0.0").unwrap();
        let url = client.resolve("sample", Some(&pin), &allowed()).unwrap();
        assert_eq!(url, "https://files.example.com/sample-1.0.0.tar.gz");
    }

    #[test]
    fn test_range_picks_highest_match() {
        let client = client_with("sample", sample());
        let range = Constraint::parse("<=1.9.9").unwrap();
        let url = client.resolve("sample", Some(&range), &allowed()).unwrap();
        assert_eq!(url, "https://files.example.com/sample-1.5.0.whl");

        let impossible = Constraint::parse(">=9.0.0").unwrap();
        assert!(matches!(
            client.resolve("sample", Some(&impossible), &allowed()),
            Err(IndexError::NoMatchingVersion { .. })
        ));
    }

    #[test]
    fn test_missing_version_and_kind() {
        let client = client_with("sample", sample());
        let pin = Constraint::parse("==0.0.1").unwrap();
        assert!(matches!(
            client.resolve("sample", Some(&pin), &allowed()),
            Err(IndexError::VersionNotFound { .. })
        ));

        let empty = Constraint::parse("==3.0.0").unwrap();
        assert!(matches!(
            client.resolve("sample", Some(&empty), &allowed()),
            Err(IndexError::NoAllowedDistribution { .. })
        ));
    }

    #[test]
    fn test_unknown_project_and_bad_body() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert_status(
            "https://index.example.com/pypi/broken/json",
            503,
            "<html>busy</html>",
        );
        let client = IndexClient::new(INDEX, TransportOptions::default(), transport);

        assert!(matches!(
            client.resolve("missing", None, &allowed()),
            Err(IndexError::ProjectNotFound(name)) if name == "missing"
        ));
        assert!(matches!(
            client.resolve("broken", None, &allowed()),
            Err(IndexError::NotJson { status: 503, .. })
        ));
    }

    #[test]
    fn test_plaintext_index_refused() {
        let transport = Arc::new(MemoryTransport::new());
        let result = PackageIndexImporter::new(
            "http://index.example.com/{project}/json",
            RootOptions::default(),
            transport,
        );
        assert!(matches!(result, Err(ImportError::PlaintextNotAllowed(_))));
    }
}
