//! Remote roots: one configured base URL plus its options

use crate::config::{self, RootOptions};
use crate::error::ImportError;
use crate::path::{CandidateKind, PathResolver};
use crate::source::{ContentKind, ContentSource, DetectRequest};
use crate::transport::{Transport, TransportError, TransportOptions};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the finder learned about one dotted name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Dotted name
    pub name: String,
    /// Matched path relative to the root
    pub path: String,
    /// Full URL, or `root#path` for archives
    pub origin: String,
    pub kind: CandidateKind,
    /// Source bytes, when locating already fetched them
    pub source: Option<Vec<u8>>,
}

impl ModuleRecord {
    pub fn is_package(&self) -> bool {
        self.kind == CandidateKind::Package
    }
}

/// One remote source location.
///
/// The content kind is detected on first use and never changes after.
pub struct RemoteRoot {
    url: String,
    options: RootOptions,
    transport_options: TransportOptions,
    transport: Arc<dyn Transport>,
    source: OnceCell<ContentSource>,
}

impl fmt::Debug for RemoteRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRoot")
            .field("url", &self.url)
            .field("source", &self.source.get())
            .finish()
    }
}

impl RemoteRoot {
    /// Create a root for `url`.
    ///
    /// Refuses plaintext URLs unless `options.allow_plaintext` or the
    /// process-wide insecure mode is set. No request is made here.
    pub fn new(url: &str, options: RootOptions, transport: Arc<dyn Transport>) -> Result<Self, ImportError> {
        let url = normalize_url(url);
        check_plaintext(&url, options.allow_plaintext)?;

        if !options.ca_verify {
            warn!(
                "TLS certificate verification is disabled for '{}'; this is a security hazard",
                url
            );
        }

        Ok(Self {
            transport_options: options.transport(),
            url,
            options,
            transport,
            source: OnceCell::new(),
        })
    }

    /// Normalized base URL, without a trailing `/`
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &RootOptions {
        &self.options
    }

    /// Content source, detecting it on first call
    pub fn source(&self) -> Result<&ContentSource, ImportError> {
        let source = self.source.get_or_try_init(|| {
            ContentSource::detect(DetectRequest {
                base_url: &self.url,
                options: &self.transport_options,
                password: self.options.zip_password.as_deref(),
                transport: &self.transport,
            })
        })?;
        Ok(source)
    }

    pub fn kind(&self) -> Result<ContentKind, ImportError> {
        Ok(self.source()?.kind())
    }

    /// Find the first candidate path for `name` present under this root.
    ///
    /// Archives answer from their namelist without extracting anything.
    /// Directories are probed with one GET per candidate, and the body of
    /// the hit is kept on the record.
    pub fn locate(&self, name: &str, resolver: &PathResolver) -> Result<Option<ModuleRecord>, ImportError> {
        let source = self.source()?;

        for candidate in resolver.candidates(name) {
            let record = |body: Option<Vec<u8>>| ModuleRecord {
                name: name.to_string(),
                origin: source.origin_for(&candidate.path),
                path: candidate.path.clone(),
                kind: candidate.kind,
                source: body,
            };

            match source {
                ContentSource::Archive(archive) => {
                    if archive.contains(&candidate.path) {
                        debug!("Found '{}' in archive '{}'", candidate.path, self.url);
                        return Ok(Some(record(None)));
                    }
                    debug!("'{}' not in archive '{}'", candidate.path, self.url);
                }
                ContentSource::Directory(dir) => {
                    if let Some(body) = dir.fetch(&candidate.path)? {
                        return Ok(Some(record(Some(body))));
                    }
                }
            }
        }

        info!("Module '{}' cannot be loaded from '{}'", name, self.url);
        Ok(None)
    }

    /// Source bytes for a located record.
    ///
    /// Decryption and corruption failures are errors; a path that
    /// disappeared is [`ImportError::NotFound`].
    pub fn read(&self, record: &ModuleRecord) -> Result<Vec<u8>, ImportError> {
        if let Some(body) = &record.source {
            return Ok(body.clone());
        }

        let body = match self.source()? {
            ContentSource::Archive(archive) => archive.fetch(&record.path)?,
            ContentSource::Directory(dir) => dir.fetch(&record.path)?,
        };
        body.ok_or_else(|| ImportError::not_found(&record.name, &self.url))
    }
}

/// Strip one trailing `/`
pub fn normalize_url(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_string()
}

pub(crate) fn check_plaintext(url: &str, allow_plaintext: bool) -> Result<(), ImportError> {
    let parsed = url::Url::parse(url).map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
    if parsed.scheme() == "https" {
        return Ok(());
    }

    warn!("Using plaintext URL '{}' is a security hazard", url);
    if allow_plaintext || config::insecure() {
        Ok(())
    } else {
        Err(ImportError::PlaintextNotAllowed(url.to_string()))
    }
}
