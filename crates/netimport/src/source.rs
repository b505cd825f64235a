//! Content sources: the structural interpretation of a root's served bytes

use crate::archive::{Archive, ArchiveError, ArchiveFormat};
use crate::transport::{Request, Transport, TransportError, TransportOptions};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Separator between an archive URL and a path inside it
pub const ARCHIVE_SEPARATOR: char = '#';

/// How a root's content is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Web-served tree, every path fetched on its own
    Directory,
    /// Single archive blob, fetched once and queried in memory
    Archive(ArchiveFormat),
    /// Index lookup resolving to a concrete root per top-level module
    PackageIndex,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Directory => write!(f, "directory"),
            ContentKind::Archive(format) => write!(f, "{} archive", format),
            ContentKind::PackageIndex => write!(f, "package index"),
        }
    }
}

/// Flat web directory
pub struct DirectorySource {
    base_url: String,
    options: TransportOptions,
    transport: Arc<dyn Transport>,
}

impl DirectorySource {
    pub fn new(base_url: impl Into<String>, options: TransportOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.into(),
            options,
            transport,
        }
    }

    /// Full URL of a relative path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET one path. Non-2xx answers are `Ok(None)`.
    pub fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, TransportError> {
        let url = self.url_for(path);
        let response = self.transport.request(&Request::get(&url, &self.options))?;
        if response.is_success() {
            debug!("Fetched '{}'", url);
            Ok(Some(response.body))
        } else {
            debug!("URL '{}' returned HTTP status {}", url, response.status);
            Ok(None)
        }
    }
}

/// Archive blob held in memory
pub struct ArchiveSource {
    base_url: String,
    archive: Archive,
    password: Option<Vec<u8>>,
}

impl ArchiveSource {
    pub fn new(base_url: impl Into<String>, archive: Archive, password: Option<Vec<u8>>) -> Self {
        Self {
            base_url: base_url.into(),
            archive,
            password,
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        self.archive.format()
    }

    /// Whether `path` is in the namelist
    pub fn contains(&self, path: &str) -> bool {
        self.archive.contains(path)
    }

    /// Full namelist
    pub fn list(&self) -> Vec<&str> {
        self.archive.names()
    }

    /// Extract one path. Paths not in the namelist are `Ok(None)`.
    pub fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        debug!("Extracting '{}' from '{}'", path, self.base_url);
        self.archive.read(path, self.password.as_deref())
    }

    /// `root#path`
    pub fn origin_for(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, ARCHIVE_SEPARATOR, path)
    }
}

/// One root's content
pub enum ContentSource {
    Directory(DirectorySource),
    Archive(ArchiveSource),
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::Directory(dir) => f.debug_tuple("Directory").field(&dir.base_url).finish(),
            ContentSource::Archive(archive) => f
                .debug_tuple("Archive")
                .field(&archive.base_url)
                .field(&archive.format())
                .finish(),
        }
    }
}

/// Inputs for [`ContentSource::detect`]
pub struct DetectRequest<'a> {
    pub base_url: &'a str,
    pub options: &'a TransportOptions,
    pub password: Option<&'a [u8]>,
    pub transport: &'a Arc<dyn Transport>,
}

impl ContentSource {
    /// GET the base URL and sniff its body: tarball, then ZIP, then directory.
    ///
    /// A non-2xx answer or a body that is neither archive leaves the root
    /// a directory over the original base URL. Connection failures are
    /// errors.
    pub fn detect(request: DetectRequest<'_>) -> Result<Self, TransportError> {
        let response = request
            .transport
            .request(&Request::get(request.base_url, request.options))?;

        let archive = if response.is_success() {
            Archive::detect(&response.body)
        } else {
            debug!(
                "URL '{}' returned HTTP status {}",
                request.base_url, response.status
            );
            None
        };

        Ok(match archive {
            Some(archive) => {
                info!("URL '{}' is a {} archive", request.base_url, archive.format());
                ContentSource::Archive(ArchiveSource::new(
                    request.base_url,
                    archive,
                    request.password.map(<[u8]>::to_vec),
                ))
            }
            None => {
                info!("URL '{}' is not an archive; using it as a directory", request.base_url);
                ContentSource::Directory(DirectorySource::new(
                    request.base_url,
                    request.options.clone(),
                    request.transport.clone(),
                ))
            }
        })
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentSource::Directory(_) => ContentKind::Directory,
            ContentSource::Archive(archive) => ContentKind::Archive(archive.format()),
        }
    }

    /// Namelist, for archives
    pub fn list(&self) -> Option<Vec<&str>> {
        match self {
            ContentSource::Directory(_) => None,
            ContentSource::Archive(archive) => Some(archive.list()),
        }
    }

    /// Human-readable origin of a relative path
    pub fn origin_for(&self, path: &str) -> String {
        match self {
            ContentSource::Directory(dir) => dir.url_for(path),
            ContentSource::Archive(archive) => archive.origin_for(path),
        }
    }
}
