//! In-memory archive listings (tar, tar.gz, tar.bz2, tar.xz, zip)
//!
//! An [`Archive`] is opened once from a fetched body and queried by exact
//! path afterwards. Opening never fails loudly: bytes that do not parse as
//! a tarball or a ZIP file simply are not an archive. Reading an entry can
//! fail loudly, when the entry is encrypted and the password is wrong or
//! the entry data is corrupt.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::debug;

/// Errors raised while reading an entry out of an opened archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Entry is encrypted and no password was configured
    #[error("'{path}' is encrypted and no password was provided")]
    PasswordRequired { path: String },

    /// Entry could not be decrypted with the configured password
    #[error("Wrong password for encrypted entry '{path}'")]
    InvalidPassword { path: String },

    /// Entry data is corrupt
    #[error("Corrupt archive entry '{path}': {reason}")]
    Corrupt { path: String, reason: String },
}

/// Stream compression wrapped around a tarball
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    /// Detect the compression from the leading magic bytes
    pub fn sniff(body: &[u8]) -> Self {
        if body.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else if body.starts_with(b"BZh") {
            Compression::Bzip2
        } else if body.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Compression::Xz
        } else {
            Compression::None
        }
    }

    fn decoder<'a>(self, body: &'a [u8]) -> Box<dyn Read + 'a> {
        match self {
            Compression::None => Box::new(body),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(body)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(body)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(body)),
        }
    }
}

/// Structural format of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar(Compression),
    Zip,
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Tar(Compression::None) => write!(f, "tar"),
            ArchiveFormat::Tar(Compression::Gzip) => write!(f, "tar.gz"),
            ArchiveFormat::Tar(Compression::Bzip2) => write!(f, "tar.bz2"),
            ArchiveFormat::Tar(Compression::Xz) => write!(f, "tar.xz"),
            ArchiveFormat::Zip => write!(f, "zip"),
        }
    }
}

enum Entries {
    // Tar is a stream, so file contents are kept from the single pass
    Tar(BTreeMap<String, Vec<u8>>),
    Zip { bytes: Vec<u8>, names: BTreeSet<String> },
}

/// An archive opened from a fetched body
pub struct Archive {
    format: ArchiveFormat,
    entries: Entries,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("format", &self.format)
            .field("entries", &self.len())
            .finish()
    }
}

impl Archive {
    /// Open `body` as an archive: tarball first, then ZIP.
    ///
    /// Returns `None` when neither parses.
    pub fn detect(body: &[u8]) -> Option<Self> {
        Self::open_tar(body).or_else(|| Self::open_zip(body))
    }

    /// Open `body` as a (possibly compressed) tarball
    pub fn open_tar(body: &[u8]) -> Option<Self> {
        let compression = Compression::sniff(body);
        let mut archive = tar::Archive::new(compression.decoder(body));

        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Not a tarball: {}", e);
                return None;
            }
        };

        let mut files = BTreeMap::new();
        let mut seen = 0usize;
        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Not a tarball: {}", e);
                    return None;
                }
            };
            seen += 1;

            if !entry.header().entry_type().is_file() {
                continue;
            }

            let path = match entry.path() {
                Ok(path) => normalize_entry_path(&path.to_string_lossy()),
                Err(e) => {
                    debug!("Invalid tar entry path: {}", e);
                    return None;
                }
            };

            let mut data = Vec::new();
            if let Err(e) = entry.read_to_end(&mut data) {
                debug!("Truncated tar entry '{}': {}", path, e);
                return None;
            }
            files.insert(path, data);
        }

        // An empty stream is not a tarball
        if seen == 0 {
            return None;
        }

        Some(Self {
            format: ArchiveFormat::Tar(compression),
            entries: Entries::Tar(files),
        })
    }

    /// Open `body` as a ZIP file
    pub fn open_zip(body: &[u8]) -> Option<Self> {
        let archive = match zip::ZipArchive::new(Cursor::new(body)) {
            Ok(archive) => archive,
            Err(e) => {
                debug!("Not a ZIP file: {}", e);
                return None;
            }
        };

        let names = archive.file_names().map(String::from).collect();

        Some(Self {
            format: ArchiveFormat::Zip,
            entries: Entries::Zip {
                bytes: body.to_vec(),
                names,
            },
        })
    }

    /// Structural format
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Number of known paths
    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Tar(files) => files.len(),
            Entries::Zip { names, .. } => names.len(),
        }
    }

    /// Whether the archive lists no paths
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `path` is listed
    pub fn contains(&self, path: &str) -> bool {
        match &self.entries {
            Entries::Tar(files) => files.contains_key(path),
            Entries::Zip { names, .. } => names.contains(path),
        }
    }

    /// All listed paths, sorted
    pub fn names(&self) -> Vec<&str> {
        match &self.entries {
            Entries::Tar(files) => files.keys().map(String::as_str).collect(),
            Entries::Zip { names, .. } => names.iter().map(String::as_str).collect(),
        }
    }

    /// Read the entry at `path`.
    ///
    /// Returns `Ok(None)` when the path is not listed. The password is only
    /// used for encrypted ZIP entries.
    pub fn read(&self, path: &str, password: Option<&[u8]>) -> Result<Option<Vec<u8>>, ArchiveError> {
        match &self.entries {
            Entries::Tar(files) => Ok(files.get(path).cloned()),
            Entries::Zip { bytes, names } => {
                if !names.contains(path) {
                    return Ok(None);
                }
                read_zip_entry(bytes, path, password).map(Some)
            }
        }
    }
}

fn read_zip_entry(bytes: &[u8], path: &str, password: Option<&[u8]>) -> Result<Vec<u8>, ArchiveError> {
    let corrupt = |reason: String| ArchiveError::Corrupt {
        path: path.to_string(),
        reason,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| corrupt(e.to_string()))?;
    let index = archive
        .index_for_name(path)
        .ok_or_else(|| corrupt("entry vanished from the central directory".to_string()))?;
    let encrypted = archive
        .by_index_raw(index)
        .map_err(|e| corrupt(e.to_string()))?
        .encrypted();

    let mut data = Vec::new();
    if encrypted {
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ArchiveError::PasswordRequired {
                path: path.to_string(),
            })?;

        let mut file = match archive.by_index_decrypt(index, password) {
            Ok(file) => file,
            Err(zip::result::ZipError::InvalidPassword) => {
                return Err(ArchiveError::InvalidPassword {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(corrupt(e.to_string())),
        };

        // ZipCrypto only checks one header byte; a wrong password that slips
        // through shows up as a checksum failure while reading.
        file.read_to_end(&mut data)
            .map_err(|_| ArchiveError::InvalidPassword {
                path: path.to_string(),
            })?;
    } else {
        let mut file = archive.by_index(index).map_err(|e| corrupt(e.to_string()))?;
        file.read_to_end(&mut data).map_err(|e| corrupt(e.to_string()))?;
    }

    Ok(data)
}

fn normalize_entry_path(path: &str) -> String {
    path.trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::unstable::write::FileOptionsExt;
    use std::io::Write;

    fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(files: &[(&str, &str)], password: Option<&[u8]>) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, content) in files {
            let mut options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            if let Some(password) = password {
                options = options.with_deprecated_encryption(password);
            }
            zip.start_file(*path, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_compression_sniff() {
        assert_eq!(Compression::sniff(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
        assert_eq!(Compression::sniff(b"BZh91AY"), Compression::Bzip2);
        assert_eq!(
            Compression::sniff(&[0xfd, b'7', b'z', b'X', b'Z', 0x00, 0x00]),
            Compression::Xz
        );
        assert_eq!(Compression::sniff(b"<html>"), Compression::None);
    }

    #[test]
    fn test_detect_tar() {
        let body = tar_bytes(&[("pkg/__init__.py", "x = 1"), ("./mod.py", "y = 2")]);
        let archive = Archive::detect(&body).unwrap();
        assert_eq!(archive.format(), ArchiveFormat::Tar(Compression::None));
        assert!(archive.contains("pkg/__init__.py"));
        assert!(archive.contains("mod.py"));
        assert_eq!(archive.read("mod.py", None).unwrap(), Some(b"y = 2".to_vec()));
        assert_eq!(archive.read("missing.py", None).unwrap(), None);
    }

    #[test]
    fn test_detect_gzip_tar() {
        let tar = tar_bytes(&[("mod.py", "y = 2")]);
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar).unwrap();
        let body = encoder.finish().unwrap();

        let archive = Archive::detect(&body).unwrap();
        assert_eq!(archive.format(), ArchiveFormat::Tar(Compression::Gzip));
        assert_eq!(archive.format().to_string(), "tar.gz");
    }

    #[test]
    fn test_detect_zip() {
        let body = zip_bytes(&[("pkg.py", "x = 1")], None);
        let archive = Archive::detect(&body).unwrap();
        assert_eq!(archive.format(), ArchiveFormat::Zip);
        assert_eq!(archive.names(), vec!["pkg.py"]);
        assert_eq!(archive.read("pkg.py", None).unwrap(), Some(b"x = 1".to_vec()));
    }

    #[test]
    fn test_not_an_archive() {
        assert!(Archive::detect(b"").is_none());
        assert!(Archive::detect(b"<html><body>Index of /</body></html>").is_none());
        let html = "<html>".repeat(200);
        assert!(Archive::detect(html.as_bytes()).is_none());
    }

    #[test]
    fn test_corrupt_gzip_is_not_an_archive() {
        let mut body = vec![0x1f, 0x8b, 0x08, 0x00];
        body.extend_from_slice(&[0xAB; 64]);
        assert!(Archive::detect(&body).is_none());
    }

    #[test]
    fn test_encrypted_zip() {
        let body = zip_bytes(&[("pkg.py", "secret = 1")], Some(b"P@ssw0rd!"));
        let archive = Archive::detect(&body).unwrap();

        assert_eq!(
            archive.read("pkg.py", Some(b"P@ssw0rd!")).unwrap(),
            Some(b"secret = 1".to_vec())
        );
        assert!(matches!(
            archive.read("pkg.py", Some(b"XXXXXXXX")),
            Err(ArchiveError::InvalidPassword { .. })
        ));
        assert!(matches!(
            archive.read("pkg.py", None),
            Err(ArchiveError::PasswordRequired { .. })
        ));
    }
}
