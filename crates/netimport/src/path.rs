//! Candidate path resolution for dotted module names
//!
//! Handles turning `pkg.sub.mod` into the relative paths that may hold it.

use crate::error::ImportError;

/// Whether a candidate path holds a plain module or a package initializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Module,
    Package,
}

/// A relative path that may hold a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Path relative to the root, `/`-separated
    pub path: String,
    pub kind: CandidateKind,
}

/// Enumerates candidate paths for dotted names
#[derive(Debug, Clone)]
pub struct PathResolver {
    suffixes: Vec<String>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    /// Create a resolver for `.py` sources
    pub fn new() -> Self {
        Self::with_suffixes(["py"])
    }

    /// Create a resolver for the given file suffixes, in priority order
    pub fn with_suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Candidate paths for `name`, highest priority first.
    ///
    /// For each suffix the module file comes before the package
    /// initializer, so `pkg.py` wins over `pkg/__init__.py`.
    pub fn candidates(&self, name: &str) -> Vec<Candidate> {
        let base = name.replace('.', "/");
        let mut out = Vec::with_capacity(self.suffixes.len() * 2);
        for suffix in &self.suffixes {
            out.push(Candidate {
                path: format!("{}.{}", base, suffix),
                kind: CandidateKind::Module,
            });
            out.push(Candidate {
                path: format!("{}/__init__.{}", base, suffix),
                kind: CandidateKind::Package,
            });
        }
        out
    }
}

/// A validated dotted module name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DottedName {
    full: String,
    parts: Vec<String>,
}

impl DottedName {
    /// Parse a dotted module name.
    ///
    /// Empty names and names with empty segments (`.os`, `os..path`) are
    /// rejected.
    pub fn parse(name: &str) -> Result<Self, ImportError> {
        if name.is_empty() {
            return Err(ImportError::InvalidName(name.to_string()));
        }

        let parts: Vec<String> = name.split('.').map(String::from).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ImportError::InvalidName(name.to_string()));
        }

        Ok(Self {
            full: name.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Whether the name has a single segment
    pub fn is_simple(&self) -> bool {
        self.parts.len() == 1
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    /// First segment
    pub fn top_level(&self) -> &str {
        &self.parts[0]
    }

    /// Last segment
    pub fn leaf(&self) -> &str {
        &self.parts[self.parts.len() - 1]
    }

    /// Name of the enclosing package, if any (`a.b` for `a.b.c`)
    pub fn parent(&self) -> Option<String> {
        parent_name(&self.full).map(String::from)
    }

    /// Whether the last segment occurs more than once among the segments.
    ///
    /// Such names (`pkg.mod.mod`) are what a module importing itself by
    /// its own leaf name produces, and resolving them recurses forever.
    pub fn is_degenerate(&self) -> bool {
        let leaf = self.leaf();
        self.parts.iter().filter(|p| p.as_str() == leaf).count() > 1
    }
}

/// Parent of a dotted name, if any
pub fn parent_name(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_order() {
        let resolver = PathResolver::new();
        let candidates = resolver.candidates("pkg.sub.mod");
        assert_eq!(
            candidates,
            vec![
                Candidate {
                    path: "pkg/sub/mod.py".to_string(),
                    kind: CandidateKind::Module,
                },
                Candidate {
                    path: "pkg/sub/mod/__init__.py".to_string(),
                    kind: CandidateKind::Package,
                },
            ]
        );
    }

    #[test]
    fn test_candidates_multiple_suffixes() {
        let resolver = PathResolver::with_suffixes(["py", "pyw"]);
        let paths: Vec<_> = resolver
            .candidates("mod")
            .into_iter()
            .map(|c| c.path)
            .collect();
        assert_eq!(
            paths,
            vec!["mod.py", "mod/__init__.py", "mod.pyw", "mod/__init__.pyw"]
        );
    }

    #[test]
    fn test_dotted_name_parts() {
        let name = DottedName::parse("a.b.c").unwrap();
        assert_eq!(name.depth(), 3);
        assert_eq!(name.top_level(), "a");
        assert_eq!(name.leaf(), "c");
        assert_eq!(name.parent(), Some("a.b".to_string()));
        assert!(!name.is_simple());
    }

    #[test]
    fn test_dotted_name_invalid() {
        assert!(DottedName::parse("").is_err());
        assert!(DottedName::parse(".os").is_err());
        assert!(DottedName::parse("os..path").is_err());
        assert!(DottedName::parse("os.").is_err());
    }

    #[test]
    fn test_degenerate_names() {
        assert!(DottedName::parse("pkg.mod.mod").unwrap().is_degenerate());
        assert!(DottedName::parse("mod.pkg.mod").unwrap().is_degenerate());
        assert!(!DottedName::parse("pkg.pkg.mod").unwrap().is_degenerate());
        assert!(!DottedName::parse("pkg").unwrap().is_degenerate());
    }

    #[test]
    fn test_parent_name() {
        assert_eq!(parent_name("a.b.c"), Some("a.b"));
        assert_eq!(parent_name("a"), None);
    }
}
