//! Profile configuration (~/.netimport.toml)
//!
//! Options are grouped in sections: `[default]` plus one
//! `[profiles.<key>]` table per root URL or named profile. A section
//! inherits every key it leaves unset from `[default]`.
//!
//! ```toml
//! [default]
//! allow-plaintext = false
//!
//! [profiles."https://example.com/repo"]
//! zip-password = "P@ssw0rd!"
//! headers = """
//! Authorization: Bearer abc
//! """
//!
//! [profiles.pinned]
//! requirements = "distlib==0.3.5"
//! project-names = "sample: sampleproject"
//! ```

use crate::transport::TransportOptions;
use crate::version::Constraint;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// Project homepage advertised in the default headers
pub const HOMEPAGE: &str = "https://github.com/netimport/netimport";

static INSECURE: AtomicBool = AtomicBool::new(false);

static REQUIREMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([\w-]+)\s*(?:([=<>]=)\s*(\d+\.\d+\.\d+))?").expect("valid requirement regex")
});

/// Allow plaintext roots process-wide, regardless of per-root options
pub fn set_insecure(enabled: bool) {
    INSECURE.store(enabled, Ordering::SeqCst);
}

/// Whether plaintext roots are allowed process-wide
pub fn insecure() -> bool {
    INSECURE.load(Ordering::SeqCst)
}

/// Errors that can occur while loading or resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration or requirements file
    #[error("Failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A `headers` line without a `Name: Value` shape
    #[error("Invalid header line: {0:?}")]
    InvalidHeader(String),

    /// A `project-names` line without a `module: project` shape
    #[error("Invalid project-names line: {0:?}")]
    InvalidProjectName(String),

    /// Neither the caller nor the profile named a URL
    #[error("No URL given and profile '{0}' does not set one")]
    MissingUrl(String),
}

/// One configuration section, as written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProfileOptions {
    /// Root URL used when a caller names only the profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_plaintext: Option<bool>,

    /// Newline-delimited `Name: Value` pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_verify: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,

    /// Newline-delimited requirement lines (`name==1.2.3`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,

    /// File holding more requirement lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements_file: Option<String>,

    /// Newline-delimited `module: project` pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_names: Option<String>,
}

impl ProfileOptions {
    /// Built-in defaults
    pub fn builtin() -> Self {
        Self {
            url: None,
            zip_password: Some(String::new()),
            proxy_url: Some(String::new()),
            allow_plaintext: Some(false),
            headers: Some(format!(
                "X-NetImport-Version: {}\nX-NetImport-Project: {}\n",
                env!("CARGO_PKG_VERSION"),
                HOMEPAGE
            )),
            ca_verify: Some(true),
            ca_file: Some(String::new()),
            requirements: Some(String::new()),
            requirements_file: Some(String::new()),
            project_names: Some(String::new()),
        }
    }

    /// Override every key that `other` sets
    pub fn overlay(&mut self, other: &ProfileOptions) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }

        take(&mut self.url, &other.url);
        take(&mut self.zip_password, &other.zip_password);
        take(&mut self.proxy_url, &other.proxy_url);
        take(&mut self.allow_plaintext, &other.allow_plaintext);
        take(&mut self.headers, &other.headers);
        take(&mut self.ca_verify, &other.ca_verify);
        take(&mut self.ca_file, &other.ca_file);
        take(&mut self.requirements, &other.requirements);
        take(&mut self.requirements_file, &other.requirements_file);
        take(&mut self.project_names, &other.project_names);
    }

    /// Resolve into typed options, reading `requirements-file` if set
    pub fn to_root_options(&self) -> Result<RootOptions, ConfigError> {
        let mut requirements = self.requirements.clone().unwrap_or_default();
        if let Some(path) = non_empty(&self.requirements_file) {
            requirements.push('\n');
            requirements.push_str(&std::fs::read_to_string(path)?);
        }

        Ok(RootOptions {
            headers: parse_pairs(self.headers.as_deref().unwrap_or_default())
                .map_err(ConfigError::InvalidHeader)?,
            proxy: non_empty(&self.proxy_url).map(String::from),
            zip_password: non_empty(&self.zip_password).map(|p| p.as_bytes().to_vec()),
            allow_plaintext: self.allow_plaintext.unwrap_or(false),
            ca_verify: self.ca_verify.unwrap_or(true),
            ca_file: non_empty(&self.ca_file).map(PathBuf::from),
            requirements: parse_requirements(&requirements),
            project_names: parse_pairs(self.project_names.as_deref().unwrap_or_default())
                .map_err(ConfigError::InvalidProjectName)?
                .into_iter()
                .collect(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    default: ProfileOptions,
    #[serde(default)]
    profiles: HashMap<String, ProfileOptions>,
}

/// Typed options for one root
#[derive(Debug, Clone, PartialEq)]
pub struct RootOptions {
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
    pub zip_password: Option<Vec<u8>>,
    pub allow_plaintext: bool,
    pub ca_verify: bool,
    pub ca_file: Option<PathBuf>,
    /// Project name -> version requirement
    pub requirements: HashMap<String, Constraint>,
    /// Module name -> index project name
    pub project_names: HashMap<String, String>,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            proxy: None,
            zip_password: None,
            allow_plaintext: false,
            ca_verify: true,
            ca_file: None,
            requirements: HashMap::new(),
            project_names: HashMap::new(),
        }
    }
}

impl RootOptions {
    /// Allow or refuse a plaintext root
    pub fn with_plaintext(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    /// Password for encrypted ZIP entries
    pub fn with_zip_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.zip_password = Some(password.into());
        self
    }

    /// Connection options for the transport
    pub fn transport(&self) -> TransportOptions {
        TransportOptions {
            headers: self.headers.clone(),
            proxy: self.proxy.clone(),
            ca_verify: self.ca_verify,
            ca_file: self.ca_file.clone(),
        }
    }
}

/// Options resolved for an entry point, plus the URL to use
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub url: Option<String>,
    pub options: RootOptions,
}

/// Layered configuration
#[derive(Debug, Clone)]
pub struct Config {
    default: ProfileOptions,
    profiles: HashMap<String, ProfileOptions>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Config {
    /// Built-in defaults only
    pub fn builtin() -> Self {
        Self {
            default: ProfileOptions::builtin(),
            profiles: HashMap::new(),
        }
    }

    /// Built-in defaults overlaid with the user's configuration files
    pub fn load() -> Result<Self, ConfigError> {
        match dirs::home_dir() {
            Some(home) => Self::load_from(&home),
            None => {
                debug!("No home directory; using built-in configuration");
                Ok(Self::builtin())
            }
        }
    }

    /// Like [`Config::load`], with `home` standing in for the home directory.
    ///
    /// Reads `home/.netimport.toml`, then every `*.toml` in
    /// `home/.netimport/` in name order.
    pub fn load_from(home: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::builtin();

        let file = home.join(".netimport.toml");
        if file.is_file() {
            info!("Loading configuration from '{}'", file.display());
            config.merge_file(&file)?;
        } else {
            debug!("File '{}' not available", file.display());
        }

        let dir = home.join(".netimport");
        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                let mut paths: Vec<PathBuf> = entries
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
                    .collect();
                paths.sort();
                for path in paths {
                    info!("Loading configuration from '{}'", path.display());
                    config.merge_file(&path)?;
                }
            }
            Err(_) => debug!("Directory '{}' not available", dir.display()),
        }

        Ok(config)
    }

    /// Overlay the sections of a TOML file
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path)?;
        self.merge_str(&text)
    }

    /// Overlay the sections of a TOML document
    pub fn merge_str(&mut self, text: &str) -> Result<(), ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        self.default.overlay(&file.default);
        for (key, options) in file.profiles {
            self.profiles
                .entry(normalize_key(&key))
                .or_default()
                .overlay(&options);
        }
        Ok(())
    }

    /// Section for a URL or profile name merged over `[default]`.
    ///
    /// Unknown keys yield the defaults.
    pub fn profile(&self, key: &str) -> ProfileOptions {
        let mut merged = self.default.clone();
        if let Some(section) = self.profiles.get(&normalize_key(key)) {
            merged.overlay(section);
        }
        merged
    }

    /// Whether a section exists for `key`
    pub fn has_profile(&self, key: &str) -> bool {
        self.profiles.contains_key(&normalize_key(key))
    }

    /// Options for an entry point called with a URL, a profile name, or both.
    ///
    /// A profile takes precedence for options; the URL falls back to the
    /// profile's `url` key.
    pub fn resolve(&self, url: Option<&str>, profile: Option<&str>) -> Result<ResolvedProfile, ConfigError> {
        let options = match (profile, url) {
            (Some(name), _) => self.profile(name),
            (None, Some(url)) => self.profile(url),
            (None, None) => self.default.clone(),
        };
        debug!("Profile for URL {:?} (profile {:?}): {:?}", url, profile, options);

        let url = url
            .map(String::from)
            .or_else(|| non_empty(&options.url).map(String::from));

        Ok(ResolvedProfile {
            url,
            options: options.to_root_options()?,
        })
    }
}

fn normalize_key(key: &str) -> String {
    key.trim_end_matches('/').to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parse newline-delimited `key: value` lines, skipping blank ones.
///
/// Returns the offending line on error.
fn parse_pairs(text: &str) -> Result<Vec<(String, String)>, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(line.to_string()),
        })
        .collect()
}

/// Parse requirement lines (`name`, `name==1.2.3`, `name >= 1.2.3`).
///
/// Lines that do not match are ignored.
fn parse_requirements(text: &str) -> HashMap<String, Constraint> {
    let mut out = HashMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = REQUIREMENT_LINE.captures(line) else {
            debug!("Ignoring requirement line {:?}", line);
            continue;
        };

        let constraint = match (caps.get(2), caps.get(3)) {
            (Some(op), Some(version)) => {
                match Constraint::from_operator(op.as_str(), version.as_str()) {
                    Ok(constraint) => constraint,
                    Err(e) => {
                        debug!("Ignoring requirement line {:?}: {}", line, e);
                        continue;
                    }
                }
            }
            _ => Constraint::Any,
        };
        out.insert(caps[1].to_string(), constraint);
    }
    out
}
