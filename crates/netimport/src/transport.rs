//! HTTP transport for remote module fetching
//!
//! Every network request made by a root goes through a [`Transport`]. A
//! non-2xx answer is a normal [`Response`] with a different status; only
//! connection-level failures are errors.

use parking_lot::{Mutex, RwLock};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to a remote host
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed before a status was received
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// IO error (connection refused, unreadable CA file, ...)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid proxy URL
    #[error("Invalid proxy URL '{url}': {reason}")]
    InvalidProxy { url: String, reason: String },

    /// CA file could not be parsed as PEM
    #[error("Invalid CA certificate in {path}: {reason}")]
    InvalidCertificate { path: PathBuf, reason: String },
}

/// Per-root connection options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Headers sent with every request
    pub headers: Vec<(String, String)>,
    /// Proxy URL (`scheme://host:port`)
    pub proxy: Option<String>,
    /// Verify TLS certificates
    pub ca_verify: bool,
    /// Extra PEM root certificate
    pub ca_file: Option<PathBuf>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            proxy: None,
            ca_verify: true,
            ca_file: None,
        }
    }
}

/// A single outgoing GET request
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub url: &'a str,
    pub options: &'a TransportOptions,
}

impl<'a> Request<'a> {
    /// GET request
    pub fn get(url: &'a str, options: &'a TransportOptions) -> Self {
        Self { url, options }
    }
}

/// Response to a request
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl Response {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can carry a request to a remote host
pub trait Transport: Send + Sync {
    /// Perform a request. Non-2xx statuses are returned, not raised.
    fn request(&self, request: &Request<'_>) -> Result<Response, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<String>,
    ca_verify: bool,
    ca_file: Option<PathBuf>,
}

/// Blocking HTTP/HTTPS transport backed by reqwest
///
/// Proxy and TLS settings are client-level in reqwest, so one client is
/// kept per distinct combination.
pub struct HttpTransport {
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Create a new transport
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, options: &TransportOptions) -> Result<Client, TransportError> {
        let key = ClientKey {
            proxy: options.proxy.clone(),
            ca_verify: options.ca_verify,
            ca_file: options.ca_file.clone(),
        };

        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(&key)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(key: &ClientKey) -> Result<Client, TransportError> {
    let mut builder =
        Client::builder().user_agent(format!("netimport/{}", env!("CARGO_PKG_VERSION")));

    builder = match &key.proxy {
        Some(proxy_url) => {
            let proxy =
                reqwest::Proxy::all(proxy_url).map_err(|e| TransportError::InvalidProxy {
                    url: proxy_url.clone(),
                    reason: e.to_string(),
                })?;
            builder.proxy(proxy)
        }
        // Only an explicitly configured proxy is used
        None => builder.no_proxy(),
    };

    if !key.ca_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(path) = &key.ca_file {
        let pem = std::fs::read(path)?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
            TransportError::InvalidCertificate {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        builder = builder.add_root_certificate(cert);
    }

    Ok(builder.build()?)
}

impl Transport for HttpTransport {
    fn request(&self, request: &Request<'_>) -> Result<Response, TransportError> {
        // Validate URL
        let parsed = url::Url::parse(request.url)
            .map_err(|_| TransportError::InvalidUrl(request.url.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(TransportError::InvalidUrl(request.url.to_string()));
        }

        let client = self.client_for(request.options)?;
        let mut builder = client.get(parsed);
        for (name, value) in &request.options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send()?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes()?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

enum Route {
    Serve { status: u16, body: Vec<u8> },
    Refuse,
}

/// In-memory transport serving a fixed URL map
///
/// Unknown URLs answer 404. Every request is recorded, which makes it
/// possible to check exactly which fetches a resolution performed.
#[derive(Default)]
pub struct MemoryTransport {
    routes: RwLock<HashMap<String, Route>>,
    log: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.insert_status(url, 200, body);
    }

    /// Serve `body` with an explicit status at `url`
    pub fn insert_status(&self, url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) {
        self.routes.write().insert(
            url.into(),
            Route::Serve {
                status,
                body: body.into(),
            },
        );
    }

    /// Make requests to `url` fail with a refused connection
    pub fn refuse(&self, url: impl Into<String>) {
        self.routes.write().insert(url.into(), Route::Refuse);
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Number of requests so far
    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }
}

impl Transport for MemoryTransport {
    fn request(&self, request: &Request<'_>) -> Result<Response, TransportError> {
        self.log.lock().push(request.url.to_string());

        match self.routes.read().get(request.url) {
            Some(Route::Serve { status, body }) => Ok(Response {
                status: *status,
                headers: HashMap::new(),
                body: body.clone(),
            }),
            Some(Route::Refuse) => Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused: {}", request.url),
            ))),
            None => Ok(Response {
                status: 404,
                ..Response::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        let mut response = Response::default();
        response.status = 200;
        assert!(response.is_success());
        response.status = 204;
        assert!(response.is_success());
        response.status = 301;
        assert!(!response.is_success());
        response.status = 404;
        assert!(!response.is_success());
    }

    #[test]
    fn test_invalid_url() {
        let transport = HttpTransport::new();
        let options = TransportOptions::default();
        let result = transport.request(&Request::get("not-a-url", &options));
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));

        let result = transport.request(&Request::get("ftp://example.com/x", &options));
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[test]
    fn test_invalid_proxy() {
        let transport = HttpTransport::new();
        let options = TransportOptions {
            proxy: Some("ftp://proxy.example.com:21".to_string()),
            ..TransportOptions::default()
        };
        let result = transport.request(&Request::get("https://example.com/", &options));
        assert!(matches!(result, Err(TransportError::InvalidProxy { .. })));
    }

    #[test]
    fn test_memory_transport_routes() {
        let transport = MemoryTransport::new();
        transport.insert("https://example.com/a.py", "x = 1");
        transport.insert_status("https://example.com/forbidden", 403, "");
        transport.refuse("https://down.example.com/");

        let options = TransportOptions::default();
        let found = transport
            .request(&Request::get("https://example.com/a.py", &options))
            .unwrap();
        assert_eq!(found.status, 200);
        assert_eq!(found.body, b"x = 1");

        let missing = transport
            .request(&Request::get("https://example.com/b.py", &options))
            .unwrap();
        assert_eq!(missing.status, 404);

        let forbidden = transport
            .request(&Request::get("https://example.com/forbidden", &options))
            .unwrap();
        assert!(!forbidden.is_success());

        let refused = transport.request(&Request::get("https://down.example.com/", &options));
        assert!(matches!(refused, Err(TransportError::IoError(_))));

        assert_eq!(transport.request_count(), 4);
        assert_eq!(transport.requests()[1], "https://example.com/b.py");
    }
}
