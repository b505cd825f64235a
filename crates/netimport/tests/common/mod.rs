//! Shared fixtures for integration tests
#![allow(dead_code)]

use netimport::{
    BuiltinModules, ChainPosition, ImportError, ImportSystem, Importer, MemoryTransport,
    ModuleObject, ScriptExecutor, SourceExecutor,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zip::unstable::write::FileOptionsExt;

pub const ROOT: &str = "https://modules.example.com/repo";

/// Import system over an in-memory transport, with the standard builtins
pub fn system(transport: Arc<MemoryTransport>) -> ImportSystem {
    system_with(Arc::new(ScriptExecutor::new()), transport)
}

pub fn system_with(executor: Arc<dyn SourceExecutor>, transport: Arc<MemoryTransport>) -> ImportSystem {
    let system = ImportSystem::new(executor, transport);
    system.register(Arc::new(BuiltinModules::standard()), ChainPosition::Append);
    system
}

/// Serve `files` as a directory under `root`
pub fn serve_directory(transport: &MemoryTransport, root: &str, files: &[(&str, &str)]) {
    transport.insert(root, "<html><body>Index of /</body></html>");
    for (path, content) in files {
        transport.insert(format!("{}/{}", root, path), *content);
    }
}

pub fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
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

pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes(files)).unwrap();
    encoder.finish().unwrap()
}

pub fn tar_bz2(files: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(&tar_bytes(files)).unwrap();
    encoder.finish().unwrap()
}

pub fn tar_xz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&tar_bytes(files)).unwrap();
    encoder.finish().unwrap()
}

pub fn zip_bytes(files: &[(&str, &str)], password: Option<&str>) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in files {
        let mut options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        if let Some(password) = password {
            options = options.with_deprecated_encryption(password.as_bytes());
        }
        zip.start_file(*path, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Script executor that counts executions and can stall each one
pub struct CountingExecutor {
    inner: ScriptExecutor,
    count: AtomicUsize,
    delay: Duration,
}

impl CountingExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: ScriptExecutor::new(),
            count: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl SourceExecutor for CountingExecutor {
    fn execute(&self, source: &str, module: &Arc<ModuleObject>, importer: &dyn Importer) -> Result<(), ImportError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.execute(source, module, importer)
    }
}

/// Minimal HTTP/1.1 server on localhost
pub struct TestServer {
    port: u16,
    routes: Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let routes: Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>> = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        let (server_routes, server_requests) = (routes.clone(), requests.clone());
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handle(stream, &server_routes, &server_requests);
            }
        });

        Self {
            port,
            routes,
            requests,
        }
    }

    /// `http://127.0.0.1:<port>`
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.serve_status(path, 200, body);
    }

    pub fn serve_status(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .insert(path.to_string(), (status, body.into()));
    }

    /// Raw request heads received so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

fn handle(
    mut stream: TcpStream,
    routes: &Mutex<HashMap<String, (u16, Vec<u8>)>>,
    requests: &Mutex<Vec<String>>,
) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => return,
        }
    }
    let head = String::from_utf8_lossy(&head).to_string();
    let path = head
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    requests.lock().push(head);

    let (status, body) = routes
        .lock()
        .get(&path)
        .cloned()
        .unwrap_or((404, b"not found".to_vec()));
    let reason = if status == 200 { "OK" } else { "Other" };
    let _ = write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}
