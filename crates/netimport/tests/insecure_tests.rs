//! Process-wide insecure mode. Kept in its own test binary since it flips a
//! global.

mod common;

use common::{serve_directory, system};
use netimport::{set_insecure, ImportError, MemoryTransport, RootOptions};
use std::sync::Arc;

const PLAIN: &str = "http://plain.example.com/repo";

#[test]
fn test_insecure_mode_allows_plaintext() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, PLAIN, &[("plain.py", "x = 1")]);
    let system = system(transport);

    assert!(!netimport::insecure());
    assert!(matches!(
        system.load_from("plain", PLAIN, RootOptions::default()),
        Err(ImportError::PlaintextNotAllowed(_))
    ));

    set_insecure(true);
    let loaded = system.load_from("plain", PLAIN, RootOptions::default());
    set_insecure(false);

    assert!(loaded.is_ok());
    assert!(!netimport::insecure());
}
