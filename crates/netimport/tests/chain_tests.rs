//! Chain ordering, scoped roots and concurrent imports

mod common;

use common::{serve_directory, system, system_with, CountingExecutor, ROOT};
use netimport::{
    ChainPosition, GitService, ImportError, MemoryTransport, RemoteImporter, RemoteRoot,
    RootOptions, Value,
};
use std::sync::Arc;
use std::time::Duration;

const OTHER: &str = "https://mirror.example.com/repo";

#[test]
fn test_concurrent_imports_execute_once() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, ROOT, &[("slow.py", "x = 1")]);
    let executor = Arc::new(CountingExecutor::new(Duration::from_millis(200)));
    let system = system_with(executor.clone(), transport);
    system.add_remote_repo(Some(ROOT), None).unwrap();

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| system.import_module("slow"));
        let b = s.spawn(|| system.import_module("slow"));
        (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
    });

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(executor.count(), 1);
}

#[test]
fn test_concurrent_imports_of_different_modules() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, ROOT, &[("one.py", "x = 1"), ("two.py", "x = 2")]);
    let executor = Arc::new(CountingExecutor::new(Duration::from_millis(20)));
    let system = system_with(executor.clone(), transport);
    system.add_remote_repo(Some(ROOT), None).unwrap();

    std::thread::scope(|s| {
        for name in ["one", "two", "one", "two"] {
            let system = &system;
            s.spawn(move || system.import_module(name).unwrap());
        }
    });

    assert_eq!(executor.count(), 2);
    assert_eq!(system.registry().len(), 2);
}

#[test]
fn test_prepended_root_wins() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, ROOT, &[("shared.py", "source = \"first\"")]);
    serve_directory(&transport, OTHER, &[("shared.py", "source = \"mirror\"")]);
    let system = system(transport.clone());

    system.add_remote_repo(Some(ROOT), None).unwrap();
    let mirror = RemoteRoot::new(OTHER, RootOptions::default(), transport.clone()).unwrap();
    system.register_root(mirror, ChainPosition::Prepend);

    assert_eq!(system.strategy_keys(), vec![OTHER, "builtin", ROOT]);
    let module = system.import_module("shared").unwrap();
    assert_eq!(module.get("source"), Some(Value::Str("mirror".to_string())));
}

#[test]
fn test_appended_root_is_a_fallback() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, ROOT, &[("shared.py", "source = \"first\"")]);
    serve_directory(&transport, OTHER, &[("shared.py", "source = \"mirror\""), ("extra.py", "")]);
    let system = system(transport.clone());
    system.add_remote_repo(Some(ROOT), None).unwrap();
    system.add_remote_repo(Some(OTHER), None).unwrap();

    let module = system.import_module("shared").unwrap();
    assert_eq!(module.get("source"), Some(Value::Str("first".to_string())));
    assert_eq!(system.import_module("extra").unwrap().loader(), OTHER);
}

#[test]
fn test_scoped_root_is_removed_after_failure() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, ROOT, &[("broken.py", "raise \"boom\"")]);
    let system = system(transport);

    let result = (|| {
        let _guard = system.remote_repo(Some(ROOT), None)?;
        assert_eq!(system.strategy_keys(), vec!["builtin", ROOT]);
        system.import_module("broken")
    })();

    assert!(matches!(result, Err(ImportError::Execution { .. })));
    assert_eq!(system.strategy_keys(), vec!["builtin"]);
}

#[test]
fn test_modules_outlive_their_scoped_root() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, ROOT, &[("kept.py", "x = 1")]);
    let system = system(transport);

    {
        let _guard = system.remote_repo(Some(ROOT), None).unwrap();
        system.import_module("kept").unwrap();
    }

    assert!(system.import_module("kept").is_ok());
    assert!(matches!(
        system.import_module("other"),
        Err(ImportError::ModuleNotFound(_))
    ));
}

#[test]
fn test_scoped_guard_keeps_identical_registration() {
    let transport = Arc::new(MemoryTransport::new());
    serve_directory(&transport, ROOT, &[]);
    let system = system(transport.clone());
    system.add_remote_repo(Some(ROOT), None).unwrap();

    {
        let root = RemoteRoot::new(ROOT, RootOptions::default(), transport.clone()).unwrap();
        let _guard = system.scoped(Arc::new(RemoteImporter::new(root)), ChainPosition::Prepend);
        assert_eq!(system.strategy_keys(), vec![ROOT, "builtin", ROOT]);
    }

    assert_eq!(system.strategy_keys(), vec!["builtin", ROOT]);
}

#[test]
fn test_unregister_normalizes_trailing_slash() {
    let transport = Arc::new(MemoryTransport::new());
    let system = system(transport);
    system.add_remote_repo(Some(&format!("{}/", ROOT)), None).unwrap();
    assert_eq!(system.strategy_keys(), vec!["builtin", ROOT]);

    assert!(system.unregister(&format!("{}/", ROOT)));
    assert!(!system.unregister(ROOT));
    assert_eq!(system.strategy_keys(), vec!["builtin"]);
}

#[test]
fn test_git_repo() {
    let transport = Arc::new(MemoryTransport::new());
    let base = "https://raw.githubusercontent.com/user/tools/v1.0";
    serve_directory(&transport, base, &[("tool.py", "name = \"tool\"")]);
    let system = system(transport.clone());

    let module = {
        let guard = system
            .git_repo(GitService::GitHub, "user", "tools", Some("v1.0"), None, None)
            .unwrap();
        assert_eq!(guard.key(), base);
        system.import_module("tool").unwrap()
    };

    assert_eq!(module.origin(), Some(format!("{}/tool.py", base).as_str()));
    assert_eq!(system.strategy_keys(), vec!["builtin"]);
}

#[test]
fn test_gitlab_default_ref() {
    let transport = Arc::new(MemoryTransport::new());
    let base = "https://gitlab.com/group/lib/raw/master";
    serve_directory(&transport, base, &[("lib.py", "")]);
    let system = system(transport);

    let _guard = system
        .git_repo(GitService::GitLab, "group", "lib", None, None, None)
        .unwrap();
    assert_eq!(system.import_module("lib").unwrap().loader(), base);
}
