//! Global context under concurrent access; local context isolation.

use std::sync::Arc;
use std::thread;

use supernode::context::{Context, ContextError, GlobalContext};

#[test]
fn test_concurrent_apply_loses_no_updates() {
    let global = Arc::new(GlobalContext::new());
    global.set("counter", 0i64);

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let global = Arc::clone(&global);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    assert!(global.apply::<i64, _>("counter", |n| *n += 1).unwrap());
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(global.get::<i64>("counter").unwrap(), 8_000);
}

#[test]
fn test_concurrent_writers_on_distinct_keys() {
    let global = Arc::new(GlobalContext::new());

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let global = Arc::clone(&global);
            thread::spawn(move || {
                for i in 0..250 {
                    global.set(format!("k{t}-{i}"), i as u64);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(global.len(), 1_000);
    assert_eq!(global.get::<u64>("k3-249").unwrap(), 249);
}

#[test]
fn test_local_context_is_private_to_its_task() {
    let global = Arc::new(GlobalContext::new());
    let mut a = Context::new(Arc::clone(&global));
    let b = Context::new(Arc::clone(&global));

    a.local.set("session", "alice");
    a.global.set("shared", true);

    assert!(!b.local.has_key("session"));
    assert!(b.global.get::<bool>("shared").unwrap());
}

#[test]
fn test_remove_then_set_and_type_mismatch() {
    let global = GlobalContext::new();
    assert!(!global.remove("absent"));

    global.set("k", "one");
    assert!(global.remove("k"));
    assert!(!global.remove("k"));
    assert!(!global.has_key("k"));

    global.set("k", 2i64);
    assert_eq!(global.get::<i64>("k").unwrap(), 2);
    assert!(matches!(
        global.get::<String>("k"),
        Err(ContextError::TypeMismatch { .. })
    ));
}
