//! Service lifecycle driven by the registry

use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use toolbox_host::{HandlerCatalog, Registry, Value};

fn catalog(ticks: Arc<AtomicUsize>) -> HandlerCatalog {
    let mut catalog = HandlerCatalog::new();
    catalog
        .callback("tick", move |_, _| {
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .predicate("first_arg_is_go", |_, args: &[Value]| {
            Ok(args.first() == Some(&json!("go")))
        })
        .predicate("never", |_, _| Ok(false));
    catalog
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn registry(dir: &Path, ticks: Arc<AtomicUsize>) -> Registry {
    Registry::builder()
        .services(dir)
        .catalog(catalog(ticks))
        .build()
}

#[tokio::test]
async fn test_autostart_services_start_after_load() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "heartbeat.toml",
        "kind = \"service\"\nid = \"heartbeat\"\ncron = \"* * * * * *\"\nhandler = \"tick\"\n",
    );
    let ticks = Arc::new(AtomicUsize::new(0));
    let registry = registry(dir.path(), ticks.clone());

    assert!(registry.load());
    let service = registry.service("heartbeat").unwrap();
    assert!(service.autostart());
    assert!(service.is_running());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(ticks.load(Ordering::SeqCst) >= 1);

    assert_eq!(registry.stop_services(), 1);
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_startup_and_shutdown_triggers() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "announcer.toml",
        r#"
        kind = "service"
        id = "announcer"
        cron = "0 0 * * *"
        handler = "tick"

        [startup]
        event = "ready"
        predicate = "first_arg_is_go"

        [shutdown]
        event = "disconnect"
        once = true
        "#,
    );
    let registry = registry(dir.path(), Arc::new(AtomicUsize::new(0)));

    assert!(registry.load());
    let service = registry.service("announcer").unwrap();
    assert!(!service.autostart());
    assert!(!service.is_running());
    assert_eq!(registry.listener_count("ready"), 1);

    // Predicate rejects the event
    registry.emit("ready", &[json!("wait")]);
    assert!(!service.is_running());

    registry.emit("ready", &[json!("go")]);
    assert!(service.is_running());

    registry.emit("disconnect", &[]);
    assert!(!service.is_running());
    assert_eq!(registry.listener_count("disconnect"), 0);
    assert_eq!(registry.listener_count("ready"), 1);
}

#[tokio::test]
async fn test_reload_stops_replaced_services() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "heartbeat.toml",
        "kind = \"service\"\nid = \"heartbeat\"\ncron = \"*/5 * * * *\"\nhandler = \"tick\"\n",
    );
    let registry = registry(dir.path(), Arc::new(AtomicUsize::new(0)));
    assert!(registry.load());
    let first = registry.service("heartbeat").unwrap();
    assert!(first.is_running());

    assert!(registry.reload());
    let second = registry.service("heartbeat").unwrap();
    assert!(!first.is_running());
    assert!(second.is_running());
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_failed_reload_restarts_previous_services() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "heartbeat.toml",
        "kind = \"service\"\nid = \"heartbeat\"\ncron = \"*/5 * * * *\"\nhandler = \"tick\"\n",
    );
    let registry = registry(dir.path(), Arc::new(AtomicUsize::new(0)));
    assert!(registry.load());
    let original = registry.service("heartbeat").unwrap();

    write(
        dir.path(),
        "heartbeat_copy.toml",
        "kind = \"service\"\nid = \"heartbeat\"\ncron = \"*/5 * * * *\"\nhandler = \"tick\"\n",
    );
    assert!(!registry.reload());

    let restored = registry.service("heartbeat").unwrap();
    assert!(Arc::ptr_eq(&original, &restored));
    assert!(restored.is_running());
}

#[test]
fn test_gate_closed_skips_tick() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "gated.toml",
        "kind = \"service\"\nid = \"gated\"\ncron = \"* * * * *\"\nhandler = \"tick\"\ngate = \"never\"\n",
    );
    let ticks = Arc::new(AtomicUsize::new(0));
    let registry = registry(dir.path(), ticks.clone());

    // No runtime: loading succeeds, starting fails closed
    assert!(registry.load());
    let service = registry.service("gated").unwrap();
    assert!(!service.is_running());

    assert!(!service.run_once());
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
}
