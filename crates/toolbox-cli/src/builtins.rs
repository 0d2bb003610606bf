//! Handlers available to descriptors run by the `toolbox` binary
//!
//! Callbacks: `log`, `echo`, `noop`. Predicates: `always`, `never`,
//! `has_args`. Data builders: `version`.

use serde_json::{Value, json};
use toolbox_host::{Bindings, HandlerCatalog, HostConfig};
use tracing::info;

pub fn catalog() -> HandlerCatalog {
    let mut catalog = HandlerCatalog::new();
    catalog
        .callback("log", |_, args| {
            info!(target: "toolbox", "{}", render(args));
            Ok(())
        })
        .callback("echo", |_, args| {
            println!("{}", render(args));
            Ok(())
        })
        .callback("noop", |_, _| Ok(()))
        .predicate("always", |_, _| Ok(true))
        .predicate("never", |_, _| Ok(false))
        .predicate("has_args", |_, args| Ok(!args.is_empty()))
        .builder("version", version);
    catalog
}

/// Bindings handed to every descriptor: the loaded config
pub fn bindings(config: &HostConfig) -> Bindings {
    Bindings::new().with_option(config.clone())
}

fn version(bindings: &Bindings) -> anyhow::Result<Value> {
    let sources = bindings
        .find::<HostConfig>()
        .map(|config| config.sources.names.len())
        .unwrap_or_default();
    Ok(json!({
        "name": "version",
        "description": format!(
            "toolbox {} ({} auxiliary source(s))",
            env!("CARGO_PKG_VERSION"),
            sources
        ),
    }))
}

fn render(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
