use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::bindings::Bindings;
use crate::catalog::{BoundCallback, HandlerCatalog};
use crate::error::LoadError;

/// `kind = "event"` manifest
#[derive(Debug, Clone, Deserialize)]
pub struct EventManifest {
    pub name: String,
    #[serde(default)]
    pub once: bool,
    /// Only events from this source are delivered; absent means any source
    #[serde(default)]
    pub source: Option<String>,
    pub handler: String,
}

/// A bound event listener
#[derive(Debug, Clone)]
pub struct EventListener {
    pub name: String,
    pub once: bool,
    pub source: Option<String>,
    pub callback: BoundCallback,
}

impl EventListener {
    pub fn new(name: impl Into<String>, callback: BoundCallback) -> Self {
        Self {
            name: name.into(),
            once: false,
            source: None,
            callback,
        }
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn restricted_to(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether an event emitted by `source` should reach this listener
    pub fn accepts(&self, source: &str) -> bool {
        self.source.as_deref().is_none_or(|wanted| wanted == source)
    }

    pub fn handle(&self, args: &[Value]) -> anyhow::Result<()> {
        self.callback.call(args)
    }
}

impl EventManifest {
    pub(crate) fn hydrate(
        self,
        file: &str,
        catalog: &HandlerCatalog,
        bindings: &Arc<Bindings>,
    ) -> Result<EventListener, LoadError> {
        let callback = BoundCallback::bind(
            &self.handler,
            catalog.resolve_callback(file, &self.handler)?,
            bindings.clone(),
        );

        Ok(EventListener {
            name: self.name,
            once: self.once,
            source: self.source,
            callback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hydrate_defaults() {
        let manifest: EventManifest = toml::from_str(
            r#"
            name = "ready"
            handler = "greet"
            "#,
        )
        .unwrap();

        let mut catalog = HandlerCatalog::new();
        catalog.callback("greet", |_, _| Ok(()));

        let listener = manifest
            .hydrate("ready", &catalog, &Arc::new(Bindings::new()))
            .unwrap();
        assert_eq!(listener.name, "ready");
        assert!(!listener.once);
        assert!(listener.accepts("client"));
        assert!(listener.accepts("anything"));
        assert_eq!(listener.callback.label(), "greet");
    }

    #[test]
    fn test_source_filter() {
        let listener = EventListener::new("ready", BoundCallback::from_fn("noop", |_| Ok(())))
            .restricted_to("other");

        assert!(listener.accepts("other"));
        assert!(!listener.accepts("client"));
    }

    #[test]
    fn test_unknown_handler() {
        let manifest: EventManifest =
            toml::from_str("name = \"ready\"\nhandler = \"missing\"").unwrap();

        let result = manifest.hydrate("ready", &HandlerCatalog::new(), &Arc::new(Bindings::new()));
        assert!(matches!(result, Err(LoadError::UnknownHandler { .. })));
    }
}
