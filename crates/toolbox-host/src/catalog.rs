//! Named descriptor code
//!
//! Descriptor manifests refer to their callbacks by name. The host registers
//! the compiled code under those names in a [`HandlerCatalog`], and hydration
//! binds each resolved function to the injected [`Bindings`].

use anyhow::anyhow;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::bindings::Bindings;
use crate::error::LoadError;

/// Callback invoked with the injected bindings and the event/command arguments
pub type Callback = Arc<dyn Fn(&Bindings, &[Value]) -> anyhow::Result<()> + Send + Sync>;

/// Gate evaluated before a triggered action
pub type Predicate = Arc<dyn Fn(&Bindings, &[Value]) -> anyhow::Result<bool> + Send + Sync>;

/// Builds a command payload from the injected bindings
pub type DataBuilder = Arc<dyn Fn(&Bindings) -> anyhow::Result<Value> + Send + Sync>;

/// Registry of named callbacks, predicates and data builders
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    callbacks: HashMap<String, Callback>,
    predicates: HashMap<String, Predicate>,
    builders: HashMap<String, DataBuilder>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&Bindings, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
        self
    }

    pub fn predicate<F>(&mut self, name: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&Bindings, &[Value]) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn builder<F>(&mut self, name: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(&Bindings) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.builders.insert(name.into(), Arc::new(builder));
        self
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub(crate) fn resolve_callback(&self, file: &str, name: &str) -> Result<Callback, LoadError> {
        self.callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| unknown(file, "callback", name))
    }

    pub(crate) fn resolve_predicate(&self, file: &str, name: &str) -> Result<Predicate, LoadError> {
        self.predicates
            .get(name)
            .cloned()
            .ok_or_else(|| unknown(file, "predicate", name))
    }

    pub(crate) fn resolve_builder(&self, file: &str, name: &str) -> Result<DataBuilder, LoadError> {
        self.builders
            .get(name)
            .cloned()
            .ok_or_else(|| unknown(file, "data builder", name))
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .field("builders", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn unknown(file: &str, what: &'static str, name: &str) -> LoadError {
    LoadError::UnknownHandler {
        file: file.to_string(),
        what,
        name: name.to_string(),
    }
}

type BoundFn = dyn Fn(&[Value]) -> anyhow::Result<()> + Send + Sync;
type BoundGate = dyn Fn(&[Value]) -> anyhow::Result<bool> + Send + Sync;

/// A callback with its injected bindings already applied
#[derive(Clone)]
pub struct BoundCallback {
    label: String,
    func: Arc<BoundFn>,
}

impl BoundCallback {
    pub fn bind(label: impl Into<String>, callback: Callback, bindings: Arc<Bindings>) -> Self {
        Self {
            label: label.into(),
            func: Arc::new(move |args: &[Value]| callback(&bindings, args)),
        }
    }

    pub fn from_fn<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    /// Name of the handler this callback was bound from
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Invoke the callback. Panics are caught and reported as errors.
    pub fn call(&self, args: &[Value]) -> anyhow::Result<()> {
        guarded(&self.label, || (self.func)(args))
    }
}

impl std::fmt::Debug for BoundCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoundCallback").field(&self.label).finish()
    }
}

/// A predicate with its injected bindings already applied
#[derive(Clone)]
pub struct BoundPredicate {
    label: String,
    func: Arc<BoundGate>,
}

impl BoundPredicate {
    pub fn bind(label: impl Into<String>, predicate: Predicate, bindings: Arc<Bindings>) -> Self {
        Self {
            label: label.into(),
            func: Arc::new(move |args: &[Value]| predicate(&bindings, args)),
        }
    }

    pub fn from_fn<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn call(&self, args: &[Value]) -> anyhow::Result<bool> {
        guarded(&self.label, || (self.func)(args))
    }
}

impl std::fmt::Debug for BoundPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoundPredicate").field(&self.label).finish()
    }
}

/// Run user code, turning a panic into an error
pub(crate) fn guarded<T>(label: &str, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("{} panicked: {}", label, panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_callback_receives_bindings() {
        let mut catalog = HandlerCatalog::new();
        catalog.callback("greet", |bindings, args| {
            let prefix = bindings.option::<String>(0).cloned().unwrap_or_default();
            anyhow::ensure!(args.len() == 1, "expected one argument");
            anyhow::ensure!(prefix == "hi", "unexpected prefix {prefix}");
            Ok(())
        });

        let callback = catalog.resolve_callback("greet", "greet").unwrap();
        let bindings = Arc::new(Bindings::new().with_option(String::from("hi")));
        let bound = BoundCallback::bind("greet", callback, bindings);

        assert_eq!(bound.label(), "greet");
        assert!(bound.call(&[Value::from(1)]).is_ok());
        assert!(bound.call(&[]).is_err());
    }

    #[test]
    fn test_unknown_names_are_load_errors() {
        let catalog = HandlerCatalog::new();
        let err = catalog.resolve_callback("ping", "missing").err().unwrap();
        assert!(matches!(err, LoadError::UnknownHandler { what: "callback", .. }));
        assert!(catalog.resolve_predicate("ping", "missing").is_err());
        assert!(catalog.resolve_builder("ping", "missing").is_err());
    }

    #[test]
    fn test_panics_become_errors() {
        let bound = BoundCallback::from_fn("boom", |_| panic!("exploded"));
        let err = bound.call(&[]).unwrap_err();
        assert!(err.to_string().contains("boom panicked: exploded"));

        let gate = BoundPredicate::from_fn("gate", |_| panic!("{}", String::from("owned")));
        assert!(gate.call(&[]).unwrap_err().to_string().contains("owned"));
    }
}
