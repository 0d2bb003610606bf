use serde::Deserialize;
use std::sync::Arc;

use crate::bindings::Bindings;
use crate::catalog::{BoundCallback, BoundPredicate, HandlerCatalog};
use crate::error::LoadError;
use crate::service::{EventGate, Service};

/// `kind = "service"` manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceManifest {
    pub id: String,
    pub cron: String,
    pub handler: String,
    /// Predicate evaluated before every tick
    #[serde(default)]
    pub gate: Option<String>,
    #[serde(default)]
    pub startup: Option<GateManifest>,
    #[serde(default)]
    pub shutdown: Option<GateManifest>,
}

/// `[startup]` / `[shutdown]` table of a service manifest
///
/// A table without an `event` declares no trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateManifest {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub once: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub predicate: Option<String>,
}

impl GateManifest {
    fn hydrate(
        self,
        file: &str,
        catalog: &HandlerCatalog,
        bindings: &Arc<Bindings>,
    ) -> Result<Option<EventGate>, LoadError> {
        let Some(event) = self.event else {
            return Ok(None);
        };

        let predicate = self
            .predicate
            .map(|name| {
                catalog
                    .resolve_predicate(file, &name)
                    .map(|predicate| BoundPredicate::bind(name, predicate, bindings.clone()))
            })
            .transpose()?;

        Ok(Some(EventGate {
            event,
            once: self.once,
            source: self.source,
            predicate,
        }))
    }
}

impl ServiceManifest {
    pub(crate) fn hydrate(
        self,
        file: &str,
        catalog: &HandlerCatalog,
        bindings: &Arc<Bindings>,
    ) -> Result<Service, LoadError> {
        let callback = BoundCallback::bind(
            &self.handler,
            catalog.resolve_callback(file, &self.handler)?,
            bindings.clone(),
        );

        let mut service =
            Service::new(&self.id, &self.cron, callback).map_err(|source| LoadError::Schedule {
                file: file.to_string(),
                source,
            })?;

        if let Some(name) = self.gate {
            let predicate = catalog.resolve_predicate(file, &name)?;
            service = service.with_gate(BoundPredicate::bind(name, predicate, bindings.clone()));
        }
        if let Some(gate) = self.startup {
            if let Some(gate) = gate.hydrate(file, catalog, bindings)? {
                service = service.with_startup(gate);
            }
        }
        if let Some(gate) = self.shutdown {
            if let Some(gate) = gate.hydrate(file, catalog, bindings)? {
                service = service.with_shutdown(gate);
            }
        }

        Ok(service)
    }
}
