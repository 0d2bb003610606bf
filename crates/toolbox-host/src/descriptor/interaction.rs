use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::bindings::Bindings;
use crate::catalog::{BoundCallback, HandlerCatalog};
use crate::error::LoadError;

/// `kind = "interaction"` manifest
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionManifest {
    pub custom_id: String,
    pub handler: String,
}

/// A component interaction handler, keyed by custom id
#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: String,
    pub callback: BoundCallback,
}

impl Interaction {
    pub fn handle(&self, args: &[Value]) -> anyhow::Result<()> {
        self.callback.call(args)
    }
}

impl InteractionManifest {
    pub(crate) fn hydrate(
        self,
        file: &str,
        catalog: &HandlerCatalog,
        bindings: &Arc<Bindings>,
    ) -> Result<Interaction, LoadError> {
        Ok(Interaction {
            callback: BoundCallback::bind(
                &self.handler,
                catalog.resolve_callback(file, &self.handler)?,
                bindings.clone(),
            ),
            id: self.custom_id,
        })
    }
}
