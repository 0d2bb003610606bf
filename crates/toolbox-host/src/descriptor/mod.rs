//! Descriptor manifests
//!
//! Every descriptor file carries an explicit `kind` discriminant. A file
//! without a recognised kind is treated as an incidental helper file and is
//! ignored by every category.

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::bindings::Bindings;
use crate::catalog::HandlerCatalog;
use crate::error::LoadError;
use crate::loader::LoadedModule;
use crate::service::Service;

mod command;
mod event;
mod interaction;
mod service;

pub use command::{Command, CommandManifest, CommandPart, HydratedCommand, PartManifest};
pub use event::{EventListener, EventManifest};
pub use interaction::{Interaction, InteractionManifest};
pub use service::{GateManifest, ServiceManifest};

/// Discriminant of a descriptor manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Command,
    Event,
    Interaction,
    Service,
}

impl DescriptorKind {
    /// Kind declared by a manifest, if it declares a known one
    pub fn of(value: &toml::Table) -> Option<Self> {
        match value.get("kind")?.as_str()? {
            "command" => Some(Self::Command),
            "event" => Some(Self::Event),
            "interaction" => Some(Self::Interaction),
            "service" => Some(Self::Service),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Event => "event",
            Self::Interaction => "interaction",
            Self::Service => "service",
        }
    }

    /// Category name used in logs
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Command => "commands",
            Self::Event => "events",
            Self::Interaction => "interactions",
            Self::Service => "services",
        }
    }
}

impl std::fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, not yet hydrated descriptor
#[derive(Debug, Clone)]
pub enum Descriptor {
    Command(CommandManifest),
    Event(EventManifest),
    Interaction(InteractionManifest),
    Service(ServiceManifest),
}

/// A descriptor whose handlers are resolved and bound
#[derive(Debug)]
pub enum Hydrated {
    Command(Command),
    Event(EventListener),
    Interaction(Interaction),
    Service(Arc<Service>),
}

impl Descriptor {
    /// Parse `module` if it declares the `expected` kind
    ///
    /// Returns `Ok(None)` for files of any other kind.
    pub fn parse(
        module: &LoadedModule,
        expected: DescriptorKind,
    ) -> Result<Option<Self>, LoadError> {
        let file = module.identifier.as_str();
        if DescriptorKind::of(&module.value) != Some(expected) {
            return Ok(None);
        }

        let descriptor = match expected {
            DescriptorKind::Command => Self::Command(manifest(file, expected, &module.value)?),
            DescriptorKind::Event => Self::Event(manifest(file, expected, &module.value)?),
            DescriptorKind::Interaction => {
                Self::Interaction(manifest(file, expected, &module.value)?)
            }
            DescriptorKind::Service => Self::Service(manifest(file, expected, &module.value)?),
        };
        Ok(Some(descriptor))
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Command(_) => DescriptorKind::Command,
            Self::Event(_) => DescriptorKind::Event,
            Self::Interaction(_) => DescriptorKind::Interaction,
            Self::Service(_) => DescriptorKind::Service,
        }
    }

    /// Resolve handler names and bind them to the injected arguments
    pub fn hydrate(
        self,
        file: &str,
        catalog: &HandlerCatalog,
        bindings: &Arc<Bindings>,
    ) -> Result<Hydrated, LoadError> {
        Ok(match self {
            Self::Command(manifest) => {
                Hydrated::Command(manifest.hydrate(file, catalog, bindings)?)
            }
            Self::Event(manifest) => Hydrated::Event(manifest.hydrate(file, catalog, bindings)?),
            Self::Interaction(manifest) => {
                Hydrated::Interaction(manifest.hydrate(file, catalog, bindings)?)
            }
            Self::Service(manifest) => {
                Hydrated::Service(Arc::new(manifest.hydrate(file, catalog, bindings)?))
            }
        })
    }
}

fn manifest<T: DeserializeOwned>(
    file: &str,
    kind: DescriptorKind,
    value: &toml::Table,
) -> Result<T, LoadError> {
    toml::Value::Table(value.clone())
        .try_into()
        .map_err(|e: toml::de::Error| invalid(file, kind, e.message()))
}

pub(crate) fn invalid(file: &str, kind: DescriptorKind, reason: impl Into<String>) -> LoadError {
    LoadError::Invalid {
        file: file.to_string(),
        kind,
        reason: reason.into(),
    }
}
