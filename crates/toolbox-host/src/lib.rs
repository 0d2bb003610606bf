//! Extension host runtime
//!
//! Discovers descriptor manifests in category directories, binds them to
//! compiled handlers, routes events from instrumented sources to the matching
//! listeners, and runs scheduled services. A whole extension set is loaded at
//! once and rolled back if any part of it fails.

pub mod bindings;
pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod registrar;
pub mod registry;
pub mod reload;
pub mod router;
pub mod scanner;
pub mod service;

pub use bindings::Bindings;
pub use catalog::{BoundCallback, BoundPredicate, HandlerCatalog};
pub use config::{ConfigLoadError, HostConfig};
pub use descriptor::{DescriptorKind, EventListener, HydratedCommand, Interaction};
pub use error::{LoadError, ScheduleError};
pub use registrar::{CommandPublisher, Registrar, Selection};
pub use registry::{
    CategoryPaths, Collections, HANDLER_SOURCE, LOAD_EVENT, LOAD_FAILED_EVENT, Registry,
    RegistryBuilder,
};
pub use reload::{
    ReloadReason, ReloadSignal, ReloadTrigger, forward_sigusr2, reload_channel, setup_reload_signal,
};
pub use scanner::{ScanResult, TreeScanner};
pub use service::{EventGate, Service};

#[cfg(feature = "discord")]
pub use registrar::DiscordPublisher;

pub use toolbox_events::{EventObserver, EventSource, PRIMARY_SOURCE, Value};
