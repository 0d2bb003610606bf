/// Event source primitives for toolbox
///
/// This crate provides the named emitters that the extension host instruments,
/// so platform clients and auxiliary sources can share one event model without
/// depending on the registry crate.
pub use serde_json::Value;

mod instrument;
mod source;

pub use instrument::{EventObserver, InstrumentedSource, instrument};
pub use source::{EventSource, Listener, ListenerId, Tap};

/// Name of the primary (platform client) event source
pub const PRIMARY_SOURCE: &str = "client";
