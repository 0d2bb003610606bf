//! Extension registry
//!
//! Owns the name-keyed collections of every descriptor kind, the staged
//! load/reload/rollback cycle, and dispatch of events from every instrumented
//! source to the matching listeners.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use toolbox_events::{EventObserver, EventSource, InstrumentedSource, PRIMARY_SOURCE, instrument};
use tracing::{debug, error, info, warn};

use crate::bindings::Bindings;
use crate::catalog::{BoundCallback, HandlerCatalog, guarded};
use crate::descriptor::{
    Command, Descriptor, DescriptorKind, EventListener, Hydrated, HydratedCommand, Interaction,
};
use crate::error::LoadError;
use crate::loader;
use crate::router::WildcardRouter;
use crate::service::{EventGate, Service};

/// Name of the registry's own source, which carries lifecycle events
pub const HANDLER_SOURCE: &str = "handler";

/// Emitted on [`HANDLER_SOURCE`] after a successful load
pub const LOAD_EVENT: &str = "load";

/// Emitted on [`HANDLER_SOURCE`] after a failed load was rolled back
pub const LOAD_FAILED_EVENT: &str = "loadFailed";

/// Directory of each descriptor category; unset categories are not loaded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryPaths {
    pub commands: Option<PathBuf>,
    pub events: Option<PathBuf>,
    pub interactions: Option<PathBuf>,
    pub services: Option<PathBuf>,
}

impl CategoryPaths {
    pub fn get(&self, kind: DescriptorKind) -> Option<&Path> {
        match kind {
            DescriptorKind::Command => self.commands.as_deref(),
            DescriptorKind::Event => self.events.as_deref(),
            DescriptorKind::Interaction => self.interactions.as_deref(),
            DescriptorKind::Service => self.services.as_deref(),
        }
    }

    /// Every configured directory, in load order
    pub fn roots(&self) -> Vec<PathBuf> {
        LOAD_ORDER
            .iter()
            .filter_map(|kind| self.get(*kind).map(Path::to_path_buf))
            .collect()
    }

    /// Resolve relative paths against `base`
    pub fn resolved_against(self, base: &Path) -> Self {
        let resolve = |path: Option<PathBuf>| {
            path.map(|p| if p.is_relative() { base.join(p) } else { p })
        };
        Self {
            commands: resolve(self.commands),
            events: resolve(self.events),
            interactions: resolve(self.interactions),
            services: resolve(self.services),
        }
    }
}

const LOAD_ORDER: [DescriptorKind; 4] = [
    DescriptorKind::Command,
    DescriptorKind::Event,
    DescriptorKind::Interaction,
    DescriptorKind::Service,
];

/// The live (or rolled back) extension set
///
/// Text commands are keyed by name and by every alias, each entry holding the
/// same command.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub events: BTreeMap<String, Vec<EventListener>>,
    pub slash_commands: BTreeMap<String, HydratedCommand>,
    pub beta_commands: BTreeMap<String, HydratedCommand>,
    pub context_menus: BTreeMap<String, HydratedCommand>,
    pub text_commands: BTreeMap<String, HydratedCommand>,
    pub interactions: BTreeMap<String, Interaction>,
    pub services: BTreeMap<String, Arc<Service>>,
    router: WildcardRouter,
}

impl Collections {
    pub fn listener_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.slash_commands.is_empty()
            && self.beta_commands.is_empty()
            && self.context_menus.is_empty()
            && self.text_commands.is_empty()
            && self.interactions.is_empty()
            && self.services.is_empty()
    }

    fn insert_command(&mut self, file: &str, command: Command) -> Result<(), LoadError> {
        if let Some(part) = command.primary {
            let name = part.name().to_string();
            insert_unique(&mut self.slash_commands, file, "slash command name", name, part)?;
        }
        if let Some(part) = command.beta {
            let name = part.name().to_string();
            insert_unique(&mut self.beta_commands, file, "beta slash command name", name, part)?;
        }
        if let Some(part) = command.context_menu {
            let name = part.name().to_string();
            insert_unique(&mut self.context_menus, file, "context menu command name", name, part)?;
        }
        if let Some(part) = command.text {
            for alias in part.aliases() {
                let (alias, command) = (alias.clone(), part.clone());
                insert_unique(&mut self.text_commands, file, "text command alias", alias, command)?;
            }
            let name = part.name().to_string();
            insert_unique(&mut self.text_commands, file, "text command name", name, part)?;
        }
        Ok(())
    }

    fn insert_interaction(&mut self, file: &str, interaction: Interaction) -> Result<(), LoadError> {
        let id = interaction.id.clone();
        insert_unique(&mut self.interactions, file, "interaction custom id", id, interaction)
    }

    fn insert_service(&mut self, file: &str, service: Arc<Service>) -> Result<(), LoadError> {
        if let Some(gate) = service.startup() {
            self.add_listener(power_listener(&service, gate, PowerAction::Start));
        }
        if let Some(gate) = service.shutdown() {
            self.add_listener(power_listener(&service, gate, PowerAction::Stop));
        }
        insert_unique(&mut self.services, file, "service id", service.id().to_string(), service)
    }

    fn add_listener(&mut self, listener: EventListener) {
        self.events.entry(listener.name.clone()).or_default().push(listener);
    }

    /// Listeners for `event` from `source`, in registration order
    ///
    /// Matched once-listeners are removed before they are returned.
    fn take_matching(&mut self, source: &str, event: &str) -> Vec<EventListener> {
        let keys = self.router.resolve(event, self.events.keys());
        let mut fired = Vec::new();
        for key in keys {
            let Some(bucket) = self.events.get_mut(&key) else {
                continue;
            };
            fired.extend(bucket.iter().filter(|l| l.accepts(source)).cloned());
            bucket.retain(|l| !(l.once && l.accepts(source)));
        }
        fired
    }

    fn stop_services(&self) -> usize {
        self.services.values().filter(|s| s.stop()).count()
    }
}

fn insert_unique<V>(
    map: &mut BTreeMap<String, V>,
    file: &str,
    what: &'static str,
    key: String,
    value: V,
) -> Result<(), LoadError> {
    match map.entry(key) {
        Entry::Occupied(entry) => Err(LoadError::Duplicate {
            file: file.to_string(),
            what,
            name: entry.key().clone(),
        }),
        Entry::Vacant(entry) => {
            entry.insert(value);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PowerAction {
    Start,
    Stop,
}

/// Ordinary event listener that starts or stops `service` when its gate passes
fn power_listener(service: &Arc<Service>, gate: &EventGate, action: PowerAction) -> EventListener {
    let target: Weak<Service> = Arc::downgrade(service);
    let predicate = gate.predicate.clone();
    let label = match action {
        PowerAction::Start => format!("{}:startup", service.id()),
        PowerAction::Stop => format!("{}:shutdown", service.id()),
    };

    let callback = BoundCallback::from_fn(label, move |args| {
        let Some(service) = target.upgrade() else {
            return Ok(());
        };
        let open = match &predicate {
            Some(predicate) => predicate.call(args)?,
            None => true,
        };
        if open {
            match action {
                PowerAction::Start => service.start(),
                PowerAction::Stop => service.stop(),
            };
        }
        Ok(())
    });

    EventListener {
        name: gate.event.clone(),
        once: gate.once,
        source: gate.source.clone(),
        callback,
    }
}

#[derive(Default)]
struct State {
    live: Collections,
    rollback: Option<Collections>,
}

struct Inner {
    paths: CategoryPaths,
    catalog: HandlerCatalog,
    bindings: Arc<Bindings>,
    primary: Arc<InstrumentedSource>,
    handler: Arc<InstrumentedSource>,
    auxiliary: BTreeMap<String, Arc<InstrumentedSource>>,
    state: Mutex<State>,
    watchers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

/// Forwards instrumented emissions into the registry without keeping it alive
struct Dispatcher {
    inner: Weak<Inner>,
}

impl EventObserver for Dispatcher {
    fn observe(&self, source: &str, event: &str, args: &[Value]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.dispatch(source, event, args);
        }
    }
}

/// Builder for [`Registry`]
#[derive(Default)]
pub struct RegistryBuilder {
    paths: CategoryPaths,
    catalog: HandlerCatalog,
    bindings: Bindings,
    primary: Option<Arc<EventSource>>,
    sources: Vec<(String, Arc<EventSource>)>,
}

impl RegistryBuilder {
    pub fn paths(mut self, paths: CategoryPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn commands(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.commands = Some(path.into());
        self
    }

    pub fn events(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.events = Some(path.into());
        self
    }

    pub fn interactions(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.interactions = Some(path.into());
        self
    }

    pub fn services(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.services = Some(path.into());
        self
    }

    pub fn catalog(mut self, catalog: HandlerCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Use an existing emitter as the primary (`client`) source
    pub fn primary(mut self, source: Arc<EventSource>) -> Self {
        self.primary = Some(source);
        self
    }

    /// Add an auxiliary source under `name`
    pub fn source(mut self, name: impl Into<String>, source: Arc<EventSource>) -> Self {
        self.sources.push((name.into(), source));
        self
    }

    pub fn build(self) -> Registry {
        let mut auxiliary = BTreeMap::new();
        for (name, source) in self.sources {
            if name == PRIMARY_SOURCE || name == HANDLER_SOURCE {
                warn!(target: "registry", "Source name {} is reserved, ignoring it", name);
                continue;
            }
            if auxiliary.contains_key(&name) {
                warn!(target: "registry", "Source {} registered twice, keeping the first", name);
                continue;
            }
            auxiliary.insert(name.clone(), instrument(name, source));
        }

        let inner = Arc::new(Inner {
            paths: self.paths,
            catalog: self.catalog,
            bindings: Arc::new(self.bindings),
            primary: instrument(PRIMARY_SOURCE, self.primary.unwrap_or_default()),
            handler: instrument(HANDLER_SOURCE, Arc::new(EventSource::new())),
            auxiliary,
            state: Mutex::new(State::default()),
            watchers: RwLock::new(Vec::new()),
        });

        let dispatcher: Arc<dyn EventObserver> = Arc::new(Dispatcher {
            inner: Arc::downgrade(&inner),
        });
        inner.primary.observe_all(dispatcher.clone());
        inner.handler.observe_all(dispatcher.clone());
        for source in inner.auxiliary.values() {
            source.observe_all(dispatcher.clone());
        }

        Registry { inner }
    }
}

/// Dynamic extension registry and event router
///
/// Cloning is cheap; every clone shares the same collections and sources.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Load every configured category into a fresh extension set
    ///
    /// All categories are attempted. If any fails, the staged set is
    /// discarded, the snapshot taken by the last [`clear`](Self::clear) (if
    /// any) is restored, and `false` is returned. Autostart services of
    /// whichever set ends up live are started afterwards.
    pub fn load(&self) -> bool {
        let mut staging = Collections::default();
        let mut ok = true;

        for kind in LOAD_ORDER {
            let Some(root) = self.inner.paths.get(kind) else {
                continue;
            };
            match self.load_category(kind, root, &mut staging) {
                Ok(count) => info!(
                    target: "registry",
                    "Loaded {} {} from {}",
                    count,
                    kind.plural(),
                    root.display()
                ),
                Err(e) => {
                    error!(target: "registry", "Failed to load {}: {}", kind.plural(), e);
                    ok = false;
                }
            }
        }

        if ok {
            let previous = {
                let mut state = self.inner.state.lock();
                state.rollback = None;
                std::mem::replace(&mut state.live, staging)
            };
            previous.stop_services();
            self.inner.handler.emit(LOAD_EVENT, &[]);
        } else {
            warn!(target: "registry", "Load failed, keeping the previous extension set");
            if self.restore() {
                info!(target: "registry", "Restored the previous extension set");
            }
            self.inner.handler.emit(LOAD_FAILED_EVENT, &[]);
        }

        self.start_services();
        ok
    }

    /// Clear, then load
    pub fn reload(&self) -> bool {
        info!(target: "registry", "Reloading extensions");
        self.clear();
        self.load()
    }

    /// Move the live set into the rollback slot and stop its services
    ///
    /// Any earlier rollback snapshot is discarded.
    pub fn clear(&self) {
        let services: Vec<Arc<Service>> = {
            let mut state = self.inner.state.lock();
            let mut snapshot = std::mem::take(&mut state.live);
            snapshot.router.invalidate();
            let services = snapshot.services.values().cloned().collect();
            state.rollback = Some(snapshot);
            services
        };
        let stopped = services.iter().filter(|s| s.stop()).count();
        debug!(target: "registry", "Cleared extensions, stopped {} service(s)", stopped);
    }

    /// Move the rollback snapshot back into place; false without a snapshot
    fn restore(&self) -> bool {
        let mut state = self.inner.state.lock();
        match state.rollback.take() {
            Some(mut snapshot) => {
                snapshot.router.invalidate();
                state.live = snapshot;
                true
            }
            None => false,
        }
    }

    fn load_category(
        &self,
        kind: DescriptorKind,
        root: &Path,
        staging: &mut Collections,
    ) -> Result<usize, LoadError> {
        let mut count = 0;
        for module in loader::load_tree(root)? {
            if module.is_disabled() {
                info!(target: "registry", "Skipped {} {}", kind, module.identifier);
                continue;
            }
            let Some(descriptor) = Descriptor::parse(&module, kind)? else {
                debug!(
                    target: "registry",
                    "Ignoring {}, not a {} descriptor",
                    module.path.display(),
                    kind
                );
                continue;
            };

            let file = module.identifier.as_str();
            match descriptor.hydrate(file, &self.inner.catalog, &self.inner.bindings)? {
                Hydrated::Command(command) => staging.insert_command(file, command)?,
                Hydrated::Event(listener) => staging.add_listener(listener),
                Hydrated::Interaction(interaction) => {
                    staging.insert_interaction(file, interaction)?
                }
                Hydrated::Service(service) => staging.insert_service(file, service)?,
            }
            count += 1;
        }
        Ok(count)
    }

    /// Route an event to the matching listeners directly
    ///
    /// Returns the number of listeners invoked. Listener failures are logged
    /// and never stop the remaining listeners.
    pub fn dispatch(&self, source: &str, event: &str, args: &[Value]) -> usize {
        self.inner.dispatch(source, event, args)
    }

    /// Emit an event on the primary source
    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        self.inner.primary.emit(event, args)
    }

    /// Emit an event through the named instrumented source
    ///
    /// Returns false if no such source exists.
    pub fn emit_on(&self, source: &str, event: &str, args: &[Value]) -> bool {
        match self.source(source) {
            Some(source) => {
                source.emit(event, args);
                true
            }
            None => {
                warn!(target: "registry", "Unknown source {}, dropping {}", source, event);
                false
            }
        }
    }

    /// Instrumented source by name, including `client` and `handler`
    pub fn source(&self, name: &str) -> Option<Arc<InstrumentedSource>> {
        match name {
            PRIMARY_SOURCE => Some(self.inner.primary.clone()),
            HANDLER_SOURCE => Some(self.inner.handler.clone()),
            _ => self.inner.auxiliary.get(name).cloned(),
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names = vec![PRIMARY_SOURCE.to_string(), HANDLER_SOURCE.to_string()];
        names.extend(self.inner.auxiliary.keys().cloned());
        names
    }

    /// Observe every dispatched `(source, event, args)`
    pub fn on_any<O: EventObserver + 'static>(&self, observer: O) {
        self.inner.watchers.write().push(Arc::new(observer));
    }

    pub fn paths(&self) -> &CategoryPaths {
        &self.inner.paths
    }

    /// Copy of the live collections
    pub fn snapshot(&self) -> Collections {
        self.inner.state.lock().live.clone()
    }

    pub fn has_rollback(&self) -> bool {
        self.inner.state.lock().rollback.is_some()
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.inner.state.lock().live.events.get(key).map_or(0, Vec::len)
    }

    pub fn slash_command(&self, name: &str) -> Option<HydratedCommand> {
        self.inner.state.lock().live.slash_commands.get(name).cloned()
    }

    pub fn beta_command(&self, name: &str) -> Option<HydratedCommand> {
        self.inner.state.lock().live.beta_commands.get(name).cloned()
    }

    pub fn context_menu(&self, name: &str) -> Option<HydratedCommand> {
        self.inner.state.lock().live.context_menus.get(name).cloned()
    }

    /// Text command by name or alias
    pub fn text_command(&self, name: &str) -> Option<HydratedCommand> {
        self.inner.state.lock().live.text_commands.get(name).cloned()
    }

    pub fn interaction(&self, id: &str) -> Option<Interaction> {
        self.inner.state.lock().live.interactions.get(id).cloned()
    }

    pub fn service(&self, id: &str) -> Option<Arc<Service>> {
        self.inner.state.lock().live.services.get(id).cloned()
    }

    /// Slash command payloads by name
    pub fn export_commands(&self) -> BTreeMap<String, Value> {
        export(&self.inner.state.lock().live.slash_commands)
    }

    pub fn export_beta_commands(&self) -> BTreeMap<String, Value> {
        export(&self.inner.state.lock().live.beta_commands)
    }

    pub fn export_context_menus(&self) -> BTreeMap<String, Value> {
        export(&self.inner.state.lock().live.context_menus)
    }

    /// Start every live autostart service; returns how many were started
    pub fn start_services(&self) -> usize {
        let services: Vec<Arc<Service>> =
            self.inner.state.lock().live.services.values().cloned().collect();
        services
            .iter()
            .filter(|service| service.autostart())
            .filter(|service| service.start())
            .count()
    }

    /// Stop every live service; returns how many were running
    pub fn stop_services(&self) -> usize {
        let live = self.snapshot();
        live.stop_services()
    }
}

impl Inner {
    fn dispatch(&self, source: &str, event: &str, args: &[Value]) -> usize {
        // Listeners run without the lock so they may emit in turn
        let fired = self.state.lock().live.take_matching(source, event);

        for listener in &fired {
            if let Err(e) = listener.handle(args) {
                error!(
                    target: "registry",
                    "Listener {} for {} from {} failed: {:#}",
                    listener.callback.label(),
                    listener.name,
                    source,
                    e
                );
            }
        }

        let watchers = self.watchers.read().clone();
        for watcher in &watchers {
            let observed = guarded("on_any observer", || {
                watcher.observe(source, event, args);
                Ok(())
            });
            if let Err(e) = observed {
                error!(
                    target: "registry",
                    "Observer for {} from {} failed: {:#}",
                    event,
                    source,
                    e
                );
            }
        }

        fired.len()
    }
}

fn export(commands: &BTreeMap<String, HydratedCommand>) -> BTreeMap<String, Value> {
    commands
        .iter()
        .map(|(name, command)| (name.clone(), command.data().clone()))
        .collect()
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Registry")
            .field("paths", &self.inner.paths)
            .field("listeners", &state.live.listener_count())
            .field("services", &state.live.services.len())
            .field("rollback", &state.rollback.is_some())
            .finish()
    }
}
