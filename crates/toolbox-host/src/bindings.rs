use std::any::Any;
use std::sync::Arc;

/// An opaque injected value
pub type Injected = Arc<dyn Any + Send + Sync>;

/// Arguments injected into every descriptor when it is hydrated
///
/// Holds an ordered list of opaque values plus an optional trailing
/// "modules" value. The same bindings are forwarded on every load.
#[derive(Clone, Default)]
pub struct Bindings {
    options: Vec<Injected>,
    modules: Option<Injected>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an injected value
    pub fn with_option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.push(Arc::new(value));
        self
    }

    /// Append an already shared injected value
    pub fn with_shared(mut self, value: Injected) -> Self {
        self.options.push(value);
        self
    }

    /// Set the trailing modules value
    pub fn with_modules<T: Any + Send + Sync>(mut self, modules: T) -> Self {
        self.modules = Some(Arc::new(modules));
        self
    }

    /// Injected value at `index`, if it has type `T`
    pub fn option<T: Any>(&self, index: usize) -> Option<&T> {
        self.options.get(index)?.downcast_ref()
    }

    /// First injected value of type `T`
    pub fn find<T: Any>(&self) -> Option<&T> {
        self.options.iter().find_map(|value| value.downcast_ref())
    }

    pub fn modules<T: Any>(&self) -> Option<&T> {
        self.modules.as_ref()?.downcast_ref()
    }

    /// Number of injected arguments, counting the modules value
    pub fn len(&self) -> usize {
        self.options.len() + usize::from(self.modules.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("options", &self.options.len())
            .field("modules", &self.modules.is_some())
            .finish()
    }
}
