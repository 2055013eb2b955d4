use std::collections::HashMap;

use durent_types::OperationError;

use crate::context::EntityContext;

/// A registered operation handler.
///
/// Handlers are plain closures over the context; failures are returned, not
/// thrown, and are captured into the response at the dispatch boundary.
pub type OperationHandler =
    Box<dyn Fn(&mut EntityContext<'_>) -> Result<(), OperationError> + Send + Sync>;

/// Operation table for in-process dispatch:
/// `class name -> (operation name -> handler)`.
///
/// This replaces reflection over typed interface proxies; a typed facade can
/// be generated on top but is never required at runtime.
#[derive(Default)]
pub struct OperationRegistry {
    classes: HashMap<String, HashMap<String, OperationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `(class_name, operation)`. Re-registering the
    /// same pair replaces the previous handler.
    pub fn register<F>(
        &mut self,
        class_name: impl Into<String>,
        operation: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&mut EntityContext<'_>) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        self.classes
            .entry(class_name.into())
            .or_default()
            .insert(operation.into(), Box::new(handler));
        self
    }

    pub fn resolve(&self, class_name: &str, operation: &str) -> Option<&OperationHandler> {
        self.classes.get(class_name)?.get(operation)
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<(&str, usize)> = self
            .classes
            .iter()
            .map(|(name, ops)| (name.as_str(), ops.len()))
            .collect();
        classes.sort_unstable();
        f.debug_struct("OperationRegistry")
            .field("classes", &classes)
            .finish()
    }
}
