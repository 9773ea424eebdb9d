//! Extension host.
//!
//! Extensions are capability providers supplied by the embedding
//! application through an [`ExtensionCatalog`]. The [`CapabilityRegistry`]
//! validates them, runs their lifecycle hooks under an [`IsolationScope`],
//! and serves typed lookups over the capabilities of enabled extensions.

mod capability;
mod isolation;
mod manifest;
mod registry;

pub use capability::{
    Capabilities, Capability, CellType, Formatter, Layout, PostProcessor, Renderer, Serializer,
    Theme, ToolbarAction,
};
pub use isolation::IsolationScope;
pub use manifest::{ExtensionManifest, ValidationCode, ValidationError, is_semver};
pub use registry::{CapabilityRegistry, ExtensionDescriptor, ExtensionStatus};

use std::sync::Arc;

use crate::error::Result;

/// A capability provider.
///
/// `capabilities` may be called more than once and should hand out the
/// same instances every time.
pub trait Extension: Send + Sync {
    fn manifest(&self) -> ExtensionManifest;

    fn capabilities(&self) -> Capabilities;

    /// Called once after validation, before any capability is reachable.
    fn on_load(&self, _scope: &IsolationScope) -> Result<()> {
        Ok(())
    }

    /// Called once on unload, after the extension is unreachable.
    fn on_unload(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates a fresh extension instance.
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Extensions available to every session, as factories.
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: Vec<ExtensionFactory>,
}

impl std::fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCatalog")
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
    }

    pub fn with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.register(factory);
        self
    }

    /// One fresh instance per factory, in registration order.
    pub fn instantiate(&self) -> Vec<Box<dyn Extension>> {
        self.factories.iter().map(|factory| factory()).collect()
    }

    /// Manifests and capability tags of every catalog entry.
    pub fn describe(&self) -> Vec<(ExtensionManifest, Vec<Capability>)> {
        self.instantiate()
            .iter()
            .map(|ext| (ext.manifest(), ext.capabilities().tags()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
