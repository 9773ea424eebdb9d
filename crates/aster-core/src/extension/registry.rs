//! Loaded extensions and typed capability lookup.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::{
    Capabilities, Capability, CellType, Extension, ExtensionCatalog, ExtensionManifest,
    Formatter, IsolationScope, Layout, PostProcessor, Renderer, Serializer, Theme,
    ToolbarAction, ValidationCode, ValidationError, is_semver,
};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::magic::MagicCommand;

/// Whether an extension's capabilities are visible to queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    Enabled,
    Disabled,
}

/// Metadata about a loaded extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub capabilities: Vec<Capability>,
    pub status: ExtensionStatus,
}

struct LoadedExtension {
    manifest: ExtensionManifest,
    tags: Vec<Capability>,
    enabled: AtomicBool,
    instance: Box<dyn Extension>,
    capabilities: Capabilities,
    scope: IsolationScope,
}

impl LoadedExtension {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn matches(&self, id: &str) -> bool {
        self.manifest.id.eq_ignore_ascii_case(id.trim())
    }

    fn descriptor(&self) -> ExtensionDescriptor {
        ExtensionDescriptor {
            id: self.manifest.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            author: self.manifest.author.clone(),
            description: self.manifest.description.clone(),
            capabilities: self.tags.clone(),
            status: if self.is_enabled() {
                ExtensionStatus::Enabled
            } else {
                ExtensionStatus::Disabled
            },
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Run a lifecycle hook, turning both errors and panics into
/// [`Error::LifecycleHook`].
fn run_hook(id: &str, hook: &'static str, f: impl FnOnce() -> Result<()>) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::LifecycleHook {
            id: id.to_string(),
            hook,
            message: e.to_string(),
        }),
        Err(payload) => Err(Error::LifecycleHook {
            id: id.to_string(),
            hook,
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Extensions loaded for one notebook session.
///
/// Entries are kept in load order; lookups return the first match.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<Vec<Arc<LoadedExtension>>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("extensions", &self.len())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<LoadedExtension>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<LoadedExtension>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, id: &str) -> Option<Arc<LoadedExtension>> {
        self.read().iter().find(|e| e.matches(id)).cloned()
    }

    /// Whether an extension with this id is loaded (case-insensitive).
    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Check a candidate against every rule, collecting all failures.
    pub fn validate(&self, candidate: &dyn Extension) -> Vec<ValidationError> {
        let manifest = candidate.manifest();
        let mut errors = Vec::new();

        let id = manifest.id.trim();
        if id.is_empty() {
            errors.push(ValidationError::new(
                ValidationCode::MissingId,
                "extension id must not be blank",
            ));
        } else if self.contains(id) {
            errors.push(ValidationError::new(
                ValidationCode::DuplicateId,
                format!("an extension with id '{id}' is already loaded"),
            ));
        }

        if manifest.name.trim().is_empty() {
            errors.push(ValidationError::new(
                ValidationCode::MissingName,
                "extension name must not be blank",
            ));
        }

        if manifest.version.trim().is_empty() {
            errors.push(ValidationError::new(
                ValidationCode::MissingVersion,
                "extension version must not be blank",
            ));
        } else if !is_semver(&manifest.version) {
            errors.push(ValidationError::new(
                ValidationCode::InvalidVersion,
                format!(
                    "'{}' is not a semantic version (MAJOR.MINOR.PATCH)",
                    manifest.version
                ),
            ));
        }

        if candidate.capabilities().is_empty() {
            errors.push(ValidationError::new(
                ValidationCode::NoCapability,
                "extension provides no capability",
            ));
        }

        errors
    }

    /// Validate, initialize and register an extension.
    ///
    /// On any failure the registry is left untouched.
    pub async fn load(&self, candidate: Box<dyn Extension>) -> Result<ExtensionDescriptor> {
        let manifest = candidate.manifest();
        let errors = self.validate(candidate.as_ref());
        if !errors.is_empty() {
            tracing::warn!(
                "Rejected extension '{}': {}",
                manifest.id,
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            return Err(Error::LoadRejected {
                id: manifest.id,
                errors,
            });
        }

        let capabilities = candidate.capabilities();
        let scope = IsolationScope::new(manifest.id.clone());
        if let Err(e) = run_hook(&manifest.id, "load", || candidate.on_load(&scope)) {
            tracing::warn!("{}", e);
            scope.release().await;
            return Err(e);
        }

        let entry = Arc::new(LoadedExtension {
            tags: capabilities.tags(),
            manifest,
            enabled: AtomicBool::new(true),
            instance: candidate,
            capabilities,
            scope,
        });

        // A concurrent load of the same id may have won since validation.
        let inserted = {
            let mut entries = self.write();
            if entries.iter().any(|e| e.matches(&entry.manifest.id)) {
                false
            } else {
                entries.push(entry.clone());
                true
            }
        };

        if !inserted {
            let id = entry.manifest.id.clone();
            if let Err(e) = run_hook(&id, "unload", || entry.instance.on_unload()) {
                tracing::warn!("{}", e);
            }
            entry.scope.release().await;
            return Err(Error::LoadRejected {
                errors: vec![ValidationError::new(
                    ValidationCode::DuplicateId,
                    format!("an extension with id '{id}' is already loaded"),
                )],
                id,
            });
        }

        tracing::info!(
            "Loaded extension '{}' v{} ({:?})",
            entry.manifest.id,
            entry.manifest.version,
            entry.tags
        );
        Ok(entry.descriptor())
    }

    /// Load every catalog entry, logging rejections.
    pub async fn load_catalog(&self, catalog: &ExtensionCatalog) -> Vec<ExtensionDescriptor> {
        let mut loaded = Vec::new();
        for candidate in catalog.instantiate() {
            match self.load(candidate).await {
                Ok(descriptor) => loaded.push(descriptor),
                Err(e) => tracing::warn!("Skipping catalog extension: {}", e),
            }
        }
        loaded
    }

    /// Remove an extension and release everything it owns.
    ///
    /// The entry is unreachable before its unload hook runs; hook failures
    /// are logged and do not stop the teardown.
    pub async fn unload(&self, id: &str) -> Result<ExtensionDescriptor> {
        let entry = {
            let mut entries = self.write();
            let pos = entries
                .iter()
                .position(|e| e.matches(id))
                .ok_or_else(|| Error::ExtensionNotFound(id.to_string()))?;
            entries.remove(pos)
        };
        Ok(Self::teardown(entry).await)
    }

    /// Unload everything, most recently loaded first.
    pub async fn unload_all(&self) -> Vec<ExtensionDescriptor> {
        let entries: Vec<_> = self.write().drain(..).rev().collect();
        let mut unloaded = Vec::with_capacity(entries.len());
        for entry in entries {
            unloaded.push(Self::teardown(entry).await);
        }
        unloaded
    }

    async fn teardown(entry: Arc<LoadedExtension>) -> ExtensionDescriptor {
        let id = entry.manifest.id.clone();
        if let Err(e) = run_hook(&id, "unload", || entry.instance.on_unload()) {
            tracing::warn!("{}", e);
        }
        entry.scope.release().await;
        tracing::info!("Unloaded extension '{}'", id);
        entry.descriptor()
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<ExtensionDescriptor> {
        let entry = self
            .find(id)
            .ok_or_else(|| Error::ExtensionNotFound(id.to_string()))?;
        entry.enabled.store(enabled, Ordering::Release);
        tracing::debug!(
            "Extension '{}' {}",
            entry.manifest.id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(entry.descriptor())
    }

    pub fn enable(&self, id: &str) -> Result<ExtensionDescriptor> {
        self.set_enabled(id, true)
    }

    /// Hide an extension from every capability query, keeping its state.
    pub fn disable(&self, id: &str) -> Result<ExtensionDescriptor> {
        self.set_enabled(id, false)
    }

    pub fn status(&self, id: &str) -> Option<ExtensionStatus> {
        self.find(id).map(|e| e.descriptor().status)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.status(id) == Some(ExtensionStatus::Enabled)
    }

    pub fn get(&self, id: &str) -> Option<ExtensionDescriptor> {
        self.find(id).map(|e| e.descriptor())
    }

    /// Descriptors in load order.
    pub fn list(&self) -> Vec<ExtensionDescriptor> {
        self.read().iter().map(|e| e.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn collect<T: ?Sized>(&self, bucket: impl Fn(&Capabilities) -> &Vec<Arc<T>>) -> Vec<Arc<T>> {
        self.read()
            .iter()
            .filter(|e| e.is_enabled())
            .flat_map(|e| bucket(&e.capabilities).iter().cloned())
            .collect()
    }

    pub fn kernels(&self) -> Vec<Arc<dyn Kernel>> {
        self.collect(|c| &c.kernels)
    }

    pub fn renderers(&self) -> Vec<Arc<dyn Renderer>> {
        self.collect(|c| &c.renderers)
    }

    pub fn formatters(&self) -> Vec<Arc<dyn Formatter>> {
        self.collect(|c| &c.formatters)
    }

    pub fn cell_types(&self) -> Vec<Arc<dyn CellType>> {
        self.collect(|c| &c.cell_types)
    }

    pub fn serializers(&self) -> Vec<Arc<dyn Serializer>> {
        self.collect(|c| &c.serializers)
    }

    pub fn layouts(&self) -> Vec<Arc<dyn Layout>> {
        self.collect(|c| &c.layouts)
    }

    pub fn themes(&self) -> Vec<Arc<dyn Theme>> {
        self.collect(|c| &c.themes)
    }

    pub fn magic_commands(&self) -> Vec<Arc<dyn MagicCommand>> {
        self.collect(|c| &c.magic_commands)
    }

    pub fn toolbar_actions(&self) -> Vec<Arc<dyn ToolbarAction>> {
        self.collect(|c| &c.toolbar_actions)
    }

    pub fn post_processors(&self) -> Vec<Arc<dyn PostProcessor>> {
        self.collect(|c| &c.post_processors)
    }

    /// First enabled kernel for a language, with its extension id.
    pub fn find_kernel(&self, language: &str) -> Option<(String, Arc<dyn Kernel>)> {
        let language = language.trim();
        self.read()
            .iter()
            .filter(|e| e.is_enabled())
            .find_map(|e| {
                e.capabilities
                    .kernels
                    .iter()
                    .find(|k| k.language().eq_ignore_ascii_case(language))
                    .map(|k| (e.manifest.id.clone(), k.clone()))
            })
    }

    /// Magic command by name, case-insensitive.
    pub fn find_magic_command(&self, name: &str) -> Option<Arc<dyn MagicCommand>> {
        self.magic_commands()
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    pub fn find_serializer(&self, format: &str) -> Option<Arc<dyn Serializer>> {
        self.serializers()
            .into_iter()
            .find(|s| s.format_id().eq_ignore_ascii_case(format))
    }

    pub fn find_formatter(&self, language: &str) -> Option<Arc<dyn Formatter>> {
        self.formatters()
            .into_iter()
            .find(|f| f.language().eq_ignore_ascii_case(language))
    }

    pub fn find_cell_type(&self, type_id: &str) -> Option<Arc<dyn CellType>> {
        self.cell_types()
            .into_iter()
            .find(|c| CellType::type_id(c.as_ref()).eq_ignore_ascii_case(type_id))
    }

    pub fn find_theme(&self, id: &str) -> Option<Arc<dyn Theme>> {
        self.themes()
            .into_iter()
            .find(|t| t.id().eq_ignore_ascii_case(id))
    }

    pub fn find_layout(&self, id: &str) -> Option<Arc<dyn Layout>> {
        self.layouts()
            .into_iter()
            .find(|l| l.id().eq_ignore_ascii_case(id))
    }
}
