//! Integration tests for the extension host.
//!
//! Validation rules, lifecycle hooks, enable/disable, unload isolation and
//! kernel adoption from extensions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use aster_core::extension::{Layout, Theme};
use aster_core::{
    AbortHandle, Capabilities, Capability, CapabilityRegistry, CellOutput, Error,
    ExecutionContext, ExecutionStatus, Extension, ExtensionCatalog, ExtensionManifest,
    ExtensionStatus, IsolationScope, Kernel, KernelOrigin, NewCell, Scaffold, ValidationCode,
};

// =============================================================================
// Test Helpers
// =============================================================================

struct EchoKernel {
    language: &'static str,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl Kernel for EchoKernel {
    fn language(&self) -> &str {
        self.language
    }

    async fn execute(&self, source: &str, _ctx: &ExecutionContext) -> aster_core::Result<Vec<CellOutput>> {
        Ok(vec![CellOutput::stdout(source)])
    }

    async fn shutdown(&self) -> aster_core::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Named(&'static str);

impl Theme for Named {
    fn id(&self) -> &str {
        self.0
    }
    fn display_name(&self) -> &str {
        self.0
    }
    fn is_dark(&self) -> bool {
        true
    }
}

impl Layout for Named {
    fn id(&self) -> &str {
        self.0
    }
    fn display_name(&self) -> &str {
        self.0
    }
}

struct Plugin {
    manifest: ExtensionManifest,
    capabilities: Capabilities,
    worker_stopped: Arc<AtomicBool>,
}

impl Plugin {
    fn new(id: &str, name: &str, version: &str) -> Self {
        Self {
            manifest: ExtensionManifest::new(id, name, version),
            capabilities: Capabilities::new().with_theme(Arc::new(Named("night"))),
            worker_stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

struct StopFlag(Arc<AtomicBool>);

impl Drop for StopFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Extension for Plugin {
    fn manifest(&self) -> ExtensionManifest {
        self.manifest.clone()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn on_load(&self, scope: &IsolationScope) -> aster_core::Result<()> {
        let flag = StopFlag(self.worker_stopped.clone());
        scope.spawn(async move {
            let _flag = flag;
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        Ok(())
    }
}

fn codes(registry: &CapabilityRegistry, candidate: &dyn Extension) -> Vec<ValidationCode> {
    registry.validate(candidate).into_iter().map(|e| e.code).collect()
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_blank_id_reports_missing_id() {
    let registry = CapabilityRegistry::new();
    for id in ["", "   "] {
        assert!(codes(&registry, &Plugin::new(id, "n", "1.0.0")).contains(&ValidationCode::MissingId));
    }
}

#[test]
fn test_version_grammar() {
    let registry = CapabilityRegistry::new();
    for good in ["1.0.0", "0.1.0-alpha", "1.0.0-rc.1+build.7", "3.2.1+meta"] {
        assert!(codes(&registry, &Plugin::new("a", "n", good)).is_empty(), "{good}");
    }
    for bad in ["1.0", "latest", "1.0.0.0", "1.02.3"] {
        assert_eq!(
            codes(&registry, &Plugin::new("a", "n", bad)),
            vec![ValidationCode::InvalidVersion],
            "{bad}"
        );
    }
}

#[test]
fn test_no_capability() {
    let registry = CapabilityRegistry::new();
    let plugin = Plugin::new("a", "n", "1.0.0").with_capabilities(Capabilities::new());
    assert_eq!(codes(&registry, &plugin), vec![ValidationCode::NoCapability]);
}

#[tokio::test]
async fn test_second_extension_x_is_rejected_with_one_duplicate_id() {
    let registry = CapabilityRegistry::new();
    registry.load(Box::new(Plugin::new("x", "First", "1.0.0"))).await.unwrap();

    let err = registry
        .load(Box::new(Plugin::new("x", "", "2.0")))
        .await
        .unwrap_err();

    let Error::LoadRejected { id, errors } = err else {
        panic!("expected LoadRejected");
    };
    assert_eq!(id, "x");
    let dupes = errors
        .iter()
        .filter(|e| e.code == ValidationCode::DuplicateId)
        .count();
    assert_eq!(dupes, 1);
    assert_eq!(errors.len(), 3);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_rejected_extension_never_reaches_buckets() {
    let registry = CapabilityRegistry::new();
    let plugin = Plugin::new("org.bad", "Bad", "one").with_capabilities(
        Capabilities::new().with_layout(Arc::new(Named("grid"))),
    );
    assert!(registry.load(Box::new(plugin)).await.is_err());

    assert!(registry.layouts().is_empty());
    assert!(registry.find_layout("grid").is_none());
    assert!(registry.list().is_empty());
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_descriptor_lists_capability_tags() {
    let registry = CapabilityRegistry::new();
    let plugin = Plugin::new("org.multi", "Multi", "1.2.3").with_capabilities(
        Capabilities::new()
            .with_layout(Arc::new(Named("grid")))
            .with_theme(Arc::new(Named("day"))),
    );
    let descriptor = registry.load(Box::new(plugin)).await.unwrap();

    assert_eq!(descriptor.capabilities, vec![Capability::Layout, Capability::Theme]);
    assert_eq!(descriptor.status, ExtensionStatus::Enabled);
    assert_eq!(registry.get("ORG.MULTI"), Some(descriptor));
}

#[tokio::test]
async fn test_unload_stops_spawned_work_of_that_extension_only() {
    let registry = CapabilityRegistry::new();
    let a = Plugin::new("org.a", "A", "1.0.0");
    let b = Plugin::new("org.b", "B", "1.0.0");
    let (a_stopped, b_stopped) = (a.worker_stopped.clone(), b.worker_stopped.clone());
    registry.load(Box::new(a)).await.unwrap();
    registry.load(Box::new(b)).await.unwrap();

    registry.unload("org.a").await.unwrap();

    assert!(a_stopped.load(Ordering::SeqCst));
    assert!(!b_stopped.load(Ordering::SeqCst));
    assert_eq!(registry.list().len(), 1);

    registry.unload_all().await;
    assert!(b_stopped.load(Ordering::SeqCst));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_catalog_loads_fresh_instances_per_registry() {
    let catalog = ExtensionCatalog::new()
        .with(|| Box::new(Plugin::new("org.one", "One", "1.0.0")))
        .with(|| Box::new(Plugin::new("", "Broken", "1.0.0")));

    let first = CapabilityRegistry::new();
    let second = CapabilityRegistry::new();
    assert_eq!(first.load_catalog(&catalog).await.len(), 1);
    assert_eq!(second.load_catalog(&catalog).await.len(), 1);

    first.disable("org.one").unwrap();
    assert!(second.is_enabled("org.one"));
}

// =============================================================================
// Kernels from extensions
// =============================================================================

#[tokio::test]
async fn test_extension_kernel_is_adopted_and_evicted() {
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(CapabilityRegistry::new());
    let plugin = Plugin::new("org.echo", "Echo", "0.1.0").with_capabilities(
        Capabilities::new().with_kernel(Arc::new(EchoKernel {
            language: "echo",
            shutdowns: shutdowns.clone(),
        })),
    );
    registry.load(Box::new(plugin)).await.unwrap();

    let s = Scaffold::new(registry.clone());
    let cell = s.add_cell(NewCell::code("hello").with_language("Echo"));
    let outcome = s.execute(&cell.id, &AbortHandle::new()).await.unwrap();
    assert_eq!(outcome.outputs, vec![CellOutput::stdout("hello")]);

    let kernels = s.kernels().list();
    assert_eq!(kernels.len(), 1);
    assert_eq!(kernels[0].origin, KernelOrigin::Extension("org.echo".into()));
    assert!(kernels[0].initialized);

    registry.unload("org.echo").await.unwrap();
    s.evict_extension("org.echo").await;

    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert!(s.kernels().is_empty());
    assert!(matches!(
        s.execute(&cell.id, &AbortHandle::new()).await,
        Err(Error::KernelNotFound(_))
    ));
}

#[tokio::test]
async fn test_disabled_extension_kernel_is_unreachable() {
    let registry = Arc::new(CapabilityRegistry::new());
    let plugin = Plugin::new("org.echo", "Echo", "0.1.0").with_capabilities(
        Capabilities::new().with_kernel(Arc::new(EchoKernel {
            language: "echo",
            shutdowns: Arc::new(AtomicUsize::new(0)),
        })),
    );
    registry.load(Box::new(plugin)).await.unwrap();
    let s = Scaffold::new(registry.clone());
    s.set_default_language(Some("echo".into()));
    let cell = s.add_cell(NewCell::code("hi"));
    s.execute(&cell.id, &AbortHandle::new()).await.unwrap();

    registry.disable("org.echo").unwrap();
    assert!(matches!(
        s.execute(&cell.id, &AbortHandle::new()).await,
        Err(Error::KernelNotFound(_))
    ));

    registry.enable("org.echo").unwrap();
    let outcome = s.execute(&cell.id, &AbortHandle::new()).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.execution_count, 3);
}

#[tokio::test]
async fn test_theme_selection_resets_when_provider_unloads() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry
        .load(Box::new(Plugin::new("org.theme", "Theme", "1.0.0")))
        .await
        .unwrap();
    let s = Scaffold::new(registry.clone());
    s.set_theme(Some("NIGHT")).unwrap();
    assert_eq!(s.appearance().theme.as_deref(), Some("night"));

    registry.unload("org.theme").await.unwrap();
    s.evict_extension("org.theme").await;

    assert_eq!(s.appearance().theme, None);
}
