//! Language id to kernel bindings for one notebook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use super::Kernel;
use crate::error::{Error, Result};
use crate::extension::{CapabilityRegistry, ExtensionStatus};
use crate::variables::VariableStore;

/// Where a kernel binding came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "extension_id", rename_all = "snake_case")]
pub enum KernelOrigin {
    /// Registered directly on the notebook.
    Local,
    /// Adopted from an extension loaded in the capability registry.
    Extension(String),
}

/// Snapshot of one kernel binding.
#[derive(Debug, Clone, Serialize)]
pub struct KernelInfo {
    pub language: String,
    pub display_name: String,
    pub origin: KernelOrigin,
    pub initialized: bool,
}

struct KernelSlot {
    kernel: Arc<dyn Kernel>,
    origin: KernelOrigin,
    /// One-time init gate; `true` once `initialize` succeeded.
    init: Mutex<bool>,
    /// Lock-free mirror of `init` for snapshots.
    ready: AtomicBool,
    /// Execution gate; kernels are not assumed reentrant.
    gate: Mutex<()>,
}

impl KernelSlot {
    fn new(kernel: Arc<dyn Kernel>, origin: KernelOrigin) -> Self {
        Self {
            kernel,
            origin,
            init: Mutex::new(false),
            ready: AtomicBool::new(false),
            gate: Mutex::new(()),
        }
    }
}

/// A resolved kernel binding.
#[derive(Clone)]
pub struct KernelHandle {
    slot: Arc<KernelSlot>,
}

impl KernelHandle {
    /// Language id reported by the kernel.
    pub fn language(&self) -> &str {
        self.slot.kernel.language()
    }

    /// The kernel itself.
    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.slot.kernel
    }

    pub fn origin(&self) -> &KernelOrigin {
        &self.slot.origin
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.ready.load(Ordering::Acquire)
    }

    /// Initialize the kernel if it is not already.
    ///
    /// Concurrent callers wait on the same gate, so `initialize` runs once.
    pub async fn ensure_initialized(&self) -> Result<()> {
        let mut init = self.slot.init.lock().await;
        if !*init {
            tracing::debug!("Initializing kernel '{}'", self.language());
            self.slot.kernel.initialize().await?;
            *init = true;
            self.slot.ready.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Acquire the execution gate.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.slot.gate.lock().await
    }

    /// Shut the kernel down and mark it uninitialized.
    ///
    /// Waits for any in-flight execution to release the gate first.
    async fn reset(&self) {
        let _gate = self.slot.gate.lock().await;
        let mut init = self.slot.init.lock().await;
        if *init {
            if let Err(e) = self.slot.kernel.shutdown().await {
                tracing::warn!("Kernel '{}' failed to shut down: {}", self.language(), e);
            }
            *init = false;
            self.slot.ready.store(false, Ordering::Release);
        }
    }

    fn info(&self) -> KernelInfo {
        KernelInfo {
            language: self.language().to_string(),
            display_name: self.slot.kernel.display_name().to_string(),
            origin: self.slot.origin.clone(),
            initialized: self.is_initialized(),
        }
    }
}

fn language_key(language: &str) -> String {
    language.trim().to_ascii_lowercase()
}

/// At most one kernel per language id for one notebook.
pub struct KernelRegistry {
    slots: RwLock<FxHashMap<String, Arc<KernelSlot>>>,
    variables: Arc<VariableStore>,
}

impl KernelRegistry {
    /// Create an empty registry whose restarts clear `variables`.
    pub fn new(variables: Arc<VariableStore>) -> Self {
        Self {
            slots: RwLock::new(FxHashMap::default()),
            variables,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<String, Arc<KernelSlot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<String, Arc<KernelSlot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a kernel directly on the notebook.
    pub fn register(&self, kernel: Arc<dyn Kernel>) -> Result<()> {
        let key = language_key(kernel.language());
        if key.is_empty() {
            return Err(Error::InvalidOperation(
                "kernel language id must not be blank".to_string(),
            ));
        }
        let mut slots = self.write();
        if slots.contains_key(&key) {
            return Err(Error::DuplicateKernel(kernel.language().to_string()));
        }
        tracing::debug!("Registered kernel '{}'", kernel.language());
        slots.insert(key, Arc::new(KernelSlot::new(kernel, KernelOrigin::Local)));
        Ok(())
    }

    /// Binding for a language, without consulting extensions.
    pub fn get(&self, language: &str) -> Option<KernelHandle> {
        self.read()
            .get(&language_key(language))
            .cloned()
            .map(|slot| KernelHandle { slot })
    }

    /// Resolve the kernel for a language.
    ///
    /// Local bindings win; otherwise the first enabled extension kernel for
    /// the language is adopted so its gates live on this notebook.
    pub fn resolve(&self, language: &str, extensions: &CapabilityRegistry) -> Result<KernelHandle> {
        let key = language_key(language);
        let existing = self.read().get(&key).cloned();
        if let Some(slot) = existing {
            match &slot.origin {
                KernelOrigin::Local => return Ok(KernelHandle { slot }),
                KernelOrigin::Extension(id) => match extensions.status(id) {
                    Some(ExtensionStatus::Enabled) => return Ok(KernelHandle { slot }),
                    Some(ExtensionStatus::Disabled) => {
                        return Err(Error::KernelNotFound(language.to_string()));
                    }
                    None => {
                        tracing::debug!("Dropping stale kernel binding from '{}'", id);
                        let mut slots = self.write();
                        if slots.get(&key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                            slots.remove(&key);
                        }
                    }
                },
            }
        }

        let (extension_id, kernel) = extensions
            .find_kernel(language)
            .ok_or_else(|| Error::KernelNotFound(language.to_string()))?;

        let slot = self
            .write()
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!(
                    "Adopted kernel '{}' from extension '{}'",
                    kernel.language(),
                    extension_id
                );
                Arc::new(KernelSlot::new(kernel, KernelOrigin::Extension(extension_id)))
            })
            .clone();
        Ok(KernelHandle { slot })
    }

    /// Shut down a bound kernel and clear every shared variable.
    ///
    /// The kernel re-initializes lazily on next use.
    pub async fn restart(&self, language: &str) -> Result<()> {
        let handle = self
            .get(language)
            .ok_or_else(|| Error::KernelNotFound(language.to_string()))?;
        handle.reset().await;
        self.variables.clear();
        tracing::info!("Restarted kernel '{}'", handle.language());
        Ok(())
    }

    /// Drop every binding adopted from an extension, shutting each down.
    pub async fn evict_extension(&self, extension_id: &str) -> usize {
        let evicted: Vec<Arc<KernelSlot>> = {
            let mut slots = self.write();
            let keys: Vec<String> = slots
                .iter()
                .filter(|(_, s)| {
                    matches!(&s.origin, KernelOrigin::Extension(id) if id.eq_ignore_ascii_case(extension_id))
                })
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| slots.remove(k)).collect()
        };
        for slot in &evicted {
            KernelHandle { slot: slot.clone() }.reset().await;
        }
        evicted.len()
    }

    /// Shut down and drop every binding.
    pub async fn shutdown_all(&self) {
        let slots: Vec<Arc<KernelSlot>> = self.write().drain().map(|(_, s)| s).collect();
        for slot in slots {
            KernelHandle { slot }.reset().await;
        }
    }

    /// Snapshot of all bindings, sorted by language.
    pub fn list(&self) -> Vec<KernelInfo> {
        let mut infos: Vec<KernelInfo> = self
            .read()
            .values()
            .map(|slot| KernelHandle { slot: slot.clone() }.info())
            .collect();
        infos.sort_by(|a, b| a.language.cmp(&b.language));
        infos
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::ExecutionContext;
    use crate::output::CellOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct CountingKernel {
        language: &'static str,
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl CountingKernel {
        fn new(language: &'static str) -> Arc<Self> {
            Arc::new(Self {
                language,
                inits: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Kernel for CountingKernel {
        fn language(&self) -> &str {
            self.language
        }

        async fn initialize(&self) -> Result<()> {
            tokio::task::yield_now().await;
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _source: &str, _ctx: &ExecutionContext) -> Result<Vec<CellOutput>> {
            Ok(Vec::new())
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry() -> (KernelRegistry, Arc<VariableStore>) {
        let vars = Arc::new(VariableStore::new());
        (KernelRegistry::new(vars.clone()), vars)
    }

    #[test]
    fn test_duplicate_registration_rejected_case_insensitively() {
        let (reg, _) = registry();
        reg.register(CountingKernel::new("Python")).unwrap();
        let err = reg.register(CountingKernel::new("python")).unwrap_err();
        assert!(matches!(err, Error::DuplicateKernel(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_resolve_prefers_local_and_reports_missing() {
        let (reg, _) = registry();
        let extensions = CapabilityRegistry::new();
        reg.register(CountingKernel::new("calc")).unwrap();
        assert_eq!(reg.resolve("CALC", &extensions).unwrap().language(), "calc");
        assert!(matches!(
            reg.resolve("ruby", &extensions),
            Err(Error::KernelNotFound(lang)) if lang == "ruby"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_initializes_once() {
        let (reg, _) = registry();
        let kernel = CountingKernel::new("calc");
        reg.register(kernel.clone()).unwrap();
        let handle = reg.get("calc").unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.ensure_initialized().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(kernel.inits.load(Ordering::SeqCst), 1);
        assert!(handle.is_initialized());
    }

    #[tokio::test]
    async fn test_restart_shuts_down_and_clears_variables() {
        let (reg, vars) = registry();
        let kernel = CountingKernel::new("calc");
        reg.register(kernel.clone()).unwrap();
        let handle = reg.get("calc").unwrap();
        handle.ensure_initialized().await.unwrap();
        vars.set_from("other", "x", json!(1));

        reg.restart("calc").await.unwrap();

        assert_eq!(kernel.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!handle.is_initialized());
        assert!(vars.is_empty());

        handle.ensure_initialized().await.unwrap();
        assert_eq!(kernel.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_restart_unknown_language() {
        let (reg, _) = registry();
        assert!(matches!(
            reg.restart("nope").await,
            Err(Error::KernelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_all_drains() {
        let (reg, _) = registry();
        let kernel = CountingKernel::new("calc");
        reg.register(kernel.clone()).unwrap();
        reg.get("calc").unwrap().ensure_initialized().await.unwrap();
        reg.shutdown_all().await;
        assert!(reg.is_empty());
        assert_eq!(kernel.shutdowns.load(Ordering::SeqCst), 1);
    }
}
