//! Extensions shipped with the server.
//!
//! | id                  | provides                          |
//! |---------------------|-----------------------------------|
//! | `aster.magics`      | `%restart`, `%who`, `%set`        |
//! | `aster.json`        | `json` notebook serializer        |
//! | `aster.calc`        | `calc` arithmetic kernel          |

pub mod calc;
pub mod json;
pub mod magics;

use std::sync::Arc;

use aster_core::{Capabilities, Extension, ExtensionCatalog, ExtensionManifest};

pub use calc::CalcKernel;
pub use json::JsonSerializer;
pub use magics::{RestartMagic, SetMagic, WhoMagic};

const AUTHOR: &str = "Aster";

/// An extension assembled from a manifest and a fixed capability set.
struct Builtin {
    manifest: ExtensionManifest,
    capabilities: Capabilities,
}

impl Builtin {
    fn boxed(id: &str, name: &str, description: &str, capabilities: Capabilities) -> Box<dyn Extension> {
        Box::new(Self {
            manifest: ExtensionManifest::new(id, name, env!("CARGO_PKG_VERSION"))
                .with_author(AUTHOR)
                .with_description(description),
            capabilities,
        })
    }
}

impl Extension for Builtin {
    fn manifest(&self) -> ExtensionManifest {
        self.manifest.clone()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }
}

pub fn magics_extension() -> Box<dyn Extension> {
    Builtin::boxed(
        "aster.magics",
        "Core magics",
        "Kernel restart and variable inspection directives",
        Capabilities::new()
            .with_magic_command(Arc::new(RestartMagic))
            .with_magic_command(Arc::new(WhoMagic))
            .with_magic_command(Arc::new(SetMagic)),
    )
}

pub fn json_extension() -> Box<dyn Extension> {
    Builtin::boxed(
        "aster.json",
        "JSON notebooks",
        "Reads and writes notebooks as JSON",
        Capabilities::new().with_serializer(Arc::new(JsonSerializer)),
    )
}

pub fn calc_extension() -> Box<dyn Extension> {
    Builtin::boxed(
        "aster.calc",
        "Calc",
        "Arithmetic kernel sharing numbers through the variable store",
        Capabilities::new().with_kernel(Arc::new(CalcKernel::new())),
    )
}

/// Every built-in extension. Each session gets fresh instances, so calc
/// bindings never leak between sessions.
pub fn builtin_catalog() -> ExtensionCatalog {
    ExtensionCatalog::new()
        .with(magics_extension)
        .with(json_extension)
        .with(calc_extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aster_core::{Capability, CapabilityRegistry};

    #[tokio::test]
    async fn test_builtins_pass_validation() {
        let registry = CapabilityRegistry::new();
        let loaded = registry.load_catalog(&builtin_catalog()).await;
        assert_eq!(loaded.len(), 3);
        assert!(registry.find_kernel("CALC").is_some());
        assert!(registry.find_serializer("json").is_some());
        assert!(registry.find_magic_command("who").is_some());
    }

    #[test]
    fn test_catalog_describes_capabilities() {
        let described = builtin_catalog().describe();
        assert_eq!(described[2].0.id, "aster.calc");
        assert_eq!(described[2].1, vec![Capability::Kernel]);
    }
}
