//! Capability contracts an extension can provide.
//!
//! Only [`Kernel`] and [`MagicCommand`] are driven by the execution engine.
//! The remaining traits are interface surfaces consumed by front-ends and
//! the document layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kernel::Kernel;
use crate::magic::MagicCommand;
use crate::output::CellOutput;
use crate::scaffold::NotebookDocument;

/// Capability tag, inferred once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Kernel,
    Renderer,
    Formatter,
    CellType,
    Serializer,
    Layout,
    Theme,
    MagicCommand,
    ToolbarAction,
    PostProcessor,
}

/// Renders one mime payload to markup.
pub trait Renderer: Send + Sync {
    fn id(&self) -> &str;
    fn supports(&self, mime: &str) -> bool;
    fn render(&self, mime: &str, data: &serde_json::Value) -> Result<String>;
}

/// Source formatter for one language.
pub trait Formatter: Send + Sync {
    fn language(&self) -> &str;
    fn format(&self, source: &str) -> Result<String>;
}

/// A custom cell type.
pub trait CellType: Send + Sync {
    fn type_id(&self) -> &str;
    fn display_name(&self) -> &str;
    /// Language the cell executes as. `None` makes the type non-executable.
    fn language(&self) -> Option<&str> {
        None
    }
}

/// Converts notebooks to and from a byte format.
pub trait Serializer: Send + Sync {
    fn format_id(&self) -> &str;
    fn serialize(&self, document: &NotebookDocument) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<NotebookDocument>;
}

pub trait Layout: Send + Sync {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
}

pub trait Theme: Send + Sync {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn is_dark(&self) -> bool;
    /// Color for a named token, if the theme defines it.
    fn color(&self, _token: &str) -> Option<String> {
        None
    }
}

pub trait ToolbarAction: Send + Sync {
    fn id(&self) -> &str;
    fn label(&self) -> &str;
    /// Protocol method the action triggers.
    fn command(&self) -> &str;
}

/// Rewrites a cell's outputs after every execution.
pub trait PostProcessor: Send + Sync {
    fn id(&self) -> &str;
    fn process(&self, outputs: Vec<CellOutput>) -> Vec<CellOutput>;
}

/// Everything one extension provides, grouped by capability.
#[derive(Default, Clone)]
pub struct Capabilities {
    pub kernels: Vec<Arc<dyn Kernel>>,
    pub renderers: Vec<Arc<dyn Renderer>>,
    pub formatters: Vec<Arc<dyn Formatter>>,
    pub cell_types: Vec<Arc<dyn CellType>>,
    pub serializers: Vec<Arc<dyn Serializer>>,
    pub layouts: Vec<Arc<dyn Layout>>,
    pub themes: Vec<Arc<dyn Theme>>,
    pub magic_commands: Vec<Arc<dyn MagicCommand>>,
    pub toolbar_actions: Vec<Arc<dyn ToolbarAction>>,
    pub post_processors: Vec<Arc<dyn PostProcessor>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kernel(mut self, kernel: Arc<dyn Kernel>) -> Self {
        self.kernels.push(kernel);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderers.push(renderer);
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatters.push(formatter);
        self
    }

    pub fn with_cell_type(mut self, cell_type: Arc<dyn CellType>) -> Self {
        self.cell_types.push(cell_type);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.push(serializer);
        self
    }

    pub fn with_layout(mut self, layout: Arc<dyn Layout>) -> Self {
        self.layouts.push(layout);
        self
    }

    pub fn with_theme(mut self, theme: Arc<dyn Theme>) -> Self {
        self.themes.push(theme);
        self
    }

    pub fn with_magic_command(mut self, command: Arc<dyn MagicCommand>) -> Self {
        self.magic_commands.push(command);
        self
    }

    pub fn with_toolbar_action(mut self, action: Arc<dyn ToolbarAction>) -> Self {
        self.toolbar_actions.push(action);
        self
    }

    pub fn with_post_processor(mut self, processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    /// Tags for every non-empty bucket, in declaration order.
    pub fn tags(&self) -> Vec<Capability> {
        [
            (Capability::Kernel, self.kernels.is_empty()),
            (Capability::Renderer, self.renderers.is_empty()),
            (Capability::Formatter, self.formatters.is_empty()),
            (Capability::CellType, self.cell_types.is_empty()),
            (Capability::Serializer, self.serializers.is_empty()),
            (Capability::Layout, self.layouts.is_empty()),
            (Capability::Theme, self.themes.is_empty()),
            (Capability::MagicCommand, self.magic_commands.is_empty()),
            (Capability::ToolbarAction, self.toolbar_actions.is_empty()),
            (Capability::PostProcessor, self.post_processors.is_empty()),
        ]
        .into_iter()
        .filter(|(_, empty)| !empty)
        .map(|(tag, _)| tag)
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tags().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dark;

    impl Theme for Dark {
        fn id(&self) -> &str {
            "dark"
        }
        fn display_name(&self) -> &str {
            "Dark"
        }
        fn is_dark(&self) -> bool {
            true
        }
    }

    struct Upper;

    impl PostProcessor for Upper {
        fn id(&self) -> &str {
            "upper"
        }
        fn process(&self, outputs: Vec<CellOutput>) -> Vec<CellOutput> {
            outputs
        }
    }

    #[test]
    fn test_empty_bundle_has_no_tags() {
        assert!(Capabilities::new().is_empty());
    }

    #[test]
    fn test_tags_follow_buckets() {
        let caps = Capabilities::new()
            .with_post_processor(Arc::new(Upper))
            .with_theme(Arc::new(Dark));
        assert_eq!(caps.tags(), vec![Capability::Theme, Capability::PostProcessor]);
    }
}
