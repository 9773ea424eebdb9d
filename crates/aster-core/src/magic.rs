//! Magic directives.
//!
//! The first non-blank line of a cell may start with `#!`, `%%` or `%`
//! followed by a command name. If an enabled extension provides a magic
//! command with that name, it runs before the kernel and may suppress the
//! kernel call entirely.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::execute::{AbortHandle, OutputSink};
use crate::extension::CapabilityRegistry;
use crate::kernel::KernelRegistry;
use crate::output::CellOutput;
use crate::scaffold::CellId;
use crate::variables::VariableStore;

/// Recognized directive prefixes, longest first.
pub const DIRECTIVE_PREFIXES: [&str; 3] = ["#!", "%%", "%"];

/// A parsed directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    /// Rest of the directive line, trimmed.
    pub args: String,
    /// Source lines after the directive line.
    pub body: String,
}

/// Parse a directive from the first non-blank line of `source`.
pub fn parse_directive(source: &str) -> Option<Directive> {
    let mut lines = source.lines();
    let line = lines.by_ref().find(|l| !l.trim().is_empty())?.trim();

    let rest = DIRECTIVE_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(*prefix))?;
    let name_len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    let (name, args) = rest.split_at(name_len);
    if name.is_empty() || !args.chars().next().is_none_or(char::is_whitespace) {
        return None;
    }

    Some(Directive {
        name: name.to_string(),
        args: args.trim().to_string(),
        body: lines.collect::<Vec<_>>().join("\n"),
    })
}

/// What a magic command can reach while it runs.
pub struct MagicContext<'a> {
    cell_id: &'a CellId,
    language: &'a str,
    execution_count: u64,
    variables: &'a Arc<VariableStore>,
    kernels: &'a KernelRegistry,
    extensions: &'a CapabilityRegistry,
    abort: &'a AbortHandle,
    sink: &'a OutputSink,
    suppressed: bool,
}

impl<'a> MagicContext<'a> {
    pub(crate) fn new(
        cell_id: &'a CellId,
        language: &'a str,
        execution_count: u64,
        variables: &'a Arc<VariableStore>,
        kernels: &'a KernelRegistry,
        extensions: &'a CapabilityRegistry,
        abort: &'a AbortHandle,
        sink: &'a OutputSink,
    ) -> Self {
        Self {
            cell_id,
            language,
            execution_count,
            variables,
            kernels,
            extensions,
            abort,
            sink,
            suppressed: false,
        }
    }

    pub fn cell_id(&self) -> &CellId {
        self.cell_id
    }

    /// Effective language of the cell.
    pub fn language(&self) -> &str {
        self.language
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn variables(&self) -> &Arc<VariableStore> {
        self.variables
    }

    pub fn kernels(&self) -> &KernelRegistry {
        self.kernels
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        self.abort
    }

    pub fn write(&self, output: CellOutput) {
        self.sink.write(output);
    }

    pub fn display(&self, display_id: &str, output: CellOutput) {
        self.sink.display(display_id, output);
    }

    /// Skip the kernel call for this run.
    pub fn suppress_execution(&mut self) {
        self.suppressed = true;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Restart the cell's kernel, clearing all shared variables.
    pub async fn restart_kernel(&self) -> Result<()> {
        self.restart_language(self.language).await
    }

    /// Restart the kernel for `language`, adopting it from an enabled
    /// extension first if nothing has run in that language yet.
    pub async fn restart_language(&self, language: &str) -> Result<()> {
        self.kernels.resolve(language, self.extensions)?;
        self.kernels.restart(language).await
    }
}

/// A directive handler provided by an extension.
#[async_trait]
pub trait MagicCommand: Send + Sync {
    /// Name matched case-insensitively against the directive.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn invoke(&self, args: &str, body: &str, ctx: &mut MagicContext<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent_directive() {
        let d = parse_directive("%restart").unwrap();
        assert_eq!(d.name, "restart");
        assert_eq!(d.args, "");
        assert_eq!(d.body, "");
    }

    #[test]
    fn test_parse_skips_blank_lines_and_keeps_body() {
        let d = parse_directive("\n  \n%%time  fast \nx = 1\ny = 2").unwrap();
        assert_eq!(d.name, "time");
        assert_eq!(d.args, "fast");
        assert_eq!(d.body, "x = 1\ny = 2");
    }

    #[test]
    fn test_parse_hash_bang() {
        let d = parse_directive("#!set x 3").unwrap();
        assert_eq!(d.name, "set");
        assert_eq!(d.args, "x 3");
    }

    #[test]
    fn test_not_a_directive() {
        assert!(parse_directive("1 + 1").is_none());
        assert!(parse_directive("").is_none());
        assert!(parse_directive("%").is_none());
        assert!(parse_directive("#!/usr/bin/env python").is_none());
        assert!(parse_directive("%who?").is_none());
        assert!(parse_directive("x = 1\n%who").is_none());
    }
}
