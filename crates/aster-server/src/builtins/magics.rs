//! Core magic commands.

use async_trait::async_trait;

use aster_core::{CellOutput, MagicCommand, MagicContext};

/// `%restart [language]`: restart a kernel and skip the cell body.
pub struct RestartMagic;

#[async_trait]
impl MagicCommand for RestartMagic {
    fn name(&self) -> &str {
        "restart"
    }

    fn description(&self) -> &str {
        "Restart the cell's kernel (or the named one) and clear all variables"
    }

    async fn invoke(&self, args: &str, _body: &str, ctx: &mut MagicContext<'_>) -> aster_core::Result<()> {
        ctx.suppress_execution();
        let language = args.trim();
        if language.is_empty() {
            ctx.restart_kernel().await?;
            ctx.write(CellOutput::stdout(format!("Restarted {} kernel\n", ctx.language())));
        } else {
            ctx.restart_language(language).await?;
            ctx.write(CellOutput::stdout(format!("Restarted {language} kernel\n")));
        }
        Ok(())
    }
}

/// `%who`: list shared variable names.
pub struct WhoMagic;

#[async_trait]
impl MagicCommand for WhoMagic {
    fn name(&self) -> &str {
        "who"
    }

    fn description(&self) -> &str {
        "List variables in the shared store"
    }

    async fn invoke(&self, _args: &str, body: &str, ctx: &mut MagicContext<'_>) -> aster_core::Result<()> {
        let names = ctx.variables().names();
        let text = if names.is_empty() {
            "No variables\n".to_string()
        } else {
            format!("{}\n", names.join("  "))
        };
        ctx.write(CellOutput::stdout(text));
        if body.trim().is_empty() {
            ctx.suppress_execution();
        }
        Ok(())
    }
}

/// `%set name value`: store a variable. The value is parsed as JSON and
/// kept as a string when it is not valid JSON.
pub struct SetMagic;

#[async_trait]
impl MagicCommand for SetMagic {
    fn name(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Set a shared variable: %set <name> <json value>"
    }

    async fn invoke(&self, args: &str, body: &str, ctx: &mut MagicContext<'_>) -> aster_core::Result<()> {
        let (name, raw) = args
            .split_once(char::is_whitespace)
            .map(|(n, v)| (n, v.trim()))
            .unwrap_or((args, ""));
        if name.is_empty() || raw.is_empty() {
            return Err(aster_core::Error::execution(
                "UsageError",
                "usage: %set <name> <value>",
            ));
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        ctx.variables().set(name, value);
        if body.trim().is_empty() {
            ctx.suppress_execution();
        }
        Ok(())
    }
}
