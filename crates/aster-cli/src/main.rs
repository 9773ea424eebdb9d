//! Aster CLI - notebook engine with pluggable kernels.

mod colors;
mod extensions;
mod run;
mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aster")]
#[command(about = "Notebook engine with pluggable kernels and extensions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every cell of a notebook headlessly
    Run {
        /// Path to the notebook (.json file)
        notebook: String,

        /// Language for cells that do not name one
        #[arg(long)]
        default_language: Option<String>,

        /// Write the executed notebook to this path
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Start the notebook server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Language for notebooks that do not name one
        #[arg(long, default_value = "calc")]
        default_language: String,
    },

    /// List the built-in extensions
    Extensions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Helper to format aster-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(aster_err) = err.downcast_ref::<aster_core::Error>() {
            anyhow::anyhow!("{}", aster_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            notebook,
            default_language,
            output,
        } => {
            run::execute(&notebook, default_language, output.as_deref())
                .await
                .map_err(format_error)?;
        }

        Commands::Serve {
            host,
            port,
            default_language,
        } => {
            serve::execute(host, port, default_language)
                .await
                .map_err(format_error)?;
        }

        Commands::Extensions => extensions::execute(),
    }

    Ok(())
}
