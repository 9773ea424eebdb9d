//! Serve command implementation for Aster CLI.

use aster_server::ServerConfig;

use crate::colors;

/// Start the notebook server.
pub async fn execute(host: String, port: u16, default_language: String) -> anyhow::Result<()> {
    let config = ServerConfig {
        host,
        port,
        default_language: Some(default_language),
        ..ServerConfig::default()
    };

    println!("\n{}Aster Server{} - Notebook Engine", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Server:{} http://{}:{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    println!(
        "{}  ◆ WebSocket:{} ws://{}:{}/ws",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    if let Some(language) = &config.default_language {
        println!("{}  ◆ Default language:{} {}", colors::CYAN, colors::RESET, language);
    }
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    aster_server::serve(config).await?;

    Ok(())
}
