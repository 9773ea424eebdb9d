//! Extensions command implementation for Aster CLI.

use crate::colors;

/// Print the built-in extension catalog.
pub fn execute() {
    println!("\n{}Built-in extensions{}", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));

    for (manifest, capabilities) in aster_server::builtin_catalog().describe() {
        let tags: Vec<String> = capabilities
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        println!(
            "{}{}{} {}v{}{}",
            colors::CYAN,
            manifest.id,
            colors::RESET,
            colors::DIM,
            manifest.version,
            colors::RESET
        );
        if let Some(description) = &manifest.description {
            println!("    {description}");
        }
        println!("    provides: {}", tags.join(", "));
    }
}
