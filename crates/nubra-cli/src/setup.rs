//! Configuration commands and the shared config/data-dir resolution.

use colored::*;

use nubra_core::config::NubraConfig;

/// Load the saved config (defaults when absent) with environment overrides.
pub fn load_config() -> anyhow::Result<NubraConfig> {
    let mut config = NubraConfig::load(&NubraConfig::default_path())?;
    config.apply_env();
    Ok(config)
}

fn row(key: &str, value: ColoredString) {
    println!("  {} {} = {}", "│".dimmed(), key.cyan(), value);
}

fn secret(value: &Option<String>) -> ColoredString {
    if value.is_some() {
        "••••••••(set)".green()
    } else {
        "(not set)".red()
    }
}

/// Show current config (hide sensitive values).
pub fn run_config_show() -> anyhow::Result<()> {
    let config_path = NubraConfig::default_path();

    println!();
    println!("  {} {}", "Config file:".dimmed(), config_path.display());
    if !config_path.exists() {
        println!(
            "  {}",
            "No config file yet; showing defaults. Use `nubra config set` to change them.".yellow()
        );
    }
    println!();

    let config = load_config()?;

    println!("  {}", "┌─ Provider ─────────────────────".dimmed());
    row("provider", config.provider.provider.green());
    row("model", config.provider.model.green());
    row("api_key", secret(&config.provider.api_key));
    row("chatbot_id", secret(&config.provider.chatbot_id));
    if let Some(ref base) = config.provider.api_base {
        row("api_base", base.dimmed());
    }
    println!("  {}", "│".dimmed());
    println!("  {}", "├─ Server ───────────────────────".dimmed());
    row(
        "listen",
        format!("{}:{}", config.server.host, config.server.port).yellow(),
    );
    row(
        "rate_limit",
        format!(
            "{} req / {}s",
            config.server.rate_limit_max, config.server.rate_limit_window_secs
        )
        .yellow(),
    );
    row(
        "allowed_origins",
        if config.server.allowed_origins.is_empty() {
            "*".dimmed()
        } else {
            config.server.allowed_origins.join(", ").normal()
        },
    );
    println!("  {}", "│".dimmed());
    println!("  {}", "├─ Client ───────────────────────".dimmed());
    for url in &config.client.backend_urls {
        row("backend", url.normal());
    }
    row(
        "data_dir",
        config.client.data_dir().display().to_string().dimmed(),
    );
    println!("  {}", "│".dimmed());
    println!("  {}", "├─ Memory ───────────────────────".dimmed());
    row(
        "threshold",
        config.memory.threshold.to_string().yellow(),
    );
    row("max_chunks", config.memory.max_chunks.to_string().yellow());
    println!("  {}", "└───────────────────────────────".dimmed());
    println!();

    Ok(())
}

/// Set one dotted key and save the file.
pub fn run_config_set(key: &str, value: &str) -> anyhow::Result<()> {
    let config_path = NubraConfig::default_path();
    let mut config = NubraConfig::load(&config_path)?;
    config.set_value(key, value)?;
    config.save(&config_path)?;

    let shown = if key.ends_with("api_key") {
        "••••••••".to_string()
    } else {
        value.to_string()
    };
    println!("  {} {} = {}", "✅".green(), key.cyan(), shown);
    Ok(())
}
