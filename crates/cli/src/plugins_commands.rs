//! CLI commands for plugin inspection.

use clap::Subcommand;

use {
    tessera_config::TesseraConfig,
    tessera_dispatcher::Tessera,
    tessera_plugins::{PluginStatus, check_eligibility, read_manifest},
};

#[derive(Subcommand)]
pub enum PluginAction {
    /// List all discovered and bundled plugins.
    List {
        /// Load plugins first and show their resulting status.
        #[arg(long)]
        load: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show details about a plugin.
    Info {
        /// Plugin name.
        name: String,
    },
}

pub async fn handle_plugins(action: PluginAction, config: TesseraConfig) -> anyhow::Result<()> {
    let host = Tessera::from_config(config);

    match action {
        PluginAction::List { load, json } => {
            if load {
                host.start().await?;
            } else {
                host.discover_plugins().await?;
            }
            let plugins = host.runtime().list();
            host.shutdown().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&plugins)?);
                return Ok(());
            }
            if plugins.is_empty() {
                println!("No plugins found.");
                for dir in host.plugin_dirs() {
                    println!("  searched {}/<name>/PLUGIN.md", dir.display());
                }
                return Ok(());
            }
            for plugin in &plugins {
                let marker = match plugin.status {
                    PluginStatus::Active => "●",
                    PluginStatus::Failed => "✗",
                    _ => "○",
                };
                println!(
                    "  {marker} {name} v{version} - {desc} [{source:?}]",
                    name = plugin.name,
                    version = plugin.version,
                    desc = plugin.description,
                    source = plugin.source,
                );
                if let Some(error) = &plugin.last_error {
                    println!("    ↳ {error}");
                }
            }
        },
        PluginAction::Info { name } => {
            host.discover_plugins().await?;
            let info = host.runtime().info(&name);
            host.shutdown().await;

            let Some(info) = info else {
                eprintln!("Plugin '{name}' not found.");
                std::process::exit(1);
            };

            println!("Name:        {}", info.name);
            println!("Version:     {}", info.version);
            println!("Description: {}", info.description);
            println!("Source:      {:?}", info.source);
            if let Some(path) = &info.manifest_path {
                println!("Path:        {}", path.display());
            }
            println!("Priority:    {}", info.priority);
            println!("Hot reload:  {}", info.hot_reload);
            if !info.provides.is_empty() {
                println!("Provides:    {}", info.provides.join(", "));
            }
            if !info.requires.is_empty() {
                println!("Requires:    {}", info.requires.join(", "));
            }

            if let Some(path) = &info.manifest_path {
                let manifest = read_manifest(path)?;
                if !manifest.commands.is_empty() {
                    println!("Commands:");
                    for (command, line) in &manifest.commands {
                        println!("  {command:<16} {line}");
                    }
                }
                let eligibility = check_eligibility(&manifest.requirements);
                println!("Eligible:    {}", eligibility.eligible);
                if eligibility.missing_os {
                    println!("  Missing OS: {:?}", manifest.requirements.os);
                }
                if !eligibility.missing_bins.is_empty() {
                    println!("  Missing bins: {:?}", eligibility.missing_bins);
                }
                if !eligibility.missing_env.is_empty() {
                    println!("  Missing env: {:?}", eligibility.missing_env);
                }
            }
        },
    }

    Ok(())
}
