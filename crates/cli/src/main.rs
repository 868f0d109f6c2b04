mod config_commands;
mod plugins_commands;
mod tools_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    tessera_config::TesseraConfig,
    tessera_dispatcher::{Tessera, build_arguments},
};

#[derive(Parser)]
#[command(name = "tessera", version, about = "Tessera: plugin runtime and tool gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./tessera.toml and the user config dir).
    #[arg(long, global = true, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plugin command or gateway tool.
    Exec {
        /// Command name, or `mcp__<provider>__<tool>`.
        command: String,
        /// Arguments as key=value pairs.
        args: Vec<String>,
        /// Arguments as a JSON object; key=value pairs override its fields.
        #[arg(long)]
        json: Option<String>,
        /// Print the full result as JSON.
        #[arg(long)]
        raw: bool,
    },
    /// Plugin inspection.
    Plugins {
        #[command(subcommand)]
        action: plugins_commands::PluginAction,
    },
    /// Capability provider tools.
    Tools {
        #[command(subcommand)]
        action: tools_commands::ToolAction,
    },
    /// Start everything, print plugin and provider status, then stop.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

pub(crate) fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TesseraConfig> {
    match path {
        Some(path) => tessera_config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(tessera_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    debug!(version = env!("CARGO_PKG_VERSION"), "tessera starting");

    match cli.command {
        Commands::Exec {
            command,
            args,
            json,
            raw,
        } => {
            let arguments = build_arguments(json.as_deref(), &args)?;
            let host = Tessera::from_config(load_config(cli.config.as_ref())?);
            let report = host.start().await?;
            for (plugin, error) in &report.failed {
                eprintln!("warning: plugin '{plugin}' failed to load: {error}");
            }
            let result = host.execute(&command, arguments).await;
            host.shutdown().await;

            if raw {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                if !result.output.is_empty() {
                    println!("{}", result.output);
                }
            } else {
                eprintln!("error: {}", result.error.as_deref().unwrap_or("command failed"));
            }
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        },
        Commands::Plugins { action } => {
            plugins_commands::handle_plugins(action, load_config(cli.config.as_ref())?).await
        },
        Commands::Tools { action } => {
            tools_commands::handle_tools(action, load_config(cli.config.as_ref())?).await
        },
        Commands::Status { json } => status(load_config(cli.config.as_ref())?, json).await,
        Commands::Config { action } => config_commands::handle_config(action, cli.config.as_deref()),
    }
}

async fn status(config: TesseraConfig, json: bool) -> anyhow::Result<()> {
    let host = Tessera::from_config(config);
    let report = host.start().await?;
    let status = host.status().await;
    host.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Plugins:");
    if status.plugins.is_empty() {
        println!("  (none)");
    }
    for plugin in &status.plugins {
        println!(
            "  {:<24} {:<10} v{} [{:?}]",
            plugin.name, plugin.status, plugin.version, plugin.source
        );
        if let Some(error) = &plugin.last_error {
            println!("    ↳ {error}");
        }
    }

    println!("\nProviders:");
    if status.providers.is_empty() {
        println!("  (none)");
    }
    for provider in &status.providers {
        let enabled = if provider.enabled {
            ""
        } else {
            " (disabled)"
        };
        println!(
            "  {:<24} {:<10} {:<10} {} tools{enabled}",
            provider.name, provider.transport, provider.state, provider.tool_count
        );
    }

    println!("\nCommands:");
    if status.commands.is_empty() {
        println!("  (none)");
    }
    for (command, plugin) in &status.commands {
        println!("  {command:<24} {plugin}");
    }

    println!(
        "\nEvents: {} published, {} delivered, {} handler failures",
        status.bus.total_published, status.bus.total_delivered, status.bus.total_failed
    );
    if !report.failed.is_empty() {
        println!("\n{} plugin(s) failed to load", report.failed.len());
    }
    Ok(())
}
