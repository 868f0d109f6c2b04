//! CLI commands for capability provider tools.

use clap::Subcommand;

use {
    tessera_config::TesseraConfig,
    tessera_dispatcher::build_arguments,
    tessera_mcp::{GatewaySettings, ProtocolGateway, ProviderRegistry},
};

#[derive(Subcommand)]
pub enum ToolAction {
    /// List the tools a provider offers.
    List {
        /// Provider name from `[[providers]]`.
        provider: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Invoke a tool.
    Call {
        provider: String,
        tool: String,
        /// Arguments as key=value pairs.
        args: Vec<String>,
        /// Arguments as a JSON object; key=value pairs override its fields.
        #[arg(long)]
        json: Option<String>,
    },
}

pub async fn handle_tools(action: ToolAction, config: TesseraConfig) -> anyhow::Result<()> {
    let gateway = ProtocolGateway::new(
        ProviderRegistry::from_configs(&config.providers),
        GatewaySettings::from(&config.gateway),
    );

    let outcome = run(&gateway, action).await;
    gateway.shutdown_all().await;
    outcome
}

async fn run(gateway: &ProtocolGateway, action: ToolAction) -> anyhow::Result<()> {
    match action {
        ToolAction::List { provider, json } => {
            let tools = gateway.list_capabilities(&provider).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else if tools.is_empty() {
                println!("Provider '{provider}' offers no tools.");
            } else {
                for tool in &tools {
                    println!(
                        "  {} - {}",
                        tool.name,
                        tool.description.as_deref().unwrap_or("")
                    );
                }
            }
        },
        ToolAction::Call {
            provider,
            tool,
            args,
            json,
        } => {
            let arguments = build_arguments(json.as_deref(), &args)?;
            let result = gateway.invoke(&provider, &tool, arguments).await?;
            if result.is_error {
                eprintln!("error: {}", result.to_text());
                gateway.shutdown_all().await;
                std::process::exit(1);
            }
            println!("{}", result.to_text());
        },
    }
    Ok(())
}
