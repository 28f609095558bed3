//! Subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use delve_core::DeepResearch;
use delve_core::config::{default_config_toml, load_config, workspace_config_path};
use delve_mcp::McpServer;
use delve_mcp::transport::StdioTransport;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace).await,
        Commands::Mcp => handle_mcp(workspace).await,
        Commands::Serve { port, host } => handle_serve(workspace, host, port).await,
    }
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = init_config(workspace)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            for warning in config.validate()? {
                eprintln!("warning: {warning}");
            }
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

/// Write the default workspace config, refusing to overwrite an existing one.
fn init_config(workspace: &Path) -> anyhow::Result<std::path::PathBuf> {
    let config_path = workspace_config_path(workspace);
    if config_path.exists() {
        anyhow::bail!(
            "Configuration file already exists at: {}",
            config_path.display()
        );
    }
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&config_path, default_config_toml()?)?;
    Ok(config_path)
}

/// Build the production research stack from layered configuration.
pub fn build_research(workspace: &Path) -> anyhow::Result<DeepResearch> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    for warning in config.validate()? {
        tracing::warn!("{warning}");
    }
    Ok(DeepResearch::from_config(&config)?)
}

async fn handle_mcp(workspace: &Path) -> anyhow::Result<()> {
    let research = Arc::new(build_research(workspace)?);
    let mut server = McpServer::new(research);
    let mut transport = StdioTransport::stdio();
    server.run(&mut transport).await?;
    Ok(())
}

async fn handle_serve(workspace: &Path, host: IpAddr, port: u16) -> anyhow::Result<()> {
    let research = Arc::new(build_research(workspace)?);
    let addr = SocketAddr::new(host, port);
    eprintln!("MCP server listening on http://{addr}/mcp");
    delve_mcp::http::serve(research, addr).await?;
    Ok(())
}
