use clap::Parser;
use real_analyst::agents::ChatService;
use real_analyst::cli::{Cli, Command, Repl};
use real_analyst::config::Settings;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the chat
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("real_analyst=info")))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::new_with_cli(&cli)?;
    info!(
        config = %cli.config.display(),
        backend = ?settings.hosting.backend,
        agents = settings.agents.len(),
        "Configuration loaded"
    );

    let service = Arc::new(ChatService::from_settings(&settings).await?);

    match cli.command() {
        Command::Bootstrap => {
            for agent in service.agents().await {
                println!("{} ({}) tools: [{}]", agent.name, agent.id, agent.tools.join(", "));
            }
        }
        Command::Serve => {
            let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
            real_analyst::api::serve(service, addr).await?;
        }
        Command::Chat => {
            let mut repl = Repl::start(service).await?;
            repl.run().await?;
        }
    }

    Ok(())
}
