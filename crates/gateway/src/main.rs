use clap::Parser;
use tracing_subscriber::EnvFilter;

use mg_domain::config::{Config, ConfigSeverity};
use mg_gateway::cli::{Cli, Command, RulesCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = mg_gateway::cli::load_config(cli.config.as_deref())?;
            run_server(config).await
        }
        Some(Command::Rules { command }) => match command {
            RulesCommand::Validate { paths, summary } => {
                let clean = mg_gateway::cli::validate_rule_files(&paths, summary);
                if !clean {
                    std::process::exit(1);
                }
                Ok(())
            }
        },
        Some(Command::Version) => {
            println!("medgate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the server.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mg_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("MedGate starting");

    // Fatal config aborts here, never at request time.
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let state = mg_gateway::bootstrap::build_state(config).await?;
    let router = mg_gateway::api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
