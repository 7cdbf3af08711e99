use clap::Parser;
use hub_link::cli::{Cli, Commands};
use hub_link::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });
    if let Some(endpoint) = cli.endpoint {
        config.hub.endpoint = endpoint;
    }

    // Initialize telemetry
    hub_link::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Listen(args) => {
            tracing::info!("Starting listener");
            args.execute(&config.hub).await?;
        }
        Commands::Invoke(args) => {
            args.execute(&config.hub).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
