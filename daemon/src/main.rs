use anyhow::Result;
use auraflowd::{app, config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "auraflowd")]
#[command(about = "Pose-driven visual effects daemon")]
struct Cli {
    /// Config file (defaults to ~/.config/auraflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run capture, rules, generation and the WebSocket server
    Serve,
    /// Generate one texture and print where it was written
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "gen")]
        prefix: String,
        /// PNG to restyle
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Print the update messages a recording produces, one JSON object per line
    Replay { recording: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("auraflow daemon (auraflowd) starting...");
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => info!("Shutdown requested"),
                        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                    }
                    cancel.cancel();
                }
            });
            app::serve(config, cancel).await?;
        }
        Commands::Generate {
            prompt,
            prefix,
            source,
        } => {
            let result = app::generate_once(&config, &prompt, &prefix, source.as_deref()).await?;
            info!("Generated with {} provider", result.provider);
            println!("{}", result.path.display());
        }
        Commands::Replay { recording } => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            app::replay(&config, &recording, &mut out)?;
        }
    }

    Ok(())
}
