use cep_bridge::channel::{CommandChannel, SendOptions};
use cep_bridge::{init, janitor, script, tools};

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "CEP Bridge - drive a host scripting engine through a shared directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $CEP_BRIDGE_CONFIG, then ~/.cep-bridge/bridge.yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Shared command directory (default: $CEP_BRIDGE_DIR, then <temp>/cep-bridge)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Assemble a script body from a file and run it in the host
    Exec {
        file: PathBuf,
        /// Skip the pattern blocklist (the size limit still applies)
        #[arg(long)]
        unchecked: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Run one of the built-in tools
    Tool {
        name: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List the built-in tools
    Tools,
    /// Remove orphaned command/response files
    Sweep {
        /// Only remove files older than the configured max age
        #[arg(long)]
        stale: bool,
    },
    /// Sweep on start, then keep sweeping at idle intervals until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cep_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Cli::parse();
    let config = init::load_config(args.config, args.dir)?;
    let bridge = config.bridge_config();
    let channel = CommandChannel::new(config.security.clone());

    match args.command {
        Commands::Exec { file, unchecked, timeout_ms } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read script body at {:?}", file))?;
            let call_config = match timeout_ms {
                Some(ms) => bridge.with_timeout(ms),
                None => bridge.clone(),
            };
            let options = if unchecked { SendOptions::unchecked() } else { SendOptions::validated() };

            let response = channel
                .send(&script::assemble(&body), &call_config, &options)
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
        }
        Commands::Tool { name, args } => {
            let tool_args: serde_json::Value =
                serde_json::from_str(&args).context("Tool arguments must be a JSON object")?;
            let result = tools::dispatch_tool(&channel, &bridge, &name, &tool_args).await;
            if result.is_error {
                eprintln!("{}", result.output);
                std::process::exit(1);
            }
            println!("{}", result.output);
        }
        Commands::Tools => {
            println!("{}", serde_json::to_string_pretty(&tools::tool_definitions())?);
        }
        Commands::Sweep { stale } => {
            let report = if stale {
                janitor::sweep_stale(&bridge.directory, config.sweep_max_age())
            } else {
                janitor::sweep(&bridge.directory)
            };
            println!("Removed {} file(s), {} failed", report.removed, report.failed);
        }
        Commands::Watch => {
            init::prepare_directory(&config, &bridge.directory);
            tokio::select! {
                _ = janitor::run_janitor_loop(
                    bridge.directory.clone(),
                    config.sweep_interval(),
                    config.sweep_max_age(),
                ) => {},
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                },
            }
        }
    }

    Ok(())
}
