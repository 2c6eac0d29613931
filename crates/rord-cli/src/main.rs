use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "rord")]
#[command(about = "Rule-order reconciliation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Apply a reorder plan against the configured rule API
    Apply {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// YAML plan: collection + rules [{id, order, rank}]
        #[arg(long)]
        plan: String,

        /// Override reorder.tick_interval_ms for this run
        #[arg(long)]
        tick_interval_ms: Option<u64>,

        /// Refuse config keys nothing reads (default: warn only)
        #[arg(long, default_value_t = false)]
        strict_config: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let loaded = rord_config::load_layered_yaml(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Apply {
            config_paths,
            plan,
            tick_interval_ms,
            strict_config,
        } => {
            let summary = commands::apply::run_apply(commands::apply::ApplyArgs {
                config_paths,
                plan_path: plan,
                tick_interval_ms,
                strict_config,
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.failed > 0 {
                anyhow::bail!("APPLY_FAILED: {} rule(s) were not reordered", summary.failed);
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr; stdout carries only command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
