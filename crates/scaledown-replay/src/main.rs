use clap::{Parser, Subcommand};

mod commands;
mod scenario;

#[derive(Parser)]
#[command(
    name = "scaledown-replay",
    about = "Replay scale-down scenarios through the node latency tracker",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario and print the resulting removal latency metrics.
    Run {
        /// Scenario file (TOML)
        #[arg(short, long)]
        scenario: String,
        /// scaledown.toml with tracker and metrics settings
        #[arg(short, long)]
        config: Option<String>,
        /// Output format: prometheus or json
        #[arg(short, long, default_value = "prometheus")]
        format: String,
    },
    /// Check a scenario (and optional config) without replaying it.
    Validate {
        #[arg(short, long)]
        scenario: String,
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // stdout carries the rendered metrics; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scaledown=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { scenario, config, format } => {
            commands::run::run(&scenario, config.as_deref(), &format)
        }
        Commands::Validate { scenario, config } => {
            commands::validate::validate(&scenario, config.as_deref())
        }
    }
}
