use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use opwatch::core::settings::Settings;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod cli;
mod daemon;

#[derive(Parser)]
#[command(name = "opwatch")]
#[command(author, version, about = "Polling monitor for exception stores")]
struct Cli {
    /// Config file (defaults to ~/.config/opwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling scheduler until interrupted
    Daemon,

    /// Refresh every node once and show its status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Only refresh and show this node
        #[arg(long)]
        node: Option<String>,
    },

    /// Show the newest errors of a store
    Errors {
        /// Exception store name
        #[arg(long)]
        store: String,

        /// Only this application
        #[arg(long)]
        app: Option<String>,

        /// Only applications in this group
        #[arg(long)]
        group: Option<String>,

        /// Maximum errors per application
        #[arg(long, default_value = "25")]
        count: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Protect an error from deletion
    Protect {
        #[arg(long)]
        store: String,

        #[arg(long)]
        guid: Uuid,
    },

    /// Soft-delete an error
    Delete {
        #[arg(long)]
        store: String,

        #[arg(long)]
        guid: Uuid,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    init_logging(cli.log_json);
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Daemon => daemon::run(settings).await,
        Commands::Status { json, node } => cli::status::run(&settings, json, node).await,
        Commands::Errors {
            store,
            app,
            group,
            count,
            json,
        } => {
            let query = cli::errors::ErrorsQuery {
                store,
                app,
                group,
                count,
            };
            cli::errors::run(&settings, query, json).await
        }
        Commands::Protect { store, guid } => {
            cli::mutate::run(&settings, &store, guid, cli::mutate::Mutation::Protect).await
        }
        Commands::Delete { store, guid } => {
            cli::mutate::run(&settings, &store, guid, cli::mutate::Mutation::Delete).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}
