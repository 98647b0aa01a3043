//! dlrelay CLI - download request relay
//!
//! Runs the relay server in front of an aria2 daemon and talks to a
//! running relay from the command line.

mod client;
mod commands;
mod config;
mod output;
mod progress;
mod server;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use client::RelayClient;
use dlrelay_types::{Credentials, HttpAuth, SourceKind};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// dlrelay - download request relay for aria2
#[derive(Parser)]
#[command(name = "dlrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for dlrelay
    #[arg(long, env = "DLRELAY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    remote: RemoteArgs,

    #[command(subcommand)]
    command: Commands,
}

/// How to reach a running relay
#[derive(Args)]
struct RemoteArgs {
    /// Relay base URL
    #[arg(long, global = true, env = "DLRELAY_SERVER", default_value = "http://127.0.0.1:7899")]
    server: String,

    /// Relay user
    #[arg(long, global = true, env = "DLRELAY_USER")]
    user: Option<String>,

    /// Relay password
    #[arg(long, global = true, env = "DLRELAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum KindArg {
    Torrent,
    Http,
    Video,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Torrent => SourceKind::Torrent,
            KindArg::Http => SourceKind::Http,
            KindArg::Video => SourceKind::Video,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Address to listen on
        #[arg(long, env = "DLRELAY_LISTEN")]
        listen: Option<SocketAddr>,

        /// aria2 JSON-RPC endpoint
        #[arg(long, env = "DLRELAY_ENGINE_URL")]
        engine_url: Option<String>,

        /// aria2 RPC secret
        #[arg(long, env = "DLRELAY_ENGINE_SECRET", hide_env_values = true)]
        engine_secret: Option<String>,
    },

    /// Manage relay users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Submit a download
    Add {
        /// Owner to file the download under
        owner: String,

        /// URI, magnet link or video page
        uri: String,

        /// Source kind
        #[arg(short, long, value_enum, default_value = "http")]
        kind: KindArg,

        /// Login for a protected HTTP download
        #[arg(long, requires = "http_password")]
        http_user: Option<String>,

        /// Password for a protected HTTP download
        #[arg(long, requires = "http_user")]
        http_password: Option<String>,
    },

    /// Show progress for an owner
    Status {
        /// Owner to query
        owner: String,
    },

    /// Follow progress for an owner
    Watch {
        /// Owner to follow
        owner: String,

        /// Seconds between polls
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user or change its password
    Add {
        /// User name
        username: String,

        /// Password; prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Delete a user
    Remove {
        /// User name
        username: String,
    },

    /// List users
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    let remote = cli.remote;
    let client = || {
        RelayClient::new(
            &remote.server,
            Credentials::new(
                remote.user.clone().unwrap_or_default(),
                remote.password.clone().unwrap_or_default(),
            ),
        )
    };

    match cli.command {
        Commands::Serve {
            listen,
            engine_url,
            engine_secret,
        } => {
            let mut settings = config::load_settings(&data_dir).await?;
            if let Some(listen) = listen {
                settings.listen_addr = listen;
            }
            if let Some(url) = engine_url {
                settings.engine_rpc_url = url;
            }
            if engine_secret.is_some() {
                settings.engine_secret = engine_secret;
            }
            commands::serve(&data_dir, settings).await?
        }

        Commands::User { action } => {
            let settings = config::load_settings(&data_dir).await?;
            commands::user_action(&data_dir, &settings, action, cli.output).await?
        }

        Commands::Add {
            owner,
            uri,
            kind,
            http_user,
            http_password,
        } => {
            let auth = match (http_user, http_password) {
                (Some(username), Some(password)) => Some(HttpAuth { username, password }),
                _ => None,
            };
            commands::add_download(&client()?, &owner, &uri, kind.into(), auth, cli.output)
                .await?
        }

        Commands::Status { owner } => {
            commands::show_status(&client()?, &owner, cli.output).await?
        }

        Commands::Watch { owner, interval } => {
            let interval = Duration::from_secs(interval.max(1));
            commands::watch_status(&client()?, &owner, interval).await?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "dlrelay", &mut std::io::stdout());
        }
    }

    Ok(())
}
