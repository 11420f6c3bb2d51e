use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasklane::config::CliOverrides;
use tasklane::realtime::RealtimeMode;
use tasklane::telemetry::{LogFormat, init_tracing};

mod cmd;

#[derive(Parser)]
#[command(name = "tasklane")]
#[command(version, about = "Task and chat service for coding agents")]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Path to tasklane.toml. Defaults to ./tasklane.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path. Overrides the config file and TASKLANE_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Realtime transport for live task views: native or socket
        #[arg(long)]
        realtime: Option<RealtimeMode>,

        /// Treat every unauthenticated request as the local dev user
        #[arg(long)]
        bypass_auth: bool,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and its schema, then exit
    Init,
    /// Create a user if needed and print a new session token
    Session {
        #[arg(long)]
        email: String,

        /// Display name; defaults to the part of the email before `@`
        #[arg(long)]
        name: Option<String>,

        /// Session lifetime in days
        #[arg(long, default_value = "30")]
        days: i64,
    },
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let base = CliOverrides {
        db_path: cli.db_path.clone(),
        ..CliOverrides::default()
    };
    let config_path = cli.config.as_deref();

    match &cli.command {
        Commands::Serve {
            port,
            realtime,
            bypass_auth,
            dev,
        } => {
            let overrides = CliOverrides {
                port: *port,
                realtime: *realtime,
                bypass_auth: *bypass_auth,
                ..base
            };
            cmd::cmd_serve(config_path, overrides, *dev).await?;
        }
        Commands::Init => cmd::cmd_init(config_path, base)?,
        Commands::Session { email, name, days } => {
            cmd::cmd_session(config_path, base, email, name.as_deref(), *days)?
        }
        Commands::Config => cmd::cmd_config(config_path, base)?,
    }

    Ok(())
}
