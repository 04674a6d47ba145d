//! StamOrga client: entry point.
//!
//! ```text
//! stam-client [--config <path>] [--user <name>] [--password <pw>] <command>
//! stam-client --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use stam_client::{Action, ClientConfig, execute};
use stam_core::{Client, ResultCode};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "stam-client", about = "StamOrga command-line client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "stam-client.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the configured server host.
    #[arg(long)]
    server: Option<String>,

    /// Override the configured user name.
    #[arg(short, long)]
    user: Option<String>,

    /// Override the configured password.
    #[arg(short, long)]
    password: Option<String>,

    #[command(subcommand)]
    action: Option<Action>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(server) = cli.server {
        config.network.server_host = server;
    }
    if let Some(user) = cli.user {
        config.account.user_name = user;
    }
    if let Some(password) = cli.password {
        config.account.password = password;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(action) = cli.action else {
        eprintln!("no command given, see --help");
        return Ok(ExitCode::from(2));
    };
    if config.account.user_name.is_empty() {
        eprintln!("no user name configured, use --user");
        return Ok(ExitCode::from(2));
    }

    info!(
        "connecting to {}:{} as {}",
        config.network.server_host, config.network.discovery_port, config.account.user_name
    );
    let (client, _events) = Client::spawn(config.to_connection_config());

    let code = client
        .login(config.account.user_name.clone(), config.account.password.clone())
        .await?;
    if !code.is_success() {
        eprintln!("login failed: {code}");
        client.stop().await?;
        return Ok(ExitCode::FAILURE);
    }
    debug!(state = %client.state(), "logged in");

    let outcome = execute(&client, &action).await?;
    client.stop().await?;

    for line in &outcome.lines {
        println!("{line}");
    }
    match outcome.code {
        ResultCode::Success | ResultCode::NoError => Ok(ExitCode::SUCCESS),
        ResultCode::NewVersion => {
            println!("a newer version is available");
            Ok(ExitCode::SUCCESS)
        }
        code => {
            eprintln!("{action:?} failed: {code}");
            Ok(ExitCode::FAILURE)
        }
    }
}
