//! CLI entry point: connects a [`trumble::bots::SimpleBot`] to a Mumble
//! server and runs it until disconnected. Ported from the original
//! Python package's `__main__.py` argument layout, in the teacher's
//! `clap`-derive style.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use trumble::bots::SimpleBot;
use trumble::connection::{read_pem, Config, Connection};

/// Connect to a Mumble server as a simple bot.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Server hostname.
    host: String,

    /// Server port.
    #[clap(default_value_t = 64738)]
    port: u16,

    /// Access token to present during authentication; may be repeated.
    #[clap(long = "access-token")]
    access_token: Vec<String>,

    /// Skip TLS certificate verification (most Mumble servers present
    /// self-signed certificates).
    #[clap(long)]
    no_verify: bool,

    /// Username to authenticate with.
    #[clap(long, default_value = "trumble")]
    username: String,

    /// Password to authenticate with, if the server requires one.
    #[clap(long, default_value = "")]
    password: String,

    /// Path to a PEM client certificate, for certificate-based authentication.
    #[clap(long, requires = "key")]
    cert: Option<String>,

    /// Path to the PEM private key matching `--cert`.
    #[clap(long, requires = "cert")]
    key: Option<String>,

    /// Minimum log level to emit.
    #[clap(long, default_value = "debug")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // `tracing` has no separate "critical" level; map it onto `error`.
    let log_level = match args.log_level.as_str() {
        "critical" => "error",
        other => other,
    };
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(log_level)).init();

    let certificate_key_pair = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => match (read_pem(cert), read_pem(key)) {
            (Ok(cert), Ok(key)) => Some((cert, key)),
            (Err(err), _) | (_, Err(err)) => {
                tracing::error!(error = %err, "failed to read client certificate/key");
                return ExitCode::FAILURE;
            }
        },
        _ => None,
    };

    let config = Config {
        host: args.host,
        port: args.port,
        verify: !args.no_verify,
        certificate_key_pair,
    };

    let bot = Arc::new(SimpleBot::new(args.username).with_password(args.password).with_access_tokens(args.access_token));

    let connection = match Connection::connect(config, bot).await {
        Ok(connection) => connection,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect");
            return ExitCode::FAILURE;
        }
    };

    match connection.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "connection terminated");
            ExitCode::FAILURE
        }
    }
}
