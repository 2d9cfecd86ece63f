//! `guard`: operator CLI for the payload cipher and token cache.
//!
//! Startup sequence:
//! 1. Parse arguments.
//! 2. Initialise structured JSON logging (stderr).
//! 3. Load and validate the configuration section the command needs.
//! 4. Build the [`ProtectionContext`] and run the command.

use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::protocol::ErrorResponse;
use common::ProtectionError;
use tracing::info;

use guard::config::{CipherConfig, TokenConfig};
use guard::{telemetry, ProtectionContext};

#[derive(Debug, Parser)]
#[command(name = "guard", version, about = "Encrypt payloads and fetch bearer tokens")]
struct Cli {
    /// Tracing log level.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encrypt TEXT (or stdin) with the configured payload key.
    Encrypt { text: Option<String> },
    /// Decrypt BLOB (or stdin) with the configured payload key.
    Decrypt { blob: Option<String> },
    /// Print a currently valid bearer token from the authorization server.
    Token,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // -----------------------------------------------------------------------
    // 1. Arguments
    // -----------------------------------------------------------------------
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cli.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "guard starting");

    // -----------------------------------------------------------------------
    // 3-4. Configuration, context, command
    // -----------------------------------------------------------------------
    let outcome = match cli.command {
        Command::Encrypt { text } => {
            let ctx = cipher_context()?;
            let input = arg_or_stdin(text)?;
            ctx.encrypt(&input)
        }
        Command::Decrypt { blob } => {
            let ctx = cipher_context()?;
            let input = arg_or_stdin(blob)?;
            ctx.decrypt(input.trim())
        }
        Command::Token => {
            let cfg = TokenConfig::from_env().map_err(|e| {
                eprintln!("ERROR: token configuration invalid: {e:#}");
                e
            })?;
            let ctx = ProtectionContext::default().with_token_config(&cfg)?;
            ctx.bearer_token().await
        }
    };

    Ok(report(outcome))
}

fn cipher_context() -> Result<ProtectionContext> {
    let cfg = CipherConfig::from_env().map_err(|e| {
        eprintln!("ERROR: cipher configuration invalid: {e:#}");
        e
    })?;
    ProtectionContext::default().with_cipher_config(&cfg)
}

fn arg_or_stdin(arg: Option<String>) -> Result<String> {
    match arg {
        Some(value) => Ok(value),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf.strip_suffix('\n').unwrap_or(&buf).to_owned())
        }
    }
}

/// Print the command result, or a JSON [`ErrorResponse`] on failure.
fn report(outcome: Result<String, ProtectionError>) -> ExitCode {
    match outcome {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let body = ErrorResponse::from(&e);
            match serde_json::to_string(&body) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("ERROR: {e}"),
            }
            if e.is_retryable() {
                ExitCode::from(75)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
