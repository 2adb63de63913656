//! Deployhook receiver entrypoint.
//!
//! Loads the area table and trusted public key, binds the HTTP listener,
//! and serves deploy requests until the process is stopped.

use clap::Parser;
use deployhook_receiver::area::AreaTable;
use deployhook_receiver::artefact::download::GithubFetcher;
use deployhook_receiver::cli::Cli;
use deployhook_receiver::config::{ConfigError, load_public_key};
use deployhook_receiver::pipeline::DeployContext;
use deployhook_receiver::server::{ReceiverState, serve};
use log::info;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Fatal startup errors.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

fn main() {
    let cli = Cli::parse();
    init_logging();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Install the log subscriber; `RUST_LOG` overrides the `info` default.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        // A subscriber is already installed.
    }
}

fn run(cli: &Cli) -> Result<(), StartupError> {
    // Step 1: Load trusted configuration.
    let areas = AreaTable::load(&cli.areas)?;
    let public_key = load_public_key(&cli.public_key)?;

    let mut context = DeployContext::new(areas, public_key);
    if let Some(dir) = &cli.scratch_dir {
        context = context.with_scratch_root(dir.as_std_path());
    }
    let fetcher = GithubFetcher::new(cli.api_url.clone(), cli.timeout());
    let state = Arc::new(ReceiverState::new(context, Box::new(fetcher)));

    // Step 2: Bind and serve.
    let server = tiny_http::Server::http(cli.listen).map_err(|e| StartupError::Bind {
        addr: cli.listen.to_string(),
        reason: e.to_string(),
    })?;
    info!("listening on {}", cli.listen);
    serve(&server, state);
    Ok(())
}

fn exit_code_for_run_result(result: Result<(), StartupError>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, err);
            1
        }
    }
}

fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort reporting; ignore write failures.
    }
}
