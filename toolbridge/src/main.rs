//! `toolbridge` binary: serve a tools directory over HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use bridge_config::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SERVER_NAME, DEFAULT_TOKEN_ENV, ServerConfig,
};
use bridge_telemetry::{TelemetryConfig, init_tracing, parse_level};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "toolbridge", version, about = "Serve a directory of tools over HTTP and SSE")]
struct Args {
    /// Directory containing tool modules
    #[arg(long, env = "TOOLBRIDGE_TOOLS_DIR")]
    tools_dir: PathBuf,

    /// Host to bind the server to
    #[arg(long, env = "TOOLBRIDGE_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind the server to
    #[arg(long, env = "TOOLBRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Environment variable holding the bearer token
    #[arg(long, env = "TOOLBRIDGE_APP_TOKEN_ENV", default_value = DEFAULT_TOKEN_ENV)]
    app_token_env: String,

    /// Name advertised through discovery
    #[arg(long, env = "TOOLBRIDGE_SERVER_NAME", default_value = DEFAULT_SERVER_NAME)]
    server_name: String,

    /// Comma-separated list of allowed CORS origins
    #[arg(long, env = "TOOLBRIDGE_CORS_ORIGINS", default_value = "*")]
    cors_origins: String,

    /// Per-invocation timeout in seconds; 0 disables it
    #[arg(long, env = "TOOLBRIDGE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Maximum number of invocations running at once
    #[arg(long, env = "TOOLBRIDGE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Serve the tool listing without a bearer token
    #[arg(long, env = "TOOLBRIDGE_PUBLIC_DISCOVERY")]
    public_discovery: bool,

    /// Ignore undeclared arguments instead of rejecting them
    #[arg(long, env = "TOOLBRIDGE_LENIENT_ARGUMENTS")]
    lenient_arguments: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "TOOLBRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> anyhow::Result<ServerConfig> {
        let mut builder = ServerConfig::builder(&self.tools_dir)
            .host(&self.host)
            .port(self.port)
            .auth_token_env(&self.app_token_env)
            .server_name(&self.server_name)
            .cors_origins(&self.cors_origins)?
            .discovery_requires_auth(!self.public_discovery)
            .strict_arguments(!self.lenient_arguments);
        if let Some(secs) = self.timeout_secs {
            builder = builder.invocation_timeout(Some(Duration::from_secs(secs)));
        }
        if let Some(limit) = self.max_concurrency {
            builder = builder.max_concurrency(limit);
        }
        builder.build().context("invalid configuration")
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let level = parse_level(&args.log_level)?;
    init_tracing(&TelemetryConfig::default().with_default_level(level));

    let config = args.config()?;
    info!(
        address = %config.display_address(),
        tools_dir = %config.tools_directory().display(),
        origins = %config.allowed_origins(),
        "starting toolbridge"
    );
    bridge_server::run(config).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "toolbridge exited with an error");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
