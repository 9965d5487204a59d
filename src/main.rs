use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rpc_guard::{
    Config, GuardContext, ServerState, build_https_client, serve, server, shutdown_signal,
    spawn_limiter_sweep, spawn_policy_refresher,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Policy-enforcing gateway for an Ethereum JSON-RPC node.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML or JSON configuration file.
    #[arg(short, long, env = "RPC_GUARD_CONFIG", default_value = "./Config.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> rpc_guard::Result<()> {
    let config = Config::load_from_file(&args.config)?.into_runtime()?;

    let ctx = Arc::new(GuardContext::new(&config)?);
    let client = build_https_client(&config);

    let _refresher = spawn_policy_refresher(
        Arc::clone(&ctx.policy),
        args.config.clone(),
        config.refresh_interval,
    );
    let _sweeper = spawn_limiter_sweep(
        Arc::clone(&ctx.limiters),
        config.limiter_sweep_interval,
        config.limiter_idle_ttl,
    );

    let listener = server::bind(&config).await?;
    info!(
        listen = %config.listen,
        upstream = %config.policy.upstream,
        config = %args.config.display(),
        metrics = %config.metrics_path,
        "rpc-guard listening"
    );

    let state = ServerState::new(ctx, &config);
    serve(listener, client, state, shutdown_signal()).await;
    Ok(())
}
