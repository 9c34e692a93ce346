use clap::Parser;
use log::{error, info};
use server::config::Config;
use server::context::ServerContext;
use server::network::Server;
use server::shutdown::ShutdownReason;
use server::token::TokenAuthority;
use server::watchdog::{spawn_memory_watchdog, ProcessMemoryProbe, POLL_INTERVAL};
use std::sync::Arc;

/// Parses command-line arguments, starts the clock and watchdog, then runs
/// the server until shutdown has exported every zone.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    config.validate()?;
    let work_dir = config.prepare_work_dir()?;

    let tokens = TokenAuthority::new(config.debug);
    if config.debug {
        info!("Debug mode: master token is M, privileged tokens are A");
    }
    info!("Master token: {}", tokens.master());
    info!("Work dir: {}", work_dir.display());
    info!(
        "Max challenges: {}, tick duration: {}ms, memory limit: {}MiB",
        config.max_challenges, config.tick_duration, config.memory_limit
    );

    let context = Arc::new(
        ServerContext::new(tokens, config.max_challenges)
            .with_max_canvas_bytes(config.memory_limit_bytes()),
    );
    let ticker = context.clock.spawn_ticker(config.tick_period());

    let mut server = Server::new(&config.address(), context, work_dir).await?;

    let watchdog = spawn_memory_watchdog(
        ProcessMemoryProbe,
        config.memory_limit_bytes(),
        POLL_INTERVAL,
        server.shutdown_handle(),
    );

    let interrupt = {
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.trigger(ShutdownReason::Interrupted);
            }
        })
    };

    let report = server.run().await?;
    for (zone_id, e) in &report.failed {
        error!("Zone {} was not exported: {}", zone_id, e);
    }

    interrupt.abort();
    watchdog.abort();
    ticker.abort();

    Ok(())
}
