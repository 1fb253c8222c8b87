#![doc = include_str!("../README.md")]

mod config;
mod sim;
mod telemetry;

use clap::Parser;
use config::{CliArgs, LoadConfig};
use pushpool::{Error, PoolConfig, PooledConnection};
use sim::{SimStats, SimulatedConnection};
use std::{
    sync::{Arc, atomic::Ordering},
    time::Instant,
};
use telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = LoadConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    run(&config)
}

fn run(config: &LoadConfig) -> anyhow::Result<()> {
    let stats = Arc::new(SimStats::default());
    let prototype =
        SimulatedConnection::new(config.send_latency, config.failure_rate, Arc::clone(&stats));

    let pool_config = PoolConfig::new(config.num_workers)?
        .with_drain_timeout(config.drain_timeout)
        .with_span(tracing::info_span!("loadgen", workers = config.num_workers));
    let pool = PooledConnection::with_config(prototype, pool_config);

    pool.test_connection()?;

    let start = Instant::now();
    for message in 0..config.messages {
        pool.send_message(message);
    }
    let queued = start.elapsed();
    tracing::info!("Queued {} messages in {:?}", config.messages, queued);

    if let Some(cache_length) = config.cache_length {
        pool.set_cache_length(cache_length);
    }
    match pool.cache_length() {
        Ok(cache_length) => tracing::info!("Cache length of a worker connection: {cache_length}"),
        Err(Error::NoActiveConnection) => tracing::info!("No worker connection created yet"),
        Err(e) => tracing::warn!("Failed to read cache length: {e}"),
    }

    pool.close()?;
    let elapsed = start.elapsed();
    let active = pool.active_connections();

    let delivered = stats.delivered.load(Ordering::Relaxed);
    let failed = stats.failed.load(Ordering::Relaxed);
    let abandoned = config.messages.saturating_sub(delivered + failed);
    tracing::info!(
        "Sent {} messages over {} connections in {:?} ({:.0} msg/s): {} delivered, {} failed, {} abandoned, {} connections closed",
        delivered + failed,
        active,
        elapsed,
        (delivered + failed) as f64 / elapsed.as_secs_f64(),
        delivered,
        failed,
        abandoned,
        stats.closed.load(Ordering::Relaxed),
    );

    Ok(())
}

fn log_startup_info(config: &LoadConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting load generator with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting load generator with {} workers and {} messages",
            config.num_workers,
            config.messages
        );
    }
}
