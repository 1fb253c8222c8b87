use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `pushpool-loadgen` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for a quick local run.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pushpool-loadgen",
    version,
    about = "Drive a pooled connection with a simulated connection"
)]
pub struct CliArgs {
    /// Maximum number of concurrently active workers in the pool.
    ///
    /// Each worker lazily creates its own copy of the simulated connection,
    /// so this is also the upper bound on connections created.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = num_cpus::get())]
    pub num_workers: usize,

    /// Total number of messages to send.
    ///
    /// Environment variable: `MESSAGES`
    #[arg(long, env = "MESSAGES", default_value_t = 100_000)]
    pub messages: u64,

    /// Simulated time spent inside each send, in microseconds.
    ///
    /// Environment variable: `SEND_LATENCY_US`
    #[arg(long, env = "SEND_LATENCY_US", default_value_t = 200)]
    pub send_latency_us: u64,

    /// Probability in `[0, 1]` that a simulated send fails.
    ///
    /// Failures are logged by the pool and counted by the simulation.
    ///
    /// Environment variable: `FAILURE_RATE`
    #[arg(long, env = "FAILURE_RATE", default_value_t = 0.0)]
    pub failure_rate: f64,

    /// Upper bound on how long closing the pool waits for queued messages.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 10)]
    pub drain_timeout_secs: u64,

    /// Cache length applied to every connection once all messages are queued.
    ///
    /// Environment variable: `CACHE_LENGTH`
    #[arg(long, env = "CACHE_LENGTH")]
    pub cache_length: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub num_workers: usize,
    pub messages: u64,
    pub send_latency: Duration,
    pub failure_rate: f64,
    pub drain_timeout: Duration,
    pub cache_length: Option<usize>,
}

impl TryFrom<CliArgs> for LoadConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if !(0.0..=1.0).contains(&args.failure_rate) {
            bail!(
                "FAILURE_RATE ({}) must be between 0 and 1",
                args.failure_rate
            );
        }

        Ok(Self {
            num_workers: args.num_workers,
            messages: args.messages,
            send_latency: Duration::from_micros(args.send_latency_us),
            failure_rate: args.failure_rate,
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
            cache_length: args.cache_length,
        })
    }
}
