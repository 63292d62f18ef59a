//! Drives a [`NonceAllocator`](tempo_nonce_allocator::NonceAllocator) with
//! concurrent synthetic admissions and checks that no nonce is finalized twice.

use std::path::PathBuf;

use clap::Parser;
use eyre::Context;
use tempo_nonce_allocator::NonceAllocatorConfig;
use tracing_subscriber::EnvFilter;

mod bench;

#[derive(Debug, clap::Parser)]
#[command(author)]
#[command(version)]
#[command(about)]
#[command(long_about = None)]
struct Args {
    /// Number of distinct sending accounts.
    #[arg(long, default_value_t = 16)]
    accounts: u16,

    /// Number of threads admitting transactions concurrently.
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Transactions admitted by every worker per block.
    #[arg(long, default_value_t = 64)]
    txs_per_block: usize,

    /// Number of blocks to produce.
    #[arg(long, default_value_t = 100)]
    blocks: u64,

    /// Probability that an admitted transaction fails to execute.
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Seed for the workload generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Allocator configuration in toml format.
    #[arg(long, value_name = "FILE", env = "NONCE_ALLOCATOR_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn run(self) -> eyre::Result<()> {
        eyre::ensure!(self.accounts > 0, "at least one account is required");
        eyre::ensure!(self.workers > 0, "at least one worker is required");
        eyre::ensure!(
            (0.0..=1.0).contains(&self.failure_rate),
            "failure rate must be within [0, 1], got {}",
            self.failure_rate
        );

        let config = match &self.config {
            Some(path) => NonceAllocatorConfig::from_file(path).wrap_err_with(|| {
                format!("failed reading allocator config from `{}`", path.display())
            })?,
            None => NonceAllocatorConfig::default(),
        };

        let report = bench::Bench {
            accounts: self.accounts,
            workers: self.workers,
            txs_per_block: self.txs_per_block,
            blocks: self.blocks,
            failure_rate: self.failure_rate,
            seed: self.seed,
            config,
        }
        .run()?;

        println!("{report}");
        Ok(())
    }
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    Args::parse().run().wrap_err("nonce bench failed")
}
