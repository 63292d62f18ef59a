//! Block-by-block admission and execution of synthetic transactions.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use alloy_primitives::Address;
use parking_lot::Mutex;
use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use tempo_nonce_allocator::{
    CommittedNonceSource as _, InMemoryNonceLedger, NonceAllocator, NonceAllocatorConfig,
};
use eyre::Context as _;
use tracing::{debug, info, warn};

/// Workload settings.
#[derive(Debug)]
pub(crate) struct Bench {
    pub(crate) accounts: u16,
    pub(crate) workers: usize,
    pub(crate) txs_per_block: usize,
    pub(crate) blocks: u64,
    pub(crate) failure_rate: f64,
    pub(crate) seed: u64,
    pub(crate) config: NonceAllocatorConfig,
}

/// Outcome of a bench run.
#[derive(Debug, Default)]
pub(crate) struct Report {
    admitted: u64,
    finalized: u64,
    failed: u64,
    skipped: u64,
    admission_time: Duration,
    elapsed: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let per_sec = self.admitted as f64 / self.admission_time.as_secs_f64().max(f64::EPSILON);
        writeln!(f, "admitted:   {}", self.admitted)?;
        writeln!(f, "finalized:  {}", self.finalized)?;
        writeln!(f, "failed:     {}", self.failed)?;
        writeln!(f, "skipped:    {}", self.skipped)?;
        writeln!(f, "admissions: {per_sec:.0}/s")?;
        write!(f, "elapsed:    {:?}", self.elapsed)
    }
}

impl Bench {
    pub(crate) fn run(self) -> eyre::Result<Report> {
        let ledger = Arc::new(InMemoryNonceLedger::new());
        let allocator = NonceAllocator::with_config(ledger, self.config.clone())
            .wrap_err("invalid allocator config")?;
        let accounts: Vec<Address> = (1..=u64::from(self.accounts))
            .map(|i| Address::left_padding_from(&i.to_be_bytes()))
            .collect();

        info!(
            accounts = accounts.len(),
            workers = self.workers,
            txs_per_block = self.txs_per_block,
            blocks = self.blocks,
            completed_capacity = self.config.completed_capacity,
            "starting nonce bench"
        );

        let mut report = Report::default();
        let mut finalized = HashSet::new();
        let mut executor = StdRng::seed_from_u64(self.seed);
        let start = Instant::now();

        for block in 0..self.blocks {
            let admission_start = Instant::now();
            let mempool = self.admit(block, &allocator, &accounts)?;
            report.admission_time += admission_start.elapsed();
            report.admitted += mempool.values().map(Vec::len).sum::<usize>() as u64;

            let outcome = self.execute(&allocator, mempool, &mut executor);
            for pair in &outcome.finalized {
                eyre::ensure!(
                    finalized.insert(*pair),
                    "nonce {} of {} was finalized twice",
                    pair.1,
                    pair.0
                );
            }
            report.finalized += outcome.finalized.len() as u64;
            report.failed += outcome.failed;
            report.skipped += outcome.skipped;

            debug!(
                block,
                finalized = outcome.finalized.len(),
                failed = outcome.failed,
                skipped = outcome.skipped,
                "executed block"
            );
        }

        report.elapsed = start.elapsed();
        eyre::ensure!(
            allocator.tracked_addresses() == 0,
            "{} accounts still hold reservations after the last block",
            allocator.tracked_addresses()
        );
        info!(finalized = report.finalized, "nonce bench finished");
        Ok(report)
    }

    /// Admits transactions from all workers concurrently and groups the
    /// reserved nonces by account.
    fn admit(
        &self,
        block: u64,
        allocator: &NonceAllocator<Arc<InMemoryNonceLedger>>,
        accounts: &[Address],
    ) -> eyre::Result<BTreeMap<Address, Vec<u64>>> {
        let mempool = Mutex::new(BTreeMap::<Address, Vec<u64>>::new());

        thread::scope(|s| {
            for worker in 0..self.workers {
                let mempool = &mempool;
                let seed = self
                    .seed
                    .wrapping_add(block.wrapping_mul(self.workers as u64))
                    .wrapping_add(worker as u64);
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut admitted = Vec::with_capacity(self.txs_per_block);
                    for _ in 0..self.txs_per_block {
                        let account = accounts[rng.gen_range(0..accounts.len())];
                        match allocator.suggest_and_reserve(account) {
                            Some(nonce) => admitted.push((account, nonce)),
                            None => warn!(%account, "account ran out of nonces"),
                        }
                    }

                    let mut mempool = mempool.lock();
                    for (account, nonce) in admitted {
                        mempool.entry(account).or_default().push(nonce);
                    }
                });
            }
        });

        let mut mempool = mempool.into_inner();
        for (account, nonces) in &mut mempool {
            nonces.sort_unstable();
            let before = nonces.len();
            nonces.dedup();
            eyre::ensure!(
                before == nonces.len(),
                "{account} was handed the same nonce twice in block {block}"
            );
        }
        Ok(mempool)
    }

    /// Executes every account's transactions in nonce order.
    ///
    /// A failed transaction leaves a gap, the account's later transactions
    /// in the same block are dropped and their nonces released.
    fn execute(
        &self,
        allocator: &NonceAllocator<Arc<InMemoryNonceLedger>>,
        mempool: BTreeMap<Address, Vec<u64>>,
        rng: &mut StdRng,
    ) -> BlockOutcome {
        let ledger = allocator.source();
        let mut outcome = BlockOutcome::default();

        for (account, nonces) in mempool {
            let mut expected = Some(ledger.committed_nonce(&account));
            if nonces.first().copied() != expected {
                warn!(%account, ?expected, first = ?nonces.first(), "admitted nonces don't start at the committed nonce");
            }

            for nonce in nonces {
                if expected != Some(nonce) {
                    allocator.retire(account, nonce, false);
                    outcome.skipped += 1;
                    continue;
                }

                if rng.gen_bool(self.failure_rate) {
                    allocator.retire(account, nonce, false);
                    outcome.failed += 1;
                    expected = None;
                    continue;
                }

                allocator.retire(account, nonce, true);
                ledger.advance_to(account, nonce + 1);
                outcome.finalized.push((account, nonce));
                expected = Some(nonce + 1);
            }
        }

        outcome
    }
}

#[derive(Debug, Default)]
struct BlockOutcome {
    finalized: Vec<(Address, u64)>,
    failed: u64,
    skipped: u64,
}
