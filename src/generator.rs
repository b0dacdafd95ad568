//! Constrained-random stimulus.
//!
//! The random phase draws `(write_enable, read_enable, data)` and redraws
//! until `(write_enable, data)` is a pair it has not issued yet. It stops when
//! the coverage engine announces closure of that cross.

use futures::channel::oneshot;
use futures::future::{self, Either, FutureExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

use crate::adapter::FifoBfm;
use crate::sim::SimHandle;
use crate::transaction::Transaction;
use crate::trigger::ClockDomain;
use crate::utils::read_burst;
use crate::TbResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomPhaseOutcome {
    pub transactions: u64,
    /// Closure was announced before the phase ended.
    pub closed: bool,
}

pub struct StimulusGenerator {
    bfm: FifoBfm,
    sim: SimHandle,
    rng: StdRng,
    width: u32,
    covered: HashSet<(bool, u64)>,
    closure: oneshot::Receiver<()>,
    closed: bool,
    issued: u64,
    max_random: Option<u64>,
    settle_cycles: u32,
}

impl StimulusGenerator {
    pub fn new(
        bfm: &FifoBfm,
        sim: &SimHandle,
        width: u32,
        seed: u64,
        closure: oneshot::Receiver<()>,
    ) -> Self {
        log::info!("stimulus seed {}", seed);
        Self {
            bfm: bfm.clone(),
            sim: sim.clone(),
            rng: StdRng::seed_from_u64(seed),
            width,
            covered: HashSet::new(),
            closure,
            closed: false,
            issued: 0,
            max_random: None,
            settle_cycles: 6,
        }
    }

    /// Upper bound on random transactions. Reaching it ends the phase
    /// without closure.
    pub fn with_max_transactions(mut self, max: Option<u64>) -> Self {
        self.max_random = max;
        self
    }

    /// Write edges to wait for the closure notice once every pair was issued.
    pub fn with_settle_cycles(mut self, cycles: u32) -> Self {
        self.settle_cycles = cycles;
        self
    }

    /// Pairs issued during the random phase.
    pub fn intended(&self) -> &HashSet<(bool, u64)> {
        &self.covered
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    fn cross_size(&self) -> usize {
        2usize << self.width
    }

    fn poll_closure(&mut self) -> bool {
        if !self.closed {
            // a cancelled sender means the engine was finalized without closure
            self.closed = matches!(self.closure.try_recv(), Ok(Some(())));
        }
        self.closed
    }

    fn draw(&mut self) -> Transaction {
        let limit = 1u64 << self.width;
        loop {
            let write_enable: bool = self.rng.gen();
            let read_enable: bool = self.rng.gen();
            let data = self.rng.gen_range(0..limit);
            if self.covered.insert((write_enable, data)) {
                return Transaction::new(write_enable, read_enable, data, self.issued);
            }
        }
    }

    pub async fn run_random(&mut self) -> TbResult<RandomPhaseOutcome> {
        let start = self.issued;
        log::info!("random phase started");
        loop {
            if self.poll_closure() {
                break;
            }
            if let Some(max) = self.max_random {
                if self.issued - start >= max {
                    log::warn!("random phase hit its limit of {} transactions", max);
                    break;
                }
            }
            if self.covered.len() == self.cross_size() {
                self.await_closure().await;
                break;
            }
            let tx = self.draw();
            self.bfm.send(tx).await?;
            self.issued += 1;
        }
        let outcome = RandomPhaseOutcome {
            transactions: self.issued - start,
            closed: self.closed,
        };
        log::info!(
            "random phase done after {} transactions, closed: {}",
            outcome.transactions,
            outcome.closed
        );
        Ok(outcome)
    }

    // Every pair is in flight or observed; give the monitors time to catch up.
    async fn await_closure(&mut self) {
        log::debug!("all {} pairs issued, waiting for closure", self.cross_size());
        let settle = self
            .sim
            .clock_cycles(ClockDomain::Write, self.settle_cycles)
            .boxed_local();
        let notified = match future::select(&mut self.closure, settle).await {
            Either::Left((result, _)) => result.is_ok(),
            Either::Right(_) => false,
        };
        if notified {
            self.closed = true;
        } else {
            self.poll_closure();
        }
    }

    /// Directed phase: `count` read-only transactions to drain the device
    /// and push it into underflow.
    pub async fn run_underflow(&mut self, count: u64) -> TbResult<u64> {
        log::info!("underflow phase: {} reads", count);
        self.issued = read_burst(&self.bfm, count, self.issued).await?;
        Ok(count)
    }
}
