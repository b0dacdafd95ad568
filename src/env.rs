//! Run orchestration.
//!
//! [`FifoEnv`] builds one instance of every component, wires the adapter's
//! observation topics to their subscribers and drives the two stimulus
//! phases. The run ends when the objection raised for the stimulus is
//! dropped; background loops are abandoned at that point.

use futures::channel::{mpsc::UnboundedReceiver, oneshot};
use futures::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::adapter::{BfmStats, FifoBfm};
use crate::coverage::{
    fifo_coverage, run_coverage, Bin, CoverageEngine, CoverageSnapshot, CROSS, UNDERFLOW,
};
use crate::dut::{FifoDut, Mutation};
use crate::generator::{RandomPhaseOutcome, StimulusGenerator};
use crate::scoreboard::{run_scoreboard, Mismatch, Scoreboard};
use crate::sim::{Sim, SimHandle};
use crate::sim_if::{DualClock, SimIf};
use crate::tb_obj::TbObj;
use crate::transaction::{merge_observations, Observation, ReadObservation, WriteObservation};
use crate::trigger::ClockDomain;
use crate::utils::random_seed;
use crate::{TbError, TbResult};

/// Width and depth pairs of the default parameter sweep (width == depth).
pub const SWEEP: [u32; 4] = [4, 8, 12, 16];

const MAX_PARAM: u32 = 20;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub width: u32,
    pub depth: u32,
    pub seed: u64,
    /// Closure threshold of the `write_enable x data` cross, in percent.
    pub threshold: f64,
    /// Length of the directed underflow phase, `2^depth + 100` if unset.
    pub underflow_reads: Option<u64>,
    pub reset_cycles: u32,
    /// Period of both clocks.
    pub clock_period_ps: u64,
    pub drain_cycles: u32,
    pub time_limit_ps: Option<u64>,
    pub max_random_transactions: Option<u64>,
    pub mutation: Mutation,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            width: 4,
            depth: 4,
            seed: random_seed(),
            threshold: 100.0,
            underflow_reads: None,
            reset_cycles: 5,
            clock_period_ps: 10_000,
            drain_cycles: 4,
            time_limit_ps: None,
            max_random_transactions: None,
            mutation: Mutation::None,
        }
    }
}

impl RunConfig {
    pub fn new(width: u32, depth: u32) -> Self {
        Self {
            width,
            depth,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn capacity(&self) -> u64 {
        1 << self.depth
    }

    pub fn underflow_reads(&self) -> u64 {
        self.underflow_reads.unwrap_or(self.capacity() + 100)
    }

    pub fn name(&self) -> String {
        format!("fifo_w{}_d{}", self.width, self.depth)
    }

    pub fn validate(&self) -> TbResult<()> {
        if !(1..=MAX_PARAM).contains(&self.width) {
            return Err(TbError::Config(format!(
                "width {} is outside [1, {}]",
                self.width, MAX_PARAM
            )));
        }
        if !(1..=MAX_PARAM).contains(&self.depth) {
            return Err(TbError::Config(format!(
                "depth {} is outside [1, {}]",
                self.depth, MAX_PARAM
            )));
        }
        if !(self.threshold > 0.0 && self.threshold <= 100.0) {
            return Err(TbError::Config(format!(
                "threshold {} is outside (0, 100]",
                self.threshold
            )));
        }
        if self.reset_cycles < 5 {
            return Err(TbError::Config(format!(
                "reset must be held for at least 5 cycles, got {}",
                self.reset_cycles
            )));
        }
        // a full FIFO needs 2^depth reads to drain plus one to underflow
        if self.underflow_reads() <= self.capacity() {
            return Err(TbError::Config(format!(
                "{} underflow reads can not underflow a FIFO of {} words",
                self.underflow_reads(),
                self.capacity()
            )));
        }
        if let Mutation::StuckDataBit(bit) = self.mutation {
            if bit >= self.width {
                return Err(TbError::Config(format!(
                    "stuck bit {} is outside the {}-bit data bus",
                    bit, self.width
                )));
            }
        }
        Ok(())
    }
}

/// Keeps a run alive while any guard is held.
#[derive(Clone, Default)]
pub struct Objection {
    raised: TbObj<usize>,
    waiters: TbObj<Vec<oneshot::Sender<()>>>,
}

pub struct ObjectionGuard {
    objection: Objection,
    name: &'static str,
}

impl Objection {
    pub fn raise(&self, name: &'static str) -> ObjectionGuard {
        *self.raised.get_mut() += 1;
        log::debug!("objection raised by {}", name);
        ObjectionGuard {
            objection: self.clone(),
            name,
        }
    }

    pub fn count(&self) -> usize {
        *self.raised.get()
    }

    /// Completes once no guard is left.
    pub fn all_dropped(&self) -> impl Future<Output = ()> {
        let rx = if self.count() == 0 {
            None
        } else {
            let (tx, rx) = oneshot::channel();
            self.waiters.get_mut().push(tx);
            Some(rx)
        };
        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
    }
}

impl Drop for ObjectionGuard {
    fn drop(&mut self) {
        let left = {
            let mut raised = self.objection.raised.get_mut();
            *raised -= 1;
            *raised
        };
        log::debug!("objection dropped by {}", self.name);
        if left == 0 {
            for tx in self.objection.waiters.get_mut().drain(..) {
                let _ = tx.send(());
            }
        }
    }
}

/// Bin the generator issued that no observation confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageGap {
    pub dimension: String,
    pub bin: Bin,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub width: u32,
    pub depth: u32,
    pub seed: u64,
    pub mutation: String,
    pub closed: bool,
    pub random_transactions: u64,
    pub underflow_transactions: u64,
    pub transactions_sent: u64,
    pub idle_cycles: u64,
    pub compared: u64,
    pub unpaired: usize,
    pub mismatches: Vec<Mismatch>,
    pub gaps: Vec<CoverageGap>,
    pub coverage: CoverageSnapshot,
    pub sim_time_ps: u64,
    pub wall_secs: f64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.compared > 0
            && self.unpaired == 0
            && self.mismatches.is_empty()
            && self.closed
            && self.gaps.is_empty()
    }

    pub fn verdict(&self) -> &'static str {
        match self.passed() {
            true => "PASS",
            false => "FAIL",
        }
    }

    /// Turn a failing report into the error describing its first failure
    /// class.
    pub fn into_result(self) -> TbResult<RunReport> {
        if let Some(first) = self.mismatches.first() {
            return Err(TbError::Mismatch {
                count: self.mismatches.len(),
                first: first.to_string(),
            });
        }
        if self.unpaired > 0 {
            return Err(TbError::Mismatch {
                count: self.unpaired,
                first: "observation without counterpart at end of run".to_string(),
            });
        }
        if let Some(first) = self.gaps.first() {
            return Err(TbError::CoverageGap {
                count: self.gaps.len(),
                first: format!("{} {}", first.dimension, first.bin),
            });
        }
        if !self.passed() {
            return Err(TbError::CoverageGap {
                count: 0,
                first: "nothing was compared".to_string(),
            });
        }
        Ok(self)
    }
}

struct StimulusOutcome {
    random: RandomPhaseOutcome,
    underflow: u64,
    intended: Vec<(bool, u64)>,
}

pub struct FifoEnv {
    config: RunConfig,
    sim: SimHandle,
    bfm: FifoBfm,
    scoreboard: TbObj<Scoreboard>,
    coverage: TbObj<CoverageEngine>,
    generator: StimulusGenerator,
}

impl FifoEnv {
    /// Build and wire all components. Subscriber tasks are spawned right
    /// away; the adapter loops only start in [`FifoEnv::run`].
    pub fn build(config: &RunConfig, sim: &SimHandle) -> TbResult<Self> {
        config.validate()?;
        let bfm = FifoBfm::new(sim, config.reset_cycles);
        let scoreboard = TbObj::new(Scoreboard::new(config.depth));

        let mut coverage = fifo_coverage(config.width, config.threshold)?;
        let (closure_tx, closure_rx) = oneshot::channel();
        coverage.on_threshold(move || {
            let _ = closure_tx.send(());
        });
        let coverage = TbObj::new(coverage);

        sim.spawn(
            "scoreboard",
            run_scoreboard(
                scoreboard.clone(),
                bfm.subscribe_writes(),
                bfm.subscribe_reads(),
            ),
        );
        let collector = run_coverage(
            coverage.clone(),
            bfm.subscribe_writes(),
            bfm.subscribe_reads(),
        );
        sim.spawn("coverage", async move {
            if let Err(e) = collector.await {
                log::error!("coverage collector stopped: {}", e);
            }
        });
        sim.spawn(
            "monitor",
            log_observations(bfm.subscribe_writes(), bfm.subscribe_reads()),
        );

        let generator = StimulusGenerator::new(&bfm, sim, config.width, config.seed, closure_rx)
            .with_max_transactions(config.max_random_transactions)
            .with_settle_cycles(config.drain_cycles + 2);

        Ok(Self {
            config: config.clone(),
            sim: sim.clone(),
            bfm,
            scoreboard,
            coverage,
            generator,
        })
    }

    pub fn scoreboard(&self) -> TbObj<Scoreboard> {
        self.scoreboard.clone()
    }

    pub fn coverage(&self) -> TbObj<CoverageEngine> {
        self.coverage.clone()
    }

    pub fn bfm(&self) -> &FifoBfm {
        &self.bfm
    }

    pub async fn run(self) -> TbResult<RunReport> {
        let started = Instant::now();
        let FifoEnv {
            config,
            sim,
            bfm,
            scoreboard,
            coverage,
            mut generator,
        } = self;
        log::info!(
            "{}: width={} depth={} seed={} mutation={}",
            config.name(),
            config.width,
            config.depth,
            config.seed,
            config.mutation
        );

        let objection = Objection::default();
        let guard = objection.raise("stimulus");
        bfm.reset().await?;
        bfm.start()?;

        let stimulus = {
            let handle = sim.clone();
            let bfm = bfm.clone();
            let scoreboard = scoreboard.clone();
            let underflow_reads = config.underflow_reads();
            let drain_cycles = config.drain_cycles;
            sim.spawn("stimulus", async move {
                let random = generator.run_random().await?;
                let underflow = generator.run_underflow(underflow_reads).await?;
                drain(&handle, &bfm, &scoreboard, drain_cycles).await;
                drop(guard);
                Ok::<_, TbError>(StimulusOutcome {
                    random,
                    underflow,
                    intended: generator.intended().iter().copied().collect(),
                })
            })
        };

        objection.all_dropped().await;
        let outcome = stimulus.await??;

        let snapshot = coverage.get_mut().finalize();
        let closed = outcome.random.closed;
        let gaps = coverage_gaps(
            &coverage.get(),
            &snapshot,
            &outcome.intended,
            closed,
            outcome.underflow > 0,
        );
        for gap in gaps.iter().take(10) {
            log::error!("coverage gap: {} {}", gap.dimension, gap.bin);
        }

        let sb = scoreboard.get();
        if sb.pending() > 0 {
            log::error!("{} observation(s) left unpaired", sb.pending());
        }
        let stats: BfmStats = bfm.stats();
        let report = RunReport {
            name: config.name(),
            width: config.width,
            depth: config.depth,
            seed: config.seed,
            mutation: config.mutation.to_string(),
            closed,
            random_transactions: outcome.random.transactions,
            underflow_transactions: outcome.underflow,
            transactions_sent: stats.sent,
            idle_cycles: stats.idle,
            compared: sb.compared(),
            unpaired: sb.pending(),
            mismatches: sb.mismatches().to_vec(),
            gaps,
            coverage: snapshot,
            sim_time_ps: sim.time_ps(),
            wall_secs: started.elapsed().as_secs_f64(),
        };
        log::info!("{}: {} ({})", report.name, report.verdict(), sb.result_str());
        Ok(report)
    }
}

/// Wait until the driver is idle, the pipeline has flushed and every
/// observation found its counterpart.
async fn drain(sim: &SimHandle, bfm: &FifoBfm, scoreboard: &TbObj<Scoreboard>, cycles: u32) {
    while bfm.has_pending() {
        sim.rising_edge(ClockDomain::Write).await;
    }
    sim.clock_cycles(ClockDomain::Write, cycles).await;
    let mut extra = 0;
    while scoreboard.get().pending() > 0 && extra < cycles {
        sim.rising_edge(ClockDomain::Write).await;
        extra += 1;
    }
    log::debug!("drained at write cycle {}", sim.cycle(ClockDomain::Write));
}

fn coverage_gaps(
    coverage: &CoverageEngine,
    snapshot: &CoverageSnapshot,
    intended: &[(bool, u64)],
    closed: bool,
    underflow_phase: bool,
) -> Vec<CoverageGap> {
    let gap = |bin| CoverageGap {
        dimension: CROSS.to_string(),
        bin,
    };
    let mut gaps: Vec<CoverageGap> = if closed {
        intended
            .iter()
            .map(|(wr, data)| Bin::Pair(*wr as u64, *data))
            .filter(|bin| !coverage.is_covered(CROSS, *bin))
            .map(gap)
            .collect()
    } else {
        snapshot
            .get(CROSS)
            .map(|d| d.missing.iter().copied().map(gap).collect())
            .unwrap_or_default()
    };
    gaps.sort_by_key(|g| match g.bin {
        Bin::Pair(a, b) => (a, b),
        Bin::Value(v) => (0, v),
    });
    // the directed phase exists to push the device into underflow
    if underflow_phase && !coverage.is_covered(UNDERFLOW, Bin::Value(1)) {
        gaps.push(CoverageGap {
            dimension: UNDERFLOW.to_string(),
            bin: Bin::Value(1),
        });
    }
    gaps
}

async fn log_observations(
    writes: UnboundedReceiver<WriteObservation>,
    reads: UnboundedReceiver<ReadObservation>,
) {
    let mut observations = merge_observations(writes, reads);
    while let Some(obs) = observations.next().await {
        match obs {
            Observation::Write(w) => log::trace!("write side {}", w),
            Observation::Read(r) => log::trace!("read side {}", r),
        }
    }
}

/// Run the harness against any device model.
pub fn run_with_dut(config: &RunConfig, dut: impl SimIf + 'static) -> TbResult<RunReport> {
    config.validate()?;
    let clock = DualClock::aligned(config.clock_period_ps)?;
    let mut sim = Sim::new(dut, clock).with_time_limit(config.time_limit_ps);
    let handle = sim.handle();
    let config = config.clone();
    sim.run(async move {
        let env = FifoEnv::build(&config, &handle)?;
        env.run().await
    })
}

/// Run the harness against the behavioral FIFO.
pub fn run(config: &RunConfig) -> TbResult<RunReport> {
    let dut = FifoDut::new(config.width, config.depth).with_mutation(config.mutation);
    run_with_dut(config, dut)
}

/// One run per width, with depth equal to width.
pub fn sweep(base: &RunConfig, widths: &[u32]) -> Vec<(RunConfig, TbResult<RunReport>)> {
    widths
        .iter()
        .map(|&w| {
            let config = RunConfig {
                width: w,
                depth: w,
                ..base.clone()
            };
            let result = run(&config);
            (config, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(RunConfig::new(4, 4).validate().is_ok());
        assert!(RunConfig::new(0, 4).validate().is_err());
        assert!(RunConfig::new(4, 21).validate().is_err());
        let mut c = RunConfig::new(4, 4);
        c.threshold = 0.0;
        assert!(c.validate().is_err());
        c.threshold = 50.0;
        c.underflow_reads = Some(15);
        assert!(c.validate().is_err());
        // exactly 2^depth reads only drain a full FIFO
        c.underflow_reads = Some(16);
        assert!(c.validate().is_err());
        c.underflow_reads = Some(17);
        assert!(c.validate().is_ok());
        c.mutation = Mutation::StuckDataBit(4);
        assert!(c.validate().is_err());
        assert_eq!(RunConfig::new(4, 4).underflow_reads(), 116);
    }

    #[test]
    fn objection_releases_waiters_on_last_drop() {
        let objection = Objection::default();
        let a = objection.raise("a");
        let b = objection.raise("b");
        let mut done = Box::pin(objection.all_dropped());
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        assert!(done.as_mut().poll(&mut cx).is_pending());
        drop(a);
        assert!(done.as_mut().poll(&mut cx).is_pending());
        drop(b);
        assert!(done.as_mut().poll(&mut cx).is_ready());
        assert_eq!(objection.count(), 0);
    }

    #[test]
    fn clean_run_passes() {
        let report = run(&RunConfig::new(3, 2).with_seed(11)).unwrap();
        assert!(report.passed(), "{:?}", report.mismatches);
        assert!(report.closed);
        assert_eq!(report.underflow_transactions, 104);
        assert_eq!(report.coverage.get(CROSS).unwrap().coverage, 100.0);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn shortest_underflow_phase_still_underflows() {
        let mut config = RunConfig::new(3, 2).with_seed(11);
        config.underflow_reads = Some(config.capacity() + 1);
        let report = run(&config).unwrap();
        assert!(report.passed(), "{:?} {:?}", report.mismatches, report.gaps);
        assert_eq!(report.underflow_transactions, 5);
        let underflow = report.coverage.get(UNDERFLOW).unwrap();
        assert!(!underflow.missing.contains(&Bin::Value(1)));
    }

    #[test]
    fn missing_underflow_is_a_gap() {
        let mut cov = fifo_coverage(1, 100.0).unwrap();
        let intended = [(false, 0), (false, 1), (true, 0), (true, 1)];
        for (wr, data) in intended {
            cov.sample(CROSS, Bin::Pair(wr as u64, data)).unwrap();
        }
        let snapshot = cov.snapshot();

        let gaps = coverage_gaps(&cov, &snapshot, &intended, true, true);
        assert_eq!(
            gaps,
            vec![CoverageGap {
                dimension: UNDERFLOW.to_string(),
                bin: Bin::Value(1),
            }]
        );
        assert!(coverage_gaps(&cov, &snapshot, &intended, true, false).is_empty());

        cov.sample(UNDERFLOW, Bin::Value(1)).unwrap();
        assert!(coverage_gaps(&cov, &snapshot, &intended, true, true).is_empty());
    }

    #[test]
    fn gaps_reported_when_closure_is_missed() {
        let mut config = RunConfig::new(4, 2).with_seed(5);
        config.max_random_transactions = Some(3);
        let report = run(&config).unwrap();
        assert!(!report.closed);
        assert!(!report.gaps.is_empty());
        assert!(report.mismatches.is_empty());
        assert!(matches!(report.into_result(), Err(TbError::CoverageGap { .. })));
    }
}
