#![allow(dead_code)]

use fifo_tb::adapter::FifoBfm;
use fifo_tb::dut::{FifoDut, Mutation};
use fifo_tb::scoreboard::{run_scoreboard, Mismatch, Scoreboard};
use fifo_tb::sim::{Sim, SimHandle};
use fifo_tb::sim_if::DualClock;
use fifo_tb::transaction::{ReadObservation, WriteObservation};
use fifo_tb::{ClockDomain, TbError, TbObj, TbResult};
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use std::future::Future;

/// Everything the monitors saw, paired by cycle, plus the scoreboard verdict.
pub struct Trace {
    pub pairs: Vec<(WriteObservation, ReadObservation)>,
    pub mismatches: Vec<Mismatch>,
    pub passed: bool,
}

impl Trace {
    /// Cycles that carried a write.
    pub fn writes(&self) -> impl Iterator<Item = &(WriteObservation, ReadObservation)> {
        self.pairs.iter().filter(|(w, _)| w.write_enable)
    }

    /// Cycles that carried a read.
    pub fn reads(&self) -> impl Iterator<Item = &(WriteObservation, ReadObservation)> {
        self.pairs.iter().filter(|(w, _)| w.read_enable)
    }
}

fn collect<T: 'static>(sim: &SimHandle, name: &str, mut rx: UnboundedReceiver<T>) -> TbObj<Vec<T>> {
    let items = TbObj::new(Vec::new());
    let sink = items.clone();
    sim.spawn(name, async move {
        while let Some(item) = rx.next().await {
            sink.get_mut().push(item);
        }
    });
    items
}

/// Reset the device, run `sequence` through the adapter and let the
/// pipeline drain.
pub fn directed<F, Fut>(width: u32, depth: u32, mutation: Mutation, sequence: F) -> Trace
where
    F: FnOnce(FifoBfm) -> Fut + 'static,
    Fut: Future<Output = TbResult<()>> + 'static,
{
    let dut = FifoDut::new(width, depth).with_mutation(mutation);
    let mut sim = Sim::new(dut, DualClock::aligned(10_000).unwrap());
    let handle = sim.handle();
    sim.run(async move {
        let bfm = FifoBfm::new(&handle, 5);
        let scoreboard = TbObj::new(Scoreboard::new(depth));
        handle.spawn(
            "scoreboard",
            run_scoreboard(scoreboard.clone(), bfm.subscribe_writes(), bfm.subscribe_reads()),
        );
        let writes = collect(&handle, "writes", bfm.subscribe_writes());
        let reads = collect(&handle, "reads", bfm.subscribe_reads());

        bfm.reset().await?;
        bfm.start()?;
        sequence(bfm.clone()).await?;
        while bfm.has_pending() {
            handle.rising_edge(ClockDomain::Write).await;
        }
        handle.clock_cycles(ClockDomain::Write, 3).await;

        let sb = scoreboard.get();
        let pairs = writes
            .get()
            .iter()
            .copied()
            .zip(reads.get().iter().copied())
            .collect();
        Ok::<_, TbError>(Trace {
            pairs,
            mismatches: sb.mismatches().to_vec(),
            passed: sb.passed(),
        })
    })
    .unwrap()
}
