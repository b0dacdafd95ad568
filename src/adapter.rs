//! Bus-functional model of the FIFO ports.
//!
//! The only place where transactions turn into pin activity and back. One
//! instance is built per run and handed to every component that needs it.

use futures::channel::mpsc::{
    self, Receiver, Sender, TryRecvError, UnboundedReceiver, UnboundedSender,
};
use futures::future::poll_fn;
use std::future::Future;

use crate::signal::Signal;
use crate::sim::SimHandle;
use crate::tb_obj::TbObj;
use crate::transaction::{ObservedResult, ReadObservation, Transaction, WriteObservation};
use crate::trigger::ClockDomain;
use crate::{TbError, TbResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BfmStats {
    pub sent: u64,
    pub driven: u64,
    pub idle: u64,
    pub write_samples: u64,
    pub read_samples: u64,
}

type Subscribers<T> = TbObj<Vec<UnboundedSender<T>>>;

#[derive(Clone)]
pub struct FifoBfm {
    sim: SimHandle,
    // rendezvous: buffer 0 plus the single sender slot
    driver_tx: TbObj<Sender<Transaction>>,
    driver_rx: TbObj<Option<Receiver<Transaction>>>,
    write_subs: Subscribers<WriteObservation>,
    read_subs: Subscribers<ReadObservation>,
    stats: TbObj<BfmStats>,
    reset_cycles: u32,
}

impl FifoBfm {
    pub fn new(sim: &SimHandle, reset_cycles: u32) -> Self {
        let (tx, rx) = mpsc::channel(0);
        Self {
            sim: sim.clone(),
            driver_tx: TbObj::new(tx),
            driver_rx: TbObj::new(Some(rx)),
            write_subs: TbObj::new(Vec::new()),
            read_subs: TbObj::new(Vec::new()),
            stats: TbObj::new(BfmStats::default()),
            reset_cycles,
        }
    }

    pub fn subscribe_writes(&self) -> UnboundedReceiver<WriteObservation> {
        let (tx, rx) = mpsc::unbounded();
        self.write_subs.get_mut().push(tx);
        rx
    }

    pub fn subscribe_reads(&self) -> UnboundedReceiver<ReadObservation> {
        let (tx, rx) = mpsc::unbounded();
        self.read_subs.get_mut().push(tx);
        rx
    }

    pub fn stats(&self) -> BfmStats {
        *self.stats.get()
    }

    /// A transaction was handed over but not driven yet.
    pub fn has_pending(&self) -> bool {
        let stats = self.stats.get();
        stats.sent > stats.driven
    }

    pub async fn reset(&self) -> TbResult<()> {
        self.sim.rising_edge(ClockDomain::Write).await;
        self.sim.set_bool(Signal::ResetWrite, true)?;
        self.sim.set_bool(Signal::ResetRead, true)?;
        self.sim.set(Signal::DataIn, 0)?;
        self.sim.set_bool(Signal::WriteEnable, false)?;
        self.sim.set_bool(Signal::ReadEnable, false)?;
        self.sim
            .clock_cycles(ClockDomain::Write, self.reset_cycles)
            .await;
        self.sim.set_bool(Signal::ResetWrite, false)?;
        self.sim.set_bool(Signal::ResetRead, false)?;
        self.sim.rising_edge(ClockDomain::Write).await;
        log::debug!(
            "reset released at cycle {}",
            self.sim.cycle(ClockDomain::Write)
        );
        Ok(())
    }

    /// Hand a transaction to the driver. Completes at once if the slot is
    /// free, otherwise waits until the driver took the previous one.
    pub async fn send(&self, tx: Transaction) -> TbResult<()> {
        poll_fn(|cx| self.driver_tx.get_mut().poll_ready(cx))
            .await
            .map_err(|_| TbError::ChannelClosed("driver"))?;
        self.driver_tx
            .get_mut()
            .start_send(tx)
            .map_err(|_| TbError::ChannelClosed("driver"))?;
        self.stats.get_mut().sent += 1;
        log::trace!("sent {}", tx);
        Ok(())
    }

    /// Launch driver and monitors. They run until the simulation is dropped.
    pub fn start(&self) -> TbResult<()> {
        let rx = self
            .driver_rx
            .get_mut()
            .take()
            .ok_or_else(|| TbError::Config("device adapter already started".to_string()))?;
        self.fork("driver", self.clone().driver(rx));
        self.fork("write_monitor", self.clone().write_monitor());
        self.fork("read_monitor", self.clone().read_monitor());
        Ok(())
    }

    fn fork(&self, name: &'static str, loop_fut: impl Future<Output = TbResult<()>> + 'static) {
        self.sim.spawn(name, async move {
            if let Err(e) = loop_fut.await {
                log::error!("{} stopped: {}", name, e);
            }
        });
    }

    async fn driver(self, mut rx: Receiver<Transaction>) -> TbResult<()> {
        loop {
            self.sim.rising_edge(ClockDomain::Write).await;
            match rx.try_recv() {
                Ok(tx) => {
                    self.sim.set_bool(Signal::WriteEnable, tx.write_enable)?;
                    self.sim.set_bool(Signal::ReadEnable, tx.read_enable)?;
                    self.sim.set(Signal::DataIn, tx.data)?;
                    self.stats.get_mut().driven += 1;
                }
                Err(TryRecvError::Closed) => return Err(TbError::ChannelClosed("driver")),
                Err(TryRecvError::Empty) => {
                    // nothing pending: enables back to neutral, data holds
                    self.sim.set_bool(Signal::WriteEnable, false)?;
                    self.sim.set_bool(Signal::ReadEnable, false)?;
                    self.stats.get_mut().idle += 1;
                }
            }
        }
    }

    async fn write_monitor(self) -> TbResult<()> {
        let mut cycle = 0;
        loop {
            self.sim.rising_edge(ClockDomain::Write).await;
            let obs = WriteObservation {
                cycle,
                write_enable: self.sim.get_bool(Signal::WriteEnable)?,
                read_enable: self.sim.get_bool(Signal::ReadEnable)?,
                data: self.sim.get(Signal::DataIn)?,
                full: self.sim.get_bool(Signal::Full)?,
            };
            publish(&self.write_subs, obs);
            self.stats.get_mut().write_samples += 1;
            cycle += 1;
        }
    }

    async fn read_monitor(self) -> TbResult<()> {
        let mut cycle = 0;
        loop {
            self.sim.rising_edge(ClockDomain::Read).await;
            let obs = ReadObservation {
                cycle,
                result: ObservedResult {
                    data_out: self.sim.get(Signal::DataOut)?,
                    overflow: self.sim.get_bool(Signal::Overflow)?,
                    underflow: self.sim.get_bool(Signal::Underflow)?,
                },
                empty: self.sim.get_bool(Signal::Empty)?,
            };
            publish(&self.read_subs, obs);
            self.stats.get_mut().read_samples += 1;
            cycle += 1;
        }
    }
}

fn publish<T: Clone>(subs: &Subscribers<T>, item: T) {
    // subscribers that went away are dropped from the list
    subs.get_mut()
        .retain(|tx| tx.unbounded_send(item.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dut::FifoDut;
    use crate::sim::Sim;
    use crate::sim_if::DualClock;
    use futures::StreamExt;

    fn sim() -> Sim {
        Sim::new(FifoDut::new(4, 2), DualClock::aligned(10_000).unwrap())
    }

    async fn drive_two(
        sim: SimHandle,
    ) -> TbResult<(Vec<WriteObservation>, Vec<ReadObservation>)> {
        let bfm = FifoBfm::new(&sim, 5);
        let mut writes = bfm.subscribe_writes();
        let mut reads = bfm.subscribe_reads();
        bfm.reset().await?;
        bfm.start()?;
        bfm.send(Transaction::new(true, false, 3, 0)).await?;
        bfm.send(Transaction::new(false, true, 0, 1)).await?;
        sim.clock_cycles(ClockDomain::Write, 4).await;

        let mut w = Vec::new();
        let mut r = Vec::new();
        for _ in 0..4 {
            w.push(writes.next().await.ok_or(TbError::ChannelClosed("writes"))?);
            r.push(reads.next().await.ok_or(TbError::ChannelClosed("reads"))?);
        }
        Ok((w, r))
    }

    #[test]
    fn transactions_show_up_on_both_topics() {
        let mut sim = sim();
        let (w, r) = sim.run(drive_two(sim.handle())).unwrap();

        let cycles: Vec<u64> = w.iter().map(|o| o.cycle).collect();
        assert_eq!(cycles, vec![0, 1, 2, 3]);

        let write_cycle = w.iter().position(|o| o.write_enable).unwrap();
        assert_eq!(w[write_cycle].data, 3);
        assert!(w[write_cycle + 1].read_enable);
        assert!(!w[write_cycle + 2].read_enable && !w[write_cycle + 2].write_enable);

        assert_eq!(r[write_cycle + 1].result.data_out, 3);
        assert!(r.iter().all(|o| !o.result.overflow && !o.result.underflow));
    }

    // write cycle and driven count after each of three back-to-back sends
    async fn back_to_back(sim: SimHandle) -> TbResult<Vec<(u64, u64)>> {
        let bfm = FifoBfm::new(&sim, 5);
        bfm.reset().await?;
        bfm.start()?;
        let mut seen = vec![(sim.cycle(ClockDomain::Write), bfm.stats().driven)];
        for seq in 0..3 {
            bfm.send(Transaction::new(true, false, seq, seq)).await?;
            seen.push((sim.cycle(ClockDomain::Write), bfm.stats().driven));
        }
        Ok(seen)
    }

    #[test]
    fn send_waits_for_the_driver() {
        let mut sim = sim();
        let seen = sim.run(back_to_back(sim.handle())).unwrap();
        let (start, _) = seen[0];
        // the free slot takes the first transaction without waiting
        assert_eq!(seen[1], (start, 0));
        // each later send returns on the edge where the driver took the previous one
        assert_eq!(seen[2].1, 1);
        assert_eq!(seen[3].1, 2);
        assert!(seen[2].0 > seen[1].0);
        assert_eq!(seen[3].0, seen[2].0 + 1);
    }

    async fn start_twice(sim: SimHandle) -> TbResult<()> {
        let bfm = FifoBfm::new(&sim, 5);
        bfm.start()?;
        bfm.start()
    }

    #[test]
    fn start_only_once() {
        let mut sim = sim();
        assert!(matches!(
            sim.run(start_twice(sim.handle())),
            Err(TbError::Config(_))
        ));
    }
}
