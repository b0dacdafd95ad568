use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use crate::executor::{Executor, JoinHandle, Spawner};
use crate::signal::Signal;
use crate::sim_if::{ClockSource, EdgeEvent, SimIf};
use crate::trigger::{ClockDomain, EdgeWaiters, Trigger};
use crate::{TbError, TbResult};

struct SimState {
    dut: Box<dyn SimIf>,
    // writes are applied after every task woken by the current edge has run
    pending: Vec<(Signal, u64)>,
    cycles: [u64; 2],
    time_ps: u64,
    data_width: u32,
}

/// Handle through which tasks reach the device and the clocks.
///
/// Cheap to clone; every component of a run holds its own copy.
#[derive(Clone)]
pub struct SimHandle {
    state: Rc<RefCell<SimState>>,
    waiters: Rc<RefCell<EdgeWaiters>>,
    spawner: Spawner,
}

impl SimHandle {
    pub fn rising_edge(&self, domain: ClockDomain) -> Trigger {
        Trigger::rising_edge(domain, &self.waiters)
    }

    pub async fn clock_cycles(&self, domain: ClockDomain, n_cycles: u32) {
        for _ in 0..n_cycles {
            self.rising_edge(domain).await;
        }
    }

    pub fn get(&self, signal: Signal) -> TbResult<u64> {
        self.state.borrow().dut.get_value(signal)
    }

    pub fn get_bool(&self, signal: Signal) -> TbResult<bool> {
        Ok(self.get(signal)? != 0)
    }

    /// Schedule a write to an input port. It becomes visible to the device
    /// before the next edge.
    pub fn set(&self, signal: Signal, value: u64) -> TbResult<()> {
        if !signal.is_input() {
            return Err(TbError::Signal {
                signal,
                reason: "output ports can not be driven".to_string(),
            });
        }
        let mut state = self.state.borrow_mut();
        signal.check_value(value, state.data_width)?;
        if let Some(slot) = state.pending.iter_mut().find(|(s, _)| *s == signal) {
            slot.1 = value;
        } else {
            state.pending.push((signal, value));
        }
        Ok(())
    }

    pub fn set_bool(&self, signal: Signal, value: bool) -> TbResult<()> {
        self.set(signal, value as u64)
    }

    /// Rising edges seen so far on `domain`.
    pub fn cycle(&self, domain: ClockDomain) -> u64 {
        self.state.borrow().cycles[domain.key() as usize]
    }

    pub fn time_ps(&self) -> u64 {
        self.state.borrow().time_ps
    }

    pub fn data_width(&self) -> u32 {
        self.state.borrow().data_width
    }

    pub fn spawn<T: 'static>(
        &self,
        name: &str,
        future: impl Future<Output = T> + 'static,
    ) -> JoinHandle<T> {
        self.spawner.spawn(name, future)
    }

    fn flush_writes(&self) -> TbResult<()> {
        let mut state = self.state.borrow_mut();
        let pending = std::mem::take(&mut state.pending);
        for (signal, value) in pending {
            state.dut.set_value(signal, value)?;
        }
        Ok(())
    }

    fn apply_edges(&self, event: &EdgeEvent) -> TbResult<()> {
        {
            let mut state = self.state.borrow_mut();
            state.time_ps = event.time_ps;
            state.dut.eval_edges(&event.domains)?;
            for domain in &event.domains {
                state.cycles[domain.key() as usize] += 1;
            }
        }
        let mut waiters = self.waiters.borrow_mut();
        for domain in &event.domains {
            waiters.react(*domain);
        }
        Ok(())
    }

    fn has_edge_waiters(&self) -> bool {
        !self.waiters.borrow().is_empty()
    }
}

/// Owns the executor, the device and the clock source of one run.
///
/// Background tasks still pending when [`Sim::run`] returns are abandoned and
/// dropped together with the `Sim`.
pub struct Sim {
    executor: Executor,
    handle: SimHandle,
    clock: Box<dyn ClockSource>,
    time_limit_ps: Option<u64>,
}

impl Sim {
    pub fn new(dut: impl SimIf + 'static, clock: impl ClockSource + 'static) -> Self {
        let executor = Executor::new();
        let data_width = dut.data_width();
        let handle = SimHandle {
            state: Rc::new(RefCell::new(SimState {
                dut: Box::new(dut),
                pending: Vec::new(),
                cycles: [0; 2],
                time_ps: 0,
                data_width,
            })),
            waiters: Rc::new(RefCell::new(EdgeWaiters::default())),
            spawner: executor.spawner(),
        };
        Self {
            executor,
            handle,
            clock: Box::new(clock),
            time_limit_ps: None,
        }
    }

    pub fn with_time_limit(mut self, time_limit_ps: Option<u64>) -> Self {
        self.time_limit_ps = time_limit_ps;
        self
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    /// Run `top` to completion, advancing the clocks whenever no task is ready.
    pub fn run<T: 'static>(
        &mut self,
        top: impl Future<Output = TbResult<T>> + 'static,
    ) -> TbResult<T> {
        let mut top = self.executor.spawn("top", top);
        loop {
            self.executor.run_once();
            if let Some(result) = top.try_result() {
                return result.and_then(|r| r);
            }
            self.handle.flush_writes()?;
            if !self.handle.has_edge_waiters() {
                return Err(TbError::Stalled {
                    time_ps: self.clock.now_ps(),
                });
            }
            let event = self.clock.next_edges().ok_or(TbError::Timeout {
                time_ps: self.clock.now_ps(),
            })?;
            if let Some(limit) = self.time_limit_ps {
                if event.time_ps > limit {
                    return Err(TbError::Timeout { time_ps: limit });
                }
            }
            log::trace!("t={}ps edges {:?}", event.time_ps, event.domains);
            self.handle.apply_edges(&event)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dut::FifoDut;
    use crate::sim_if::DualClock;

    fn sim() -> Sim {
        Sim::new(FifoDut::new(4, 2), DualClock::aligned(10_000).unwrap())
    }

    async fn count_cycles(h: SimHandle) -> TbResult<u64> {
        h.clock_cycles(ClockDomain::Write, 3).await;
        Ok(h.cycle(ClockDomain::Write))
    }

    async fn drive_data(h: SimHandle) -> TbResult<(u64, u64)> {
        h.rising_edge(ClockDomain::Write).await;
        h.set(Signal::DataIn, 7)?;
        let before = h.get(Signal::DataIn)?;
        h.rising_edge(ClockDomain::Write).await;
        Ok((before, h.get(Signal::DataIn)?))
    }

    async fn forever(h: SimHandle) -> TbResult<()> {
        loop {
            h.rising_edge(ClockDomain::Read).await;
        }
    }

    async fn never() -> TbResult<()> {
        futures::future::pending::<()>().await;
        Ok(())
    }

    #[test]
    fn run_returns_top_result() {
        let mut sim = sim();
        let cycles = sim.run(count_cycles(sim.handle())).unwrap();
        assert_eq!(cycles, 3);
    }

    #[test]
    fn writes_are_deferred_until_the_edge() {
        let mut sim = sim();
        let (before, after) = sim.run(drive_data(sim.handle())).unwrap();
        assert_eq!(before, 0);
        assert_eq!(after, 7);
    }

    #[test]
    fn driving_an_output_is_an_error() {
        let sim = sim();
        let h = sim.handle();
        assert!(h.set(Signal::Full, 1).is_err());
        assert!(h.set(Signal::DataIn, 16).is_err());
    }

    #[test]
    fn stalled_run_is_detected() {
        let mut sim = sim();
        let result = sim.run(never());
        assert!(matches!(result, Err(TbError::Stalled { .. })));
    }

    #[test]
    fn time_limit_stops_the_run() {
        let mut sim = sim().with_time_limit(Some(100_000));
        let result = sim.run(forever(sim.handle()));
        assert!(matches!(result, Err(TbError::Timeout { time_ps: 100_000 })));
    }
}
