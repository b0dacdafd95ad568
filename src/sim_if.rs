use crate::signal::Signal;
use crate::trigger::ClockDomain;
use crate::{TbError, TbResult};

/// Signal-level access to the device under test.
///
/// Implemented by a simulator binding or by a behavioral model. The runtime
/// calls [`SimIf::eval_edges`] once per edge event, after all deferred signal
/// writes of the previous phase have been applied.
pub trait SimIf {
    fn set_value(&mut self, signal: Signal, value: u64) -> TbResult<()>;
    fn get_value(&self, signal: Signal) -> TbResult<u64>;
    /// Evaluate coincident rising edges on `domains`.
    fn eval_edges(&mut self, domains: &[ClockDomain]) -> TbResult<()>;
    fn data_width(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeEvent {
    pub time_ps: u64,
    pub domains: Vec<ClockDomain>,
}

/// Delivers rising edges in time order. The runtime never advances time on
/// its own.
pub trait ClockSource {
    fn next_edges(&mut self) -> Option<EdgeEvent>;
    fn now_ps(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
struct ClockGen {
    period_ps: u64,
    next_ps: u64,
}

impl ClockGen {
    fn new(domain: ClockDomain, period_ps: u64, phase_ps: u64) -> TbResult<Self> {
        if period_ps == 0 {
            return Err(TbError::Config(format!("{} period must be non-zero", domain)));
        }
        if period_ps % 2 != 0 {
            log::warn!(
                "{} period {}ps not dividable by 2, high time will be {}ps",
                domain,
                period_ps,
                period_ps / 2
            );
        }
        // first rising edge after the initial low phase
        Ok(Self {
            period_ps,
            next_ps: phase_ps + period_ps - period_ps / 2,
        })
    }
}

/// Two free-running clocks, one per domain.
#[derive(Debug, Clone)]
pub struct DualClock {
    write: ClockGen,
    read: ClockGen,
    now_ps: u64,
}

impl DualClock {
    pub fn new(write_period_ps: u64, read_period_ps: u64) -> TbResult<Self> {
        Self::with_phase(write_period_ps, read_period_ps, 0)
    }

    /// Clocks with equal period and aligned edges.
    pub fn aligned(period_ps: u64) -> TbResult<Self> {
        Self::new(period_ps, period_ps)
    }

    /// Read clock delayed by `read_phase_ps` relative to the write clock.
    pub fn with_phase(
        write_period_ps: u64,
        read_period_ps: u64,
        read_phase_ps: u64,
    ) -> TbResult<Self> {
        Ok(Self {
            write: ClockGen::new(ClockDomain::Write, write_period_ps, 0)?,
            read: ClockGen::new(ClockDomain::Read, read_period_ps, read_phase_ps)?,
            now_ps: 0,
        })
    }
}

impl ClockSource for DualClock {
    fn next_edges(&mut self) -> Option<EdgeEvent> {
        let time_ps = self.write.next_ps.min(self.read.next_ps);
        let mut domains = Vec::with_capacity(2);
        if self.write.next_ps == time_ps {
            domains.push(ClockDomain::Write);
            self.write.next_ps = self.write.next_ps.checked_add(self.write.period_ps)?;
        }
        if self.read.next_ps == time_ps {
            domains.push(ClockDomain::Read);
            self.read.next_ps = self.read.next_ps.checked_add(self.read.period_ps)?;
        }
        self.now_ps = time_ps;
        Some(EdgeEvent { time_ps, domains })
    }

    fn now_ps(&self) -> u64 {
        self.now_ps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_clocks_edge_together() {
        let mut clk = DualClock::aligned(10_000).unwrap();
        let e = clk.next_edges().unwrap();
        assert_eq!(e.time_ps, 5_000);
        assert_eq!(e.domains, vec![ClockDomain::Write, ClockDomain::Read]);
        let e = clk.next_edges().unwrap();
        assert_eq!(e.time_ps, 15_000);
        assert_eq!(clk.now_ps(), 15_000);
    }

    #[test]
    fn independent_periods_interleave() {
        let mut clk = DualClock::new(10_000, 4_000).unwrap();
        let mut writes = 0;
        let mut reads = 0;
        let mut last = 0;
        for _ in 0..20 {
            let e = clk.next_edges().unwrap();
            assert!(e.time_ps >= last);
            last = e.time_ps;
            writes += e.domains.contains(&ClockDomain::Write) as u32;
            reads += e.domains.contains(&ClockDomain::Read) as u32;
        }
        assert!(reads > 2 * writes);
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(matches!(DualClock::new(0, 10), Err(TbError::Config(_))));
    }
}
