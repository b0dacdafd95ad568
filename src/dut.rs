//! Behavioral model of the dual-clock FIFO.
//!
//! Stands in for the HDL simulation when no simulator is attached. Faults can
//! be injected with [`Mutation`] to check that the testbench notices them.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::signal::{mask, Signal};
use crate::sim_if::SimIf;
use crate::trigger::ClockDomain;
use crate::{TbError, TbResult};

/// Injected design faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mutation {
    #[default]
    None,
    /// overflow is never raised
    NoOverflowFlag,
    /// underflow is never raised
    NoUnderflowFlag,
    /// bit `n` of data_out is stuck at 1
    StuckDataBit(u32),
    /// reads return the newest word instead of the oldest
    LifoOrder,
    /// the memory holds one word less than 2^depth
    CapacityOffByOne,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::None => write!(f, "none"),
            Mutation::NoOverflowFlag => write!(f, "no-overflow-flag"),
            Mutation::NoUnderflowFlag => write!(f, "no-underflow-flag"),
            Mutation::StuckDataBit(bit) => write!(f, "stuck-data-bit:{}", bit),
            Mutation::LifoOrder => write!(f, "lifo-order"),
            Mutation::CapacityOffByOne => write!(f, "capacity-off-by-one"),
        }
    }
}

impl FromStr for Mutation {
    type Err = TbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Mutation::None),
            "no-overflow-flag" => Ok(Mutation::NoOverflowFlag),
            "no-underflow-flag" => Ok(Mutation::NoUnderflowFlag),
            "lifo-order" => Ok(Mutation::LifoOrder),
            "capacity-off-by-one" => Ok(Mutation::CapacityOffByOne),
            _ => match s.strip_prefix("stuck-data-bit:") {
                Some(bit) => bit
                    .parse()
                    .map(Mutation::StuckDataBit)
                    .map_err(|_| TbError::Config(format!("invalid bit index in '{}'", s))),
                None => Err(TbError::Config(format!("unknown mutation '{}'", s))),
            },
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Inputs {
    wr: bool,
    rd: bool,
    data: u64,
    rst_wr: bool,
    rst_rd: bool,
}

#[derive(Debug, Clone)]
pub struct FifoDut {
    width: u32,
    depth: u32,
    inputs: Inputs,
    mem: VecDeque<u64>,
    data_out: u64,
    overflow: bool,
    underflow: bool,
    mutation: Mutation,
}

impl FifoDut {
    pub fn new(width: u32, depth: u32) -> Self {
        Self {
            width,
            depth,
            inputs: Inputs::default(),
            mem: VecDeque::with_capacity(1 << depth),
            data_out: 0,
            overflow: false,
            underflow: false,
            mutation: Mutation::None,
        }
    }

    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = mutation;
        self
    }

    pub fn capacity(&self) -> usize {
        match self.mutation {
            Mutation::CapacityOffByOne => (1usize << self.depth) - 1,
            _ => 1usize << self.depth,
        }
    }

    pub fn level(&self) -> usize {
        self.mem.len()
    }

    fn read_edge(&mut self) {
        if self.inputs.rst_rd {
            self.underflow = false;
            self.data_out = 0;
            return;
        }
        self.underflow = false;
        if !self.inputs.rd {
            return;
        }
        let word = match self.mutation {
            Mutation::LifoOrder => self.mem.pop_back(),
            _ => self.mem.pop_front(),
        };
        match word {
            Some(word) => {
                self.data_out = match self.mutation {
                    Mutation::StuckDataBit(bit) if bit < self.width => word | (1 << bit),
                    _ => word,
                };
            }
            None => self.underflow = self.mutation != Mutation::NoUnderflowFlag,
        }
    }

    fn write_edge(&mut self) {
        if self.inputs.rst_wr {
            self.mem.clear();
            self.overflow = false;
            return;
        }
        self.overflow = false;
        if !self.inputs.wr {
            return;
        }
        if self.mem.len() >= self.capacity() {
            self.overflow = self.mutation != Mutation::NoOverflowFlag;
        } else {
            self.mem.push_back(self.inputs.data & mask(self.width));
        }
    }
}

impl SimIf for FifoDut {
    fn set_value(&mut self, signal: Signal, value: u64) -> TbResult<()> {
        signal.check_value(value, self.width)?;
        let bit = value != 0;
        match signal {
            Signal::WriteEnable => self.inputs.wr = bit,
            Signal::ReadEnable => self.inputs.rd = bit,
            Signal::DataIn => self.inputs.data = value,
            Signal::ResetWrite => self.inputs.rst_wr = bit,
            Signal::ResetRead => self.inputs.rst_rd = bit,
            _ => {
                return Err(TbError::Signal {
                    signal,
                    reason: "output ports can not be driven".to_string(),
                })
            }
        }
        Ok(())
    }

    fn get_value(&self, signal: Signal) -> TbResult<u64> {
        let value = match signal {
            Signal::WriteEnable => self.inputs.wr as u64,
            Signal::ReadEnable => self.inputs.rd as u64,
            Signal::DataIn => self.inputs.data,
            Signal::ResetWrite => self.inputs.rst_wr as u64,
            Signal::ResetRead => self.inputs.rst_rd as u64,
            Signal::DataOut => self.data_out,
            Signal::Full => (self.mem.len() >= self.capacity()) as u64,
            Signal::Empty => self.mem.is_empty() as u64,
            Signal::Overflow => self.overflow as u64,
            Signal::Underflow => self.underflow as u64,
        };
        Ok(value)
    }

    fn eval_edges(&mut self, domains: &[ClockDomain]) -> TbResult<()> {
        // coincident edges: the read port sees the memory before the write
        if domains.contains(&ClockDomain::Read) {
            self.read_edge();
        }
        if domains.contains(&ClockDomain::Write) {
            self.write_edge();
        }
        Ok(())
    }

    fn data_width(&self) -> u32 {
        self.width
    }
}
