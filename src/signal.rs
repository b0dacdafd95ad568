use serde::Serialize;
use std::fmt;

use crate::{TbError, TbResult};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Ports of the FIFO as seen from the testbench.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Signal {
    WriteEnable,
    ReadEnable,
    DataIn,
    ResetWrite,
    ResetRead,
    DataOut,
    Full,
    Empty,
    Overflow,
    Underflow,
}

impl Signal {
    #[cfg(test)]
    pub const ALL: [Signal; 10] = [
        Signal::WriteEnable,
        Signal::ReadEnable,
        Signal::DataIn,
        Signal::ResetWrite,
        Signal::ResetRead,
        Signal::DataOut,
        Signal::Full,
        Signal::Empty,
        Signal::Overflow,
        Signal::Underflow,
    ];

    /// Port name on the HDL entity.
    pub fn name(self) -> &'static str {
        match self {
            Signal::WriteEnable => "i_wr",
            Signal::ReadEnable => "i_rd",
            Signal::DataIn => "i_data",
            Signal::ResetWrite => "i_rst_wr",
            Signal::ResetRead => "i_rst_rd",
            Signal::DataOut => "o_data",
            Signal::Full => "o_full",
            Signal::Empty => "o_empty",
            Signal::Overflow => "o_overflow",
            Signal::Underflow => "o_underflow",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Signal::WriteEnable
            | Signal::ReadEnable
            | Signal::DataIn
            | Signal::ResetWrite
            | Signal::ResetRead => Direction::Input,
            _ => Direction::Output,
        }
    }

    /// Width in bits for a FIFO with `data_width` bit words.
    pub fn width(self, data_width: u32) -> u32 {
        match self {
            Signal::DataIn | Signal::DataOut => data_width,
            _ => 1,
        }
    }

    pub fn is_input(self) -> bool {
        self.direction() == Direction::Input
    }

    /// Reject values that do not fit the port.
    pub fn check_value(self, value: u64, data_width: u32) -> TbResult<()> {
        if value & !mask(self.width(data_width)) != 0 {
            return Err(TbError::Signal {
                signal: self,
                reason: format!(
                    "value {:#x} does not fit in {} bit(s)",
                    value,
                    self.width(data_width)
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}
