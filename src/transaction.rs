use futures::channel::mpsc::UnboundedReceiver;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use std::fmt;

/// One stimulus item, driven on a single write-clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub write_enable: bool,
    pub read_enable: bool,
    pub data: u64,
    /// Sequence number assigned by the generator.
    pub cycle: u64,
}

impl Transaction {
    pub fn new(write_enable: bool, read_enable: bool, data: u64, cycle: u64) -> Self {
        Self {
            write_enable,
            read_enable,
            data,
            cycle,
        }
    }

    pub fn read_only(cycle: u64) -> Self {
        Self::new(false, true, 0, cycle)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} wr={} rd={} data={:#x}",
            self.cycle, self.write_enable as u8, self.read_enable as u8, self.data
        )
    }
}

/// Inputs as the device consumed them on a write-clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteObservation {
    pub cycle: u64,
    pub write_enable: bool,
    pub read_enable: bool,
    pub data: u64,
    pub full: bool,
}

impl fmt::Display for WriteObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} wr={} rd={} data={:#x} full={}",
            self.cycle, self.write_enable as u8, self.read_enable as u8, self.data, self.full as u8
        )
    }
}

/// Device outputs relevant to the scoreboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ObservedResult {
    pub data_out: u64,
    pub overflow: bool,
    pub underflow: bool,
}

impl fmt::Display for ObservedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data_out={:#x} overflow={} underflow={}",
            self.data_out, self.overflow as u8, self.underflow as u8
        )
    }
}

/// Outputs sampled on a read-clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadObservation {
    pub cycle: u64,
    pub result: ObservedResult,
    pub empty: bool,
}

impl fmt::Display for ReadObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle {} {} empty={}", self.cycle, self.result, self.empty as u8)
    }
}

/// Either topic of the device adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Write(WriteObservation),
    Read(ReadObservation),
}

/// Merge both observation topics into one stream. Order within each topic
/// is kept; the interleaving between them is arbitrary.
pub fn merge_observations(
    writes: UnboundedReceiver<WriteObservation>,
    reads: UnboundedReceiver<ReadObservation>,
) -> impl Stream<Item = Observation> {
    stream::select(
        writes.map(Observation::Write),
        reads.map(Observation::Read),
    )
}
