use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Prediction, ReferenceModel};
use crate::tb_obj::TbObj;
use crate::transaction::{
    merge_observations, ObservedResult, Observation, ReadObservation, WriteObservation,
};
use crate::{TbError, TbResult};

/// Matches write-side and read-side observations by logical cycle index,
/// regardless of the order in which they arrive.
#[derive(Debug)]
pub struct CyclePairer<W, R> {
    writes: BTreeMap<u64, W>,
    reads: BTreeMap<u64, R>,
}

impl<W, R> Default for CyclePairer<W, R> {
    fn default() -> Self {
        Self {
            writes: BTreeMap::new(),
            reads: BTreeMap::new(),
        }
    }
}

impl<W, R> CyclePairer<W, R> {
    pub fn push_write(&mut self, cycle: u64, w: W) {
        self.writes.insert(cycle, w);
    }

    pub fn push_read(&mut self, cycle: u64, r: R) {
        self.reads.insert(cycle, r);
    }

    /// Next complete pair, oldest write cycle first. A write whose read has
    /// not arrived yet blocks every later cycle.
    pub fn pop_pair(&mut self) -> Option<(u64, W, R)> {
        let cycle = *self.writes.keys().next()?;
        let r = self.reads.remove(&cycle)?;
        let w = self.writes.remove(&cycle)?;
        Some((cycle, w, r))
    }

    pub fn pending(&self) -> usize {
        self.writes.len() + self.reads.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    pub cycle: u64,
    pub stimulus: WriteObservation,
    pub predicted: Prediction,
    pub observed: ObservedResult,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} (wr={} rd={} data={:#x}): predicted {}, observed {}",
            self.cycle,
            self.stimulus.write_enable as u8,
            self.stimulus.read_enable as u8,
            self.stimulus.data,
            self.predicted,
            self.observed
        )
    }
}

/// Replays observed stimulus through the reference model and checks every
/// sampled result against the prediction.
pub struct Scoreboard {
    model: ReferenceModel,
    pairer: CyclePairer<WriteObservation, ReadObservation>,
    mismatches: Vec<Mismatch>,
    writes: u64,
    reads: u64,
    compared: u64,
    matched: u64,
}

impl Scoreboard {
    pub fn new(depth: u32) -> Self {
        Scoreboard {
            model: ReferenceModel::new(depth),
            pairer: CyclePairer::default(),
            mismatches: Vec::new(),
            writes: 0,
            reads: 0,
            compared: 0,
            matched: 0,
        }
    }

    pub fn add_write(&mut self, obs: WriteObservation) {
        self.pairer.push_write(obs.cycle, obs);
        self.writes += 1;
        self.compare();
    }

    pub fn add_read(&mut self, obs: ReadObservation) {
        self.pairer.push_read(obs.cycle, obs);
        self.reads += 1;
        self.compare();
    }

    fn compare(&mut self) {
        while let Some((cycle, stimulus, sampled)) = self.pairer.pop_pair() {
            let predicted = self
                .model
                .step(stimulus.write_enable, stimulus.read_enable, stimulus.data);
            let observed = sampled.result;
            self.compared += 1;
            if predicted.data_out == observed.data_out
                && predicted.overflow == observed.overflow
                && predicted.underflow == observed.underflow
            {
                self.matched += 1;
            } else {
                let mismatch = Mismatch {
                    cycle,
                    stimulus,
                    predicted,
                    observed,
                };
                log::error!("scoreboard mismatch at {}", mismatch);
                self.mismatches.push(mismatch);
            }
        }
    }

    pub fn mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }

    pub fn compared(&self) -> u64 {
        self.compared
    }

    /// Observations still waiting for their counterpart.
    pub fn pending(&self) -> usize {
        self.pairer.pending()
    }

    pub fn passed(&self) -> bool {
        self.compared > 0
            && self.matched == self.compared
            && self.mismatches.is_empty()
            && self.pairer.pending() == 0
    }

    pub fn result(&self) -> TbResult<String> {
        match self.mismatches.first() {
            Some(first) => Err(TbError::Mismatch {
                count: self.mismatches.len(),
                first: first.to_string(),
            }),
            None => Ok(self.result_str()),
        }
    }

    pub fn result_str(&self) -> String {
        format!(
            "writes={}, reads={}, compared={}, matched={}, errors={}, pending: {}",
            self.writes,
            self.reads,
            self.compared,
            self.matched,
            self.mismatches.len(),
            self.pairer.pending()
        )
    }
}

/// Consumer loop feeding both observation topics into the scoreboard.
pub async fn run_scoreboard(
    scoreboard: TbObj<Scoreboard>,
    writes: UnboundedReceiver<WriteObservation>,
    reads: UnboundedReceiver<ReadObservation>,
) {
    let mut observations = merge_observations(writes, reads);
    while let Some(obs) = observations.next().await {
        match obs {
            Observation::Write(w) => scoreboard.get_mut().add_write(w),
            Observation::Read(r) => scoreboard.get_mut().add_read(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(cycle: u64, wr: bool, rd: bool, data: u64) -> WriteObservation {
        WriteObservation {
            cycle,
            write_enable: wr,
            read_enable: rd,
            data,
            full: false,
        }
    }

    fn read(cycle: u64, data_out: u64, overflow: bool, underflow: bool) -> ReadObservation {
        ReadObservation {
            cycle,
            result: ObservedResult {
                data_out,
                overflow,
                underflow,
            },
            empty: false,
        }
    }

    #[test]
    fn pairs_by_cycle_not_arrival() {
        let mut sb = Scoreboard::new(2);
        sb.add_read(read(1, 5, false, false));
        sb.add_read(read(0, 0, false, false));
        assert_eq!(sb.compared(), 0);
        sb.add_write(write(0, true, false, 5));
        sb.add_write(write(1, false, true, 0));
        assert_eq!(sb.compared(), 2);
        assert!(sb.passed(), "{}", sb.result_str());
    }

    #[test]
    fn every_mismatch_is_recorded() {
        let mut sb = Scoreboard::new(2);
        sb.add_write(write(0, true, false, 5));
        sb.add_read(read(0, 0, true, false));
        sb.add_write(write(1, false, true, 0));
        sb.add_read(read(1, 4, false, false));
        sb.add_write(write(2, false, true, 0));
        sb.add_read(read(2, 5, false, true));
        assert_eq!(sb.mismatches().len(), 2);
        assert_eq!(sb.mismatches()[0].cycle, 0);
        assert!(sb.mismatches()[0].predicted.overflow == false);
        assert_eq!(sb.mismatches()[1].predicted.data_out, 5);
        assert!(!sb.passed());
        assert!(matches!(sb.result(), Err(TbError::Mismatch { count: 2, .. })));
    }

    #[test]
    fn unpaired_observations_fail_the_check() {
        let mut sb = Scoreboard::new(2);
        sb.add_write(write(0, false, false, 0));
        sb.add_read(read(0, 0, false, false));
        sb.add_write(write(1, false, false, 0));
        assert_eq!(sb.pending(), 1);
        assert!(!sb.passed());
    }
}
