//! Functional coverage.
//!
//! A [`CoverageEngine`] owns a set of named dimensions. Points cover a dense
//! range of integer values, crosses cover the product of two points. Closure
//! of the primary dimension is announced once through registered callbacks.

use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

use crate::tb_obj::TbObj;
use crate::transaction::{merge_observations, Observation, ReadObservation, WriteObservation};
use crate::{TbError, TbResult};

pub const CROSS: &str = "top.cross";
pub const WRITE_ENABLE: &str = "top.wr";
pub const READ_ENABLE: &str = "top.rd";
pub const DATA: &str = "top.data";
pub const FULL: &str = "top.full";
pub const EMPTY: &str = "top.empty";
pub const OVERFLOW: &str = "top.overflow";
pub const UNDERFLOW: &str = "top.underflow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Bin {
    Value(u64),
    Pair(u64, u64),
}

impl fmt::Display for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bin::Value(v) => write!(f, "{}", v),
            Bin::Pair(a, b) => write!(f, "({}, {})", a, b),
        }
    }
}

#[derive(Debug)]
enum Kind {
    Point { bins: u64 },
    Cross { left: u64, right: u64 },
}

#[derive(Debug)]
struct Dimension {
    kind: Kind,
    hits: Vec<u32>,
    at_least: u32,
    covered: usize,
}

impl Dimension {
    fn new(kind: Kind, at_least: u32) -> Self {
        let total = match kind {
            Kind::Point { bins } => bins,
            Kind::Cross { left, right } => left * right,
        };
        Dimension {
            kind,
            hits: vec![0; total as usize],
            at_least: at_least.max(1),
            covered: 0,
        }
    }

    fn total(&self) -> usize {
        self.hits.len()
    }

    fn index(&self, bin: Bin) -> Option<usize> {
        match (&self.kind, bin) {
            (Kind::Point { bins }, Bin::Value(v)) if v < *bins => Some(v as usize),
            (Kind::Cross { left, right }, Bin::Pair(a, b)) if a < *left && b < *right => {
                Some((a * right + b) as usize)
            }
            _ => None,
        }
    }

    fn bin(&self, index: usize) -> Bin {
        match self.kind {
            Kind::Point { .. } => Bin::Value(index as u64),
            Kind::Cross { right, .. } => Bin::Pair(index as u64 / right, index as u64 % right),
        }
    }

    /// Returns true when this hit made the bin covered.
    fn hit(&mut self, index: usize) -> bool {
        let count = &mut self.hits[index];
        if *count >= self.at_least {
            return false;
        }
        *count += 1;
        if *count == self.at_least {
            self.covered += 1;
            return true;
        }
        false
    }

    fn percent(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.covered as f64 * 100.0 / self.total() as f64
    }

    fn snapshot(&self) -> DimensionSnapshot {
        let missing = self
            .hits
            .iter()
            .enumerate()
            .filter(|(_, count)| **count < self.at_least)
            .map(|(i, _)| self.bin(i))
            .collect();
        DimensionSnapshot {
            hit: self.covered,
            total: self.total(),
            coverage: self.percent(),
            missing,
        }
    }
}

type ThresholdCallback = Box<dyn FnOnce()>;

pub struct CoverageEngine {
    dims: IndexMap<String, Dimension>,
    primary: Option<String>,
    threshold: f64,
    callbacks: Vec<ThresholdCallback>,
    closed: bool,
    frozen: bool,
}

impl CoverageEngine {
    /// `threshold` is the closure percentage of the primary dimension.
    pub fn new(threshold: f64) -> TbResult<Self> {
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(TbError::Config(format!(
                "coverage threshold {} is outside (0, 100]",
                threshold
            )));
        }
        Ok(CoverageEngine {
            dims: IndexMap::new(),
            primary: None,
            threshold,
            callbacks: Vec::new(),
            closed: false,
            frozen: false,
        })
    }

    fn register(&mut self, name: &str, dim: Dimension) -> TbResult<()> {
        if self.dims.contains_key(name) {
            return Err(TbError::Coverage(format!("dimension '{}' registered twice", name)));
        }
        self.dims.insert(name.to_string(), dim);
        Ok(())
    }

    /// Point over the values `0..bins`.
    pub fn add_point(&mut self, name: &str, bins: u64, at_least: u32) -> TbResult<()> {
        if bins == 0 {
            return Err(TbError::Coverage(format!("dimension '{}' has no bins", name)));
        }
        self.register(name, Dimension::new(Kind::Point { bins }, at_least))
    }

    /// Cross over two registered points.
    pub fn add_cross(
        &mut self,
        name: &str,
        left: &str,
        right: &str,
        at_least: u32,
    ) -> TbResult<()> {
        let left = self.point_size(left)?;
        let right = self.point_size(right)?;
        self.register(name, Dimension::new(Kind::Cross { left, right }, at_least))
    }

    fn point_size(&self, name: &str) -> TbResult<u64> {
        match self.dims.get(name).map(|d| &d.kind) {
            Some(Kind::Point { bins }) => Ok(*bins),
            Some(Kind::Cross { .. }) => Err(TbError::Coverage(format!(
                "'{}' is a cross, crosses are built from points",
                name
            ))),
            None => Err(TbError::Coverage(format!("unknown dimension '{}'", name))),
        }
    }

    /// Dimension whose closure fires the threshold callbacks.
    pub fn set_primary(&mut self, name: &str) -> TbResult<()> {
        if !self.dims.contains_key(name) {
            return Err(TbError::Coverage(format!("unknown dimension '{}'", name)));
        }
        self.primary = Some(name.to_string());
        self.check_threshold();
        Ok(())
    }

    /// Runs `cb` once when the primary dimension reaches the threshold, or
    /// right away if it already has.
    pub fn on_threshold(&mut self, cb: impl FnOnce() + 'static) {
        if self.closed {
            cb();
        } else {
            self.callbacks.push(Box::new(cb));
        }
    }

    /// Record one hit. Returns whether the bin became covered by it.
    pub fn sample(&mut self, name: &str, bin: Bin) -> TbResult<bool> {
        if self.frozen {
            log::trace!("coverage finalized, ignoring {} on {}", bin, name);
            return Ok(false);
        }
        let dim = self
            .dims
            .get_mut(name)
            .ok_or_else(|| TbError::Coverage(format!("unknown dimension '{}'", name)))?;
        let index = dim
            .index(bin)
            .ok_or_else(|| TbError::Coverage(format!("bin {} is not part of '{}'", bin, name)))?;
        let newly = dim.hit(index);
        if newly && self.primary.as_deref() == Some(name) {
            self.check_threshold();
        }
        Ok(newly)
    }

    pub fn is_covered(&self, name: &str, bin: Bin) -> bool {
        self.dims
            .get(name)
            .and_then(|d| d.index(bin).map(|i| d.hits[i] >= d.at_least))
            .unwrap_or(false)
    }

    /// Closure of one dimension in percent.
    pub fn coverage(&self, name: &str) -> Option<f64> {
        self.dims.get(name).map(|d| d.percent())
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_threshold(&mut self) {
        if self.closed {
            return;
        }
        let reached = match self.primary.as_deref().and_then(|p| self.dims.get(p)) {
            Some(dim) => dim.percent() >= self.threshold,
            None => false,
        };
        if reached {
            self.closed = true;
            log::info!("coverage threshold of {}% reached", self.threshold);
            for cb in std::mem::take(&mut self.callbacks) {
                cb();
            }
        }
    }

    pub fn snapshot(&self) -> CoverageSnapshot {
        CoverageSnapshot {
            dimensions: self
                .dims
                .iter()
                .map(|(name, dim)| (name.clone(), dim.snapshot()))
                .collect(),
        }
    }

    /// Freeze the engine. Later samples are ignored.
    pub fn finalize(&mut self) -> CoverageSnapshot {
        self.frozen = true;
        self.callbacks.clear();
        self.snapshot()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionSnapshot {
    pub hit: usize,
    pub total: usize,
    pub coverage: f64,
    pub missing: Vec<Bin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CoverageSnapshot {
    dimensions: IndexMap<String, DimensionSnapshot>,
}

impl CoverageSnapshot {
    pub fn get(&self, name: &str) -> Option<&DimensionSnapshot> {
        self.dimensions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DimensionSnapshot)> {
        self.dimensions.iter()
    }

    pub fn to_json(&self) -> TbResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| TbError::Report(e.to_string()))
    }
}

/// Engine with the FIFO dimensions registered and the
/// `write_enable x data` cross as primary.
pub fn fifo_coverage(width: u32, threshold: f64) -> TbResult<CoverageEngine> {
    let mut cov = CoverageEngine::new(threshold)?;
    cov.add_point(DATA, 1 << width, 1)?;
    for name in [WRITE_ENABLE, READ_ENABLE, FULL, EMPTY, OVERFLOW, UNDERFLOW] {
        cov.add_point(name, 2, 1)?;
    }
    cov.add_cross(CROSS, WRITE_ENABLE, DATA, 1)?;
    cov.set_primary(CROSS)?;
    Ok(cov)
}

pub fn sample_write(cov: &mut CoverageEngine, obs: &WriteObservation) -> TbResult<()> {
    let wr = obs.write_enable as u64;
    cov.sample(WRITE_ENABLE, Bin::Value(wr))?;
    cov.sample(READ_ENABLE, Bin::Value(obs.read_enable as u64))?;
    cov.sample(DATA, Bin::Value(obs.data))?;
    cov.sample(FULL, Bin::Value(obs.full as u64))?;
    cov.sample(CROSS, Bin::Pair(wr, obs.data))?;
    Ok(())
}

pub fn sample_read(cov: &mut CoverageEngine, obs: &ReadObservation) -> TbResult<()> {
    cov.sample(EMPTY, Bin::Value(obs.empty as u64))?;
    cov.sample(OVERFLOW, Bin::Value(obs.result.overflow as u64))?;
    cov.sample(UNDERFLOW, Bin::Value(obs.result.underflow as u64))?;
    Ok(())
}

/// Collector loop sampling both observation topics.
pub async fn run_coverage(
    cov: TbObj<CoverageEngine>,
    writes: UnboundedReceiver<WriteObservation>,
    reads: UnboundedReceiver<ReadObservation>,
) -> TbResult<()> {
    let mut observations = merge_observations(writes, reads);
    while let Some(obs) = observations.next().await {
        match obs {
            Observation::Write(w) => sample_write(&mut cov.get_mut(), &w)?,
            Observation::Read(r) => sample_read(&mut cov.get_mut(), &r)?,
        }
    }
    Ok(())
}
