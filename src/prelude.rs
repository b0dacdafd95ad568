pub use crate::adapter::FifoBfm;
pub use crate::coverage::{Bin, CoverageEngine, CoverageSnapshot};
pub use crate::dut::{FifoDut, Mutation};
pub use crate::env::{run, run_with_dut, sweep, FifoEnv, RunConfig, RunReport};
pub use crate::model::{Prediction, ReferenceModel, ReferenceQueue};
pub use crate::scoreboard::{Mismatch, Scoreboard};
pub use crate::signal::Signal;
pub use crate::sim::{Sim, SimHandle};
pub use crate::sim_if::{ClockSource, DualClock, SimIf};
pub use crate::transaction::{ObservedResult, ReadObservation, Transaction, WriteObservation};
pub use crate::{ClockDomain, TbError, TbObj, TbResult};
pub use futures::future::FutureExt;
