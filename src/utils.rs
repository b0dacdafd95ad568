//! Directed sequences built on top of the adapter.

use crate::adapter::FifoBfm;
use crate::transaction::Transaction;
use crate::TbResult;

#[inline]
pub fn random_seed() -> u64 {
    rand::random::<u64>()
}

/// Write every value with reads disabled, one per write-clock cycle.
/// Returns the next free sequence number.
pub async fn write_burst(
    bfm: &FifoBfm,
    values: impl IntoIterator<Item = u64>,
    mut seq: u64,
) -> TbResult<u64> {
    for data in values {
        bfm.send(Transaction::new(true, false, data, seq)).await?;
        seq += 1;
    }
    Ok(seq)
}

/// `count` read-only cycles.
pub async fn read_burst(bfm: &FifoBfm, count: u64, mut seq: u64) -> TbResult<u64> {
    for _ in 0..count {
        bfm.send(Transaction::read_only(seq)).await?;
        seq += 1;
    }
    Ok(seq)
}
