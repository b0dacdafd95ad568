mod common;

use common::directed;
use fifo_tb::dut::Mutation;
use fifo_tb::utils::{read_burst, write_burst};
use fifo_tb::TbError;

#[test]
fn full_fifo_rejects_writes() {
    let trace = directed(4, 4, Mutation::None, |bfm| async move {
        let seq = write_burst(&bfm, 0..16, 0).await?;
        let seq = write_burst(&bfm, [0xa, 0xb, 0xc], seq).await?;
        read_burst(&bfm, 16, seq).await?;
        Ok::<(), TbError>(())
    });
    assert!(trace.passed, "{:?}", trace.mismatches);

    let writes: Vec<_> = trace.writes().collect();
    assert_eq!(writes.len(), 19);
    for (i, (w, r)) in writes.iter().enumerate() {
        assert_eq!(r.result.overflow, i >= 16, "write {} data {:#x}", i, w.data);
        assert!(!r.result.underflow);
    }
    // full is sampled after the edge that stored the 16th word
    assert!(!writes[14].0.full);
    assert!(writes[15].0.full);

    // the rejected words never show up
    let out: Vec<u64> = trace.reads().map(|(_, r)| r.result.data_out).collect();
    assert_eq!(out, (0..16).collect::<Vec<u64>>());
}

#[test]
fn empty_fifo_underflows_and_holds_output() {
    let trace = directed(4, 4, Mutation::None, |bfm| async move {
        read_burst(&bfm, (1 << 4) + 100, 0).await?;
        Ok::<(), TbError>(())
    });
    assert!(trace.passed, "{:?}", trace.mismatches);
    let reads: Vec<_> = trace.reads().collect();
    assert_eq!(reads.len(), 116);
    for (_, r) in reads {
        assert!(r.result.underflow);
        assert_eq!(r.result.data_out, 0);
        assert!(r.empty);
    }
}

#[test]
fn reads_return_writes_in_order() {
    let values: Vec<u64> = vec![3, 14, 15, 9, 2, 6, 5, 0, 8, 1, 7, 12, 11, 4, 13, 10];
    let input = values.clone();
    let trace = directed(4, 4, Mutation::None, move |bfm| async move {
        let seq = write_burst(&bfm, input, 0).await?;
        read_burst(&bfm, 16, seq).await?;
        Ok::<(), TbError>(())
    });
    assert!(trace.passed, "{:?}", trace.mismatches);
    let out: Vec<u64> = trace.reads().map(|(_, r)| r.result.data_out).collect();
    assert_eq!(out, values);
    assert!(trace
        .pairs
        .iter()
        .all(|(_, r)| !r.result.overflow && !r.result.underflow));
}

#[test]
fn underflow_after_draining_keeps_last_word() {
    let trace = directed(4, 2, Mutation::None, |bfm| async move {
        let seq = write_burst(&bfm, [5, 6], 0).await?;
        read_burst(&bfm, 4, seq).await?;
        Ok::<(), TbError>(())
    });
    assert!(trace.passed, "{:?}", trace.mismatches);
    let reads: Vec<_> = trace.reads().map(|(_, r)| r.result).collect();
    assert_eq!(reads[0].data_out, 5);
    assert_eq!(reads[1].data_out, 6);
    assert!(reads[2].underflow && reads[3].underflow);
    assert_eq!(reads[3].data_out, 6);
}
