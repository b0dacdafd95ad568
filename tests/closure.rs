use fifo_tb::coverage::{Bin, CROSS, UNDERFLOW};
use fifo_tb::env::{run, sweep, RunConfig};
use fifo_tb::TbError;
use proptest::prelude::*;

#[test]
fn closes_for_several_widths() {
    for width in [4, 6, 8] {
        let report = run(&RunConfig::new(width, 4).with_seed(42)).unwrap();
        assert!(report.passed(), "width {}: {:?}", width, report.mismatches);
        let cross = report.coverage.get(CROSS).unwrap();
        assert_eq!(cross.total, 2 << width);
        assert_eq!(cross.hit, cross.total);
        assert!(cross.missing.is_empty());
        assert!(report.random_transactions <= 2 << width);
    }
}

#[test]
fn underflow_phase_hits_the_underflow_bin() {
    let report = run(&RunConfig::new(3, 3).with_seed(9)).unwrap();
    assert!(report.passed());
    let underflow = report.coverage.get(UNDERFLOW).unwrap();
    assert!(!underflow.missing.contains(&Bin::Value(1)));
}

#[test]
fn sweep_runs_each_width() {
    let base = RunConfig::new(1, 1).with_seed(3);
    let results = sweep(&base, &[2, 3]);
    assert_eq!(results.len(), 2);
    for (config, result) in results {
        assert_eq!(config.width, config.depth);
        assert!(result.unwrap().passed());
    }
}

#[test]
fn time_limit_stops_the_run() {
    let mut config = RunConfig::new(8, 8).with_seed(1);
    config.time_limit_ps = Some(1_000_000);
    assert!(matches!(run(&config), Err(TbError::Timeout { .. })));
}

#[test]
fn invalid_config_is_rejected_before_simulating() {
    assert!(matches!(run(&RunConfig::new(21, 4)), Err(TbError::Config(_))));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn any_seed_reaches_closure(seed in any::<u64>(), width in 1u32..6) {
        let report = run(&RunConfig::new(width, 2).with_seed(seed)).unwrap();
        prop_assert!(report.closed);
        prop_assert!(report.passed(), "{:?}", report.mismatches);
    }
}
