//! This module is an integration test that checks how the explorer counts and
//! prunes the paths through hand-constructed programs.
#![cfg(test)]

use std::sync::{atomic::AtomicBool, Arc};

use token_defect_explorer::{error::execution::Error, listing, vm, watchdog::FlagWatchdog};

mod common;

#[test]
fn stack_underflow_ends_the_path() -> anyhow::Result<()> {
    let detector = common::new_detector_from_lines(&["PUSH1 0x01", "ADD", "STOP"]);
    let report = detector.analyze()?.into_report();

    // The failing path is still a path, and the analysis carries on
    assert_eq!(report.total_paths, 1);
    assert_eq!(report.error_paths, 1);
    assert_eq!(report.errors.len(), 1);
    let expected = Error::StackUnderflow {
        required:  2,
        available: 1,
    };
    assert_eq!(report.errors[0], format!("[0x0002]: {expected}"));

    // The `STOP` after the failure is never reached
    assert_eq!(report.evm_code_coverage, "66.7");

    Ok(())
}

#[test]
fn literal_true_condition_only_takes_the_jump() -> anyhow::Result<()> {
    let detector = common::new_detector_from_lines(&[
        "PUSH1 0x01",
        "PUSH1 0x06",
        "JUMPI",
        "STOP",
        "JUMPDEST",
        "STOP",
    ]);
    let report = detector.analyze()?.into_report();

    assert_eq!(report.total_paths, 1);
    assert_eq!(report.error_paths, 0);

    // Everything but the `STOP` at the fall-through is covered
    assert_eq!(report.instructions, "6");
    assert_eq!(report.evm_code_coverage, "83.3");
    assert_eq!(report.block_coverage, "66.7");

    Ok(())
}

#[test]
fn symbolic_conditions_fork_with_test_vectors() -> anyhow::Result<()> {
    let config = vm::Config::default().with_generate_test_cases(true);
    let detector = common::new_detector_from_lines_with(
        &["CALLDATASIZE", "PUSH1 0x05", "JUMPI", "STOP", "JUMPDEST", "STOP"],
        None,
        config,
    );
    let report = detector.analyze()?.into_report();

    assert_eq!(report.total_paths, 2);
    assert_eq!(report.evm_code_coverage, "100.0");
    assert_eq!(report.test_vectors.len(), 2);

    // The two paths need different call-data sizes
    let sizes: Vec<Option<&String>> =
        report.test_vectors.iter().map(|v| v.assignments.get("Id_size")).collect();
    assert!(sizes.iter().all(Option::is_some));
    assert_ne!(sizes[0], sizes[1]);

    Ok(())
}

#[test]
fn loops_are_bounded_by_the_loop_limit() -> anyhow::Result<()> {
    let config = vm::Config::default().with_loop_limit(3);
    let detector =
        common::new_detector_from_lines_with(&["JUMPDEST", "PUSH1 0x00", "JUMP"], None, config);
    let report = detector.analyze()?.into_report();

    assert_eq!(report.total_paths, 1);
    assert_eq!(report.error_paths, 0);
    assert!(!report.timed_out);

    Ok(())
}

#[test]
fn expired_deadline_reports_a_timeout() -> anyhow::Result<()> {
    let config = vm::Config::default()
        .with_loop_limit(100_000)
        .with_global_timeout(std::time::Duration::ZERO);
    let detector =
        common::new_detector_from_lines_with(&["JUMPDEST", "PUSH1 0x00", "JUMP"], None, config);
    let report = detector.analyze()?.into_report();

    assert!(report.timed_out);
    assert!(report.errors.is_empty());

    Ok(())
}

#[test]
fn raised_watchdog_flag_stops_the_analysis() -> anyhow::Result<()> {
    let flag = Arc::new(AtomicBool::new(true));
    let watchdog = FlagWatchdog::new(flag).polling_every(1).in_rc();
    let listing = listing!["JUMPDEST", "PUSH1 0x00", "JUMP"];
    let detector = token_defect_explorer::new(listing, None, vm::Config::default(), watchdog);
    let report = detector.analyze()?.into_report();

    assert!(report.timed_out);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0], format!("[0x0000]: {}", Error::StoppedByWatchdog));

    Ok(())
}
