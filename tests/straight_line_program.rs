//! This module is an integration test that checks the analysis of programs
//! that do nothing a token would, and so cannot exhibit any of the defects.
#![cfg(test)]

use token_defect_explorer::defect::SignalStatus;

mod common;

#[test]
fn analyses_straight_line_program() -> anyhow::Result<()> {
    let detector = common::new_detector_from_lines(&["PUSH1 0x01", "PUSH1 0x02", "ADD", "STOP"]);
    let report = detector.analyze()?.into_report();

    // A single path runs every instruction
    assert_eq!(report.total_paths, 1);
    assert_eq!(report.error_paths, 0);
    assert_eq!(report.instructions, "4");
    assert_eq!(report.evm_code_coverage, "100.0");
    assert_eq!(report.block_coverage, "100.0");
    assert!(report.errors.is_empty());
    assert!(!report.timed_out);

    // Nothing captured an owner, so the owner-based signals cannot be decided
    assert!(!report.has_defects());
    assert_eq!(
        report.findings.unrestricted_from_and_owner_inconsistency.status,
        SignalStatus::OwnerUnresolved
    );
    assert_eq!(report.findings.privileged_address.status, SignalStatus::OwnerUnresolved);
    assert_eq!(report.findings.empty_transfer_event.status, SignalStatus::Clean);

    Ok(())
}

#[test]
fn reports_serialize_to_the_result_record() -> anyhow::Result<()> {
    let detector = common::new_detector_from_lines(&["PUSH1 0x01", "PUSH1 0x02", "ADD", "STOP"]);
    let report = detector.analyze()?.into_report();

    let json: serde_json::Value = serde_json::from_str(&report.to_json()?)?;
    assert_eq!(json["instructions"], "4");
    assert_eq!(json["evm_code_coverage"], "100.0");
    assert_eq!(json["bool_defect"]["privileged_address"], false);
    assert_eq!(json["bool_defect"]["unrestricted_from_and_owner_inconsistency"], false);
    assert_eq!(json["bool_defect"]["empty_transfer_event"], false);
    assert!(json["analysis"]["empty_transfer_event"].as_array().is_some_and(Vec::is_empty));
    assert!(json["time"].as_str().is_some_and(|t| t.parse::<f64>().is_ok()));

    Ok(())
}

#[test]
fn repeated_analyses_agree() -> anyhow::Result<()> {
    let lines = ["CALLDATASIZE", "PUSH1 0x05", "JUMPI", "STOP", "JUMPDEST", "STOP"];
    let first = common::new_detector_from_lines(&lines).analyze()?.into_report();
    let second = common::new_detector_from_lines(&lines).analyze()?.into_report();

    assert_eq!(first, second);
    assert_eq!(first.total_paths, 2);

    Ok(())
}
