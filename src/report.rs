//! This module contains the output of an analysis: the result record and the
//! test vectors derived from the paths that were explored.

use std::{collections::BTreeMap, fmt::Write as _, path::Path, time::Duration};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use z3::{ast::BV, Model};

use crate::{
    defect::{DefectKind, Findings},
    error::execution,
    vm::{value::u256_from_bv, Coverage},
};

/// Whether each defect was found, keyed as in the result record.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DefectFlags {
    pub privileged_address:                        bool,
    pub unrestricted_from_and_owner_inconsistency: bool,
    pub empty_transfer_event:                      bool,
}

/// The `function:detail` entries explaining each defect.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DefectEntries {
    pub privileged_address:                        Vec<String>,
    pub unrestricted_from_and_owner_inconsistency: Vec<String>,
    pub empty_transfer_event:                      Vec<String>,
}

/// The result record of analysing one contract.
///
/// Reports compare equal when they differ only in the time that the analysis
/// took.
#[derive(Clone, Debug, Derivative, Deserialize, Serialize)]
#[derivative(PartialEq)]
pub struct AnalysisReport {
    /// The percentage of instructions executed on some path, to one decimal
    /// place.
    pub evm_code_coverage: String,

    /// The number of instructions in the program.
    pub instructions: String,

    /// The wall-clock time taken, in seconds.
    #[derivative(PartialEq = "ignore")]
    pub time: String,

    pub bool_defect: DefectFlags,
    pub analysis:    DefectEntries,

    /// The settled outcome of each defect signal.
    pub findings: Findings,

    /// Whether exploration was cut short, in which case the report covers only
    /// what was explored before that.
    pub timed_out: bool,

    pub total_paths:    usize,
    pub error_paths:    usize,
    pub block_coverage: String,

    /// The errors that ended individual paths, each prefixed with its program
    /// counter.
    pub errors: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_vectors: Vec<TestVector>,
}

/// What an exploration produced, from which the report is built.
#[derive(Debug)]
pub struct ExplorationSummary<'a> {
    pub findings:     Findings,
    pub coverage:     &'a Coverage,
    pub errors:       &'a execution::Errors,
    pub test_vectors: Vec<TestVector>,

    /// The number of instructions and blocks in the program.
    pub instruction_count: usize,
    pub block_count:       usize,

    pub elapsed:   Duration,
    pub timed_out: bool,
}

impl AnalysisReport {
    /// Builds the report from the `summary` of an exploration.
    #[must_use]
    pub fn new(summary: ExplorationSummary<'_>) -> Self {
        let mut bool_defect = DefectFlags::default();
        let mut analysis = DefectEntries::default();
        for kind in DefectKind::ALL {
            let record = summary.findings.record(kind);
            let (flag, entries) = match kind {
                DefectKind::PrivilegedAddress => {
                    (&mut bool_defect.privileged_address, &mut analysis.privileged_address)
                }
                DefectKind::UnrestrictedFromAndOwnerInconsistency => (
                    &mut bool_defect.unrestricted_from_and_owner_inconsistency,
                    &mut analysis.unrestricted_from_and_owner_inconsistency,
                ),
                DefectKind::EmptyTransferEvent => {
                    (&mut bool_defect.empty_transfer_event, &mut analysis.empty_transfer_event)
                }
            };
            *flag = record.is_found();
            entries.clone_from(&record.entries);
        }

        let coverage = summary.coverage;
        Self {
            evm_code_coverage: percentage(coverage.visited_pcs.len(), summary.instruction_count),
            instructions: summary.instruction_count.to_string(),
            time: summary.elapsed.as_secs_f64().to_string(),
            bool_defect,
            analysis,
            findings: summary.findings,
            timed_out: summary.timed_out,
            total_paths: coverage.total_paths,
            error_paths: coverage.error_paths,
            block_coverage: percentage(coverage.visited_blocks.len(), summary.block_count),
            errors: summary.errors.payloads().iter().map(ToString::to_string).collect(),
            test_vectors: summary.test_vectors,
        }
    }

    /// Checks whether any of the defects was found.
    #[must_use]
    pub fn has_defects(&self) -> bool {
        self.findings.any_found()
    }

    /// Renders the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the report cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Renders `part` as a percentage of `whole` to one decimal place, or `0/0`
/// when there is nothing to cover.
fn percentage(part: usize, whole: usize) -> String {
    if whole == 0 {
        return "0/0".to_string();
    }
    #[allow(clippy::cast_precision_loss)] // Counts of instructions are small
    let ratio = part as f64 / whole as f64 * 100.0;
    format!("{ratio:.1}")
}

/// An assignment of values to the variables of one path that drives execution
/// down that path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestVector {
    pub assignments: BTreeMap<String, String>,
}

impl TestVector {
    /// Reads the values of `variables` out of `model`.
    ///
    /// Variables that the model leaves unconstrained are not part of the
    /// vector.
    #[must_use]
    pub fn from_model<'ctx>(model: &Model<'ctx>, variables: &BTreeMap<String, BV<'ctx>>) -> Self {
        let assignments = variables
            .iter()
            .filter_map(|(name, var)| {
                let value = model.eval(var, false).as_ref().and_then(u256_from_bv)?;
                Some((name.clone(), value.to_string()))
            })
            .collect();
        Self { assignments }
    }

    /// Checks whether the vector assigns no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Renders the vector as one `name = value` line per variable.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = String::new();
        for (name, value) in &self.assignments {
            let _ = writeln!(rendered, "{name} = {value}");
        }
        rendered
    }

    /// Writes the vector to `test<index>.otest` in `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the file cannot be written.
    pub fn write_to(&self, directory: impl AsRef<Path>, index: usize) -> std::io::Result<()> {
        let path = directory.as_ref().join(format!("test{index}.otest"));
        std::fs::write(path, self.render())
    }
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeMap, time::Duration};

    use z3::{
        ast::{Ast, BV},
        Config,
        Context,
        SatResult,
        Solver,
    };

    use crate::{
        defect::{Findings, SignalStatus},
        error::execution::{self, Error},
        report::{percentage, AnalysisReport, ExplorationSummary, TestVector},
        vm::Coverage,
    };

    #[test]
    fn reports_flag_found_defects() -> anyhow::Result<()> {
        let mut findings = Findings::default();
        findings.empty_transfer_event.add("mint(uint256):standard1");
        findings.privileged_address.settle(SignalStatus::OwnerUnresolved);

        let mut coverage = Coverage::default();
        coverage.visited_pcs.extend([0, 2, 4]);
        coverage.visited_blocks.insert(0);
        coverage.total_paths = 2;
        let mut errors = execution::Errors::new();
        errors.add_located(4, Error::UnresolvedJump);

        let report = AnalysisReport::new(ExplorationSummary {
            findings,
            coverage: &coverage,
            errors: &errors,
            test_vectors: Vec::new(),
            instruction_count: 4,
            block_count: 2,
            elapsed: Duration::from_millis(1_500),
            timed_out: false,
        });

        assert!(report.has_defects());
        assert!(report.bool_defect.empty_transfer_event);
        assert!(!report.bool_defect.privileged_address);
        assert_eq!(report.analysis.empty_transfer_event, vec!["mint(uint256):standard1"]);
        assert_eq!(report.evm_code_coverage, "75.0");
        assert_eq!(report.block_coverage, "50.0");
        assert_eq!(report.instructions, "4");
        assert_eq!(report.time, "1.5");
        assert_eq!(report.errors.len(), 1);

        let json: serde_json::Value = serde_json::from_str(&report.to_json()?)?;
        assert_eq!(json["bool_defect"]["empty_transfer_event"], true);
        assert_eq!(json["findings"]["privileged_address"]["status"], "owner_unresolved");
        assert!(json.get("test_vectors").is_none());

        Ok(())
    }

    #[test]
    fn empty_programs_have_no_coverage() {
        assert_eq!(percentage(0, 0), "0/0");
        assert_eq!(percentage(1, 3), "33.3");
    }

    #[test]
    fn test_vectors_come_from_models() -> anyhow::Result<()> {
        let ctx = Context::new(&Config::new());
        let solver = Solver::new(&ctx);
        let size = BV::new_const(&ctx, "Id_size", 256);
        let unused = BV::new_const(&ctx, "IH_c", 256);
        solver.assert(&size._eq(&BV::from_u64(&ctx, 68, 256)));
        assert_eq!(solver.check(), SatResult::Sat);
        let model = solver.get_model().ok_or_else(|| anyhow::anyhow!("no model"))?;

        let variables =
            BTreeMap::from([("Id_size".to_string(), size), ("IH_c".to_string(), unused)]);
        let vector = TestVector::from_model(&model, &variables);
        assert_eq!(vector.assignments.len(), 1);
        assert_eq!(vector.render(), "Id_size = 68\n");

        let directory = std::env::temp_dir().join("token-defect-explorer-vectors");
        std::fs::create_dir_all(&directory)?;
        vector.write_to(&directory, 3)?;
        assert_eq!(std::fs::read_to_string(directory.join("test3.otest"))?, "Id_size = 68\n");

        Ok(())
    }
}
