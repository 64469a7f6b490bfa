//! Sequences expansion, input generation, dual execution, and comparison for a suite.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{OpBackend, Target};
use crate::case::{expand, CaseError, CaseFilter, ParamSet, TestCase};
use crate::compare::{compare, compare_gradients, CompareMode, ComparisonResult, Tolerance};
use crate::env;
use crate::error::{
    BackendExecutionError, HarnessError, InputError, InvalidShapeError, ShapeMismatchError,
};
use crate::executor::DualExecutor;
use crate::generator::InputGenerator;
use crate::program::{Program, ProgramError};
use crate::tensor::Feeds;

/// What a suite needs from the environment before any of its cases can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Host,
    Accelerator,
}

/// How one case's outputs are judged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckConfig {
    pub mode: CompareMode,
    pub tolerance: Tolerance,
    /// Compare input gradients as well as outputs. Off unless a case asks for it.
    pub check_gradients: bool,
}

impl CheckConfig {
    pub fn all_equal() -> Self {
        CheckConfig {
            mode: CompareMode::AllEqual,
            tolerance: Tolerance::default(),
            check_gradients: false,
        }
    }

    pub fn tolerant(tolerance: Tolerance) -> Self {
        CheckConfig {
            mode: CompareMode::Tolerant,
            tolerance,
            check_gradients: false,
        }
    }

    pub fn with_gradients(mut self, enabled: bool) -> Self {
        self.check_gradients = enabled;
        self
    }
}

/// Operator-specific glue: inputs, program, and comparison settings for a case.
pub trait OpTest {
    fn prepare_inputs(&self, case: &TestCase, inputs: &InputGenerator) -> Result<Feeds, InputError>;

    fn build_program(&self, case: &TestCase, feeds: &Feeds) -> Result<Program, ProgramError>;

    fn check_config(&self, case: &TestCase) -> Result<CheckConfig, CaseError>;
}

/// Declaration of one test class: three parameter lists expanded into cases.
#[derive(Debug, Clone)]
pub struct Suite {
    class_name: String,
    inputs: Vec<ParamSet>,
    dtypes: Vec<ParamSet>,
    attrs: Vec<ParamSet>,
    requires: Capability,
}

impl Suite {
    pub fn new(class_name: impl Into<String>) -> Self {
        Suite {
            class_name: class_name.into(),
            inputs: Vec::new(),
            dtypes: Vec::new(),
            attrs: Vec::new(),
            requires: Capability::Host,
        }
    }

    pub fn inputs(mut self, inputs: Vec<ParamSet>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn dtypes(mut self, dtypes: Vec<ParamSet>) -> Self {
        self.dtypes = dtypes;
        self
    }

    pub fn attrs(mut self, attrs: Vec<ParamSet>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.requires = capability;
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn capability(&self) -> Capability {
        self.requires
    }

    pub fn expand(&self) -> Result<Vec<TestCase>, InvalidShapeError> {
        expand(&self.class_name, &self.inputs, &self.dtypes, &self.attrs)
    }
}

/// Settings fixed before the first case runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub seed: u64,
    pub filter: CaseFilter,
    pub target: Target,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            seed: env::DEFAULT_SEED,
            filter: CaseFilter::All,
            target: Target::Host,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Self {
        RunConfig {
            seed: env::seed(),
            filter: env::case_filter(),
            target: env::target(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaseFailure {
    #[error(transparent)]
    Backend(#[from] BackendExecutionError),
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),
    #[error("program construction failed: {0}")]
    Program(#[from] ProgramError),
    #[error("{}", describe_numeric(.outputs, .gradients))]
    Numeric {
        outputs: Vec<ComparisonResult>,
        gradients: Vec<(String, ComparisonResult)>,
    },
}

fn describe_numeric(outputs: &[ComparisonResult], gradients: &[(String, ComparisonResult)]) -> String {
    let mut parts = Vec::new();
    for (index, result) in outputs.iter().enumerate() {
        if !result.matched {
            parts.push(format!("output {index}: {result}"));
        }
    }
    for (name, result) in gradients {
        if !result.matched {
            parts.push(format!("gradient {name}: {result}"));
        }
    }
    format!("numeric mismatch ({})", parts.join("; "))
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseStatus {
    Passed,
    Failed(CaseFailure),
}

#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub name: String,
    pub params: ParamSet,
    pub status: CaseStatus,
    /// Largest relative error over outputs and gradients, when comparison ran.
    pub max_relative_error: Option<f64>,
    pub elapsed: Duration,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}

#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub class_name: String,
    pub outcomes: Vec<CaseOutcome>,
    /// Set when the capability guard skipped the whole suite.
    pub skipped: Option<String>,
    /// Cases excluded by the case filter.
    pub filtered: usize,
}

impl SuiteReport {
    pub fn failures(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed())
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.passed()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Turns any failed case into an error naming every failing case.
    pub fn into_result(self) -> Result<SuiteReport, SuiteFailure> {
        let failures: Vec<(String, String)> = self
            .failures()
            .map(|outcome| match &outcome.status {
                CaseStatus::Failed(failure) => (
                    outcome.name.clone(),
                    format!("{failure} params={}", outcome.params),
                ),
                CaseStatus::Passed => (outcome.name.clone(), String::new()),
            })
            .collect();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(SuiteFailure {
                class_name: self.class_name,
                total: self.outcomes.len(),
                failures,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteFailure {
    pub class_name: String,
    pub total: usize,
    pub failures: Vec<(String, String)>,
}

impl fmt::Display for SuiteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} of {} cases failed",
            self.class_name,
            self.failures.len(),
            self.total
        )?;
        for (name, reason) in &self.failures {
            write!(f, "\n  {name}: {reason}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SuiteFailure {}

/// Runs suites case by case against a reference and a candidate backend.
pub struct Driver<R, C> {
    executor: DualExecutor<R, C>,
    config: RunConfig,
}

impl<R: OpBackend, C: OpBackend> Driver<R, C> {
    pub fn new(executor: DualExecutor<R, C>, config: RunConfig) -> Self {
        Driver { executor, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Evaluated once per suite: returns why the suite cannot run here, if it cannot.
    pub fn skip_reason(&self, capability: Capability) -> Option<String> {
        let target = match capability {
            Capability::Host => Target::Host,
            Capability::Accelerator => {
                if self.config.target != Target::Accelerator {
                    return Some(format!(
                        "requires an accelerator target, configured target is {}",
                        self.config.target
                    ));
                }
                Target::Accelerator
            }
        };
        let reference = self.executor.reference();
        let candidate = self.executor.candidate();
        for (name, supported) in [
            (reference.backend_name(), reference.supports(target)),
            (candidate.backend_name(), candidate.supports(target)),
        ] {
            if !supported {
                return Some(format!("backend `{name}` does not support target {target}"));
            }
        }
        None
    }

    /// Expands `suite`, applies the capability guard and case filter, then runs every selected
    /// case in declaration order. Declaration errors abort; case failures are recorded.
    pub fn run(&self, suite: &Suite, op: &dyn OpTest) -> Result<SuiteReport, HarnessError> {
        let cases = suite.expand()?;
        let mut report = SuiteReport {
            class_name: suite.class_name().to_string(),
            outcomes: Vec::new(),
            skipped: None,
            filtered: 0,
        };
        if let Some(reason) = self.skip_reason(suite.capability()) {
            info!(class = suite.class_name(), %reason, "skipping suite");
            report.skipped = Some(reason);
            return Ok(report);
        }

        for case in &cases {
            if !self.config.filter.matches(case) {
                report.filtered += 1;
                continue;
            }
            info!(
                class = case.class_name(),
                case = case.name(),
                params = %case.params(),
                "running case"
            );
            let start = Instant::now();
            let (status, max_relative_error) = self.run_case(case, op)?;
            let elapsed = start.elapsed();
            match &status {
                CaseStatus::Passed => debug!(case = case.name(), ?max_relative_error, "case passed"),
                CaseStatus::Failed(failure) => warn!(
                    case = case.name(),
                    params = %case.params(),
                    error = %failure,
                    "case failed"
                ),
            }
            report.outcomes.push(CaseOutcome {
                name: case.name().to_string(),
                params: case.params().clone(),
                status,
                max_relative_error,
                elapsed,
            });
        }
        Ok(report)
    }

    fn run_case(
        &self,
        case: &TestCase,
        op: &dyn OpTest,
    ) -> Result<(CaseStatus, Option<f64>), HarnessError> {
        let check = op
            .check_config(case)
            .map_err(|source| HarnessError::Declaration {
                case: case.name().to_string(),
                source,
            })?;
        let generator = InputGenerator::new(self.config.seed, case.name());
        let feeds = op
            .prepare_inputs(case, &generator)
            .map_err(|source| HarnessError::Input {
                case: case.name().to_string(),
                source,
            })?;

        let program = match op.build_program(case, &feeds) {
            Ok(program) => program,
            Err(err) => return Ok((CaseStatus::Failed(err.into()), None)),
        };
        debug!(case = case.name(), "program:\n{program}");

        let outputs = match self
            .executor
            .execute(&program, &feeds, check.check_gradients)
        {
            Ok(outputs) => outputs,
            Err(err) => return Ok((CaseStatus::Failed(err.into()), None)),
        };

        let results = match compare(
            &outputs.reference,
            &outputs.candidate,
            check.mode,
            &check.tolerance,
        ) {
            Ok(results) => results,
            Err(err) => return Ok((CaseStatus::Failed(err.into()), None)),
        };
        let gradients = match (&outputs.reference_grads, &outputs.candidate_grads) {
            (Some(reference), Some(candidate)) => {
                match compare_gradients(reference, candidate, check.mode, &check.tolerance) {
                    Ok(results) => results,
                    Err(err) => return Ok((CaseStatus::Failed(err.into()), None)),
                }
            }
            _ => Vec::new(),
        };

        let max_relative_error = results
            .iter()
            .chain(gradients.iter().map(|(_, result)| result))
            .map(|result| result.max_relative_error)
            .fold(0.0f64, f64::max);
        let matched = results.iter().all(|result| result.matched)
            && gradients.iter().all(|(_, result)| result.matched);
        let status = if matched {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed(CaseFailure::Numeric {
                outputs: results,
                gradients,
            })
        };
        Ok((status, Some(max_relative_error)))
    }
}
