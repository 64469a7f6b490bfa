//! Operator suites. Each public function returns one test class ready for the driver.

pub mod cosh;
pub mod modulo;
pub mod roll;

use opcheck::case::{CaseError, ParamSet, ParamValue, TestCase};
use opcheck::compare::Tolerance;
use opcheck::driver::{OpTest, Suite};
use opcheck::error::InputError;
use opcheck::generator::{InputGenerator, RandomRange};
use opcheck::tensor::{DType, TensorSpec, TensorValue};

use crate::common;

/// A suite declaration together with the operator glue that runs its cases.
pub struct Declared {
    pub suite: Suite,
    pub op: &'static (dyn OpTest + Sync),
}

impl Declared {
    pub fn new(suite: Suite, op: &'static (dyn OpTest + Sync)) -> Self {
        Declared { suite, op }
    }
}

/// Every shipped suite in declaration order.
pub fn all() -> Vec<Declared> {
    vec![
        roll::test_roll_op(),
        roll::test_roll_case1(),
        roll::test_roll_case2(),
        roll::test_roll_case3(),
        roll::test_roll_case4(),
        roll::test_roll_case5(),
        roll::test_roll_case6(),
        roll::test_roll_axes_empty(),
        cosh::test_cosh_op_shape(),
        cosh::test_cosh_op_dtype(),
        modulo::test_mod_op_shape(),
        modulo::test_mod_op_dtype(),
        modulo::test_mod_op_polarity(),
        modulo::test_mod_op_broadcast(),
    ]
}

pub(crate) const DTYPE: &str = "dtype";
pub(crate) const CHECK_GRAD: &str = "check_grad";
pub(crate) const MAX_RELATIVE_ERROR: &str = "max_relative_error";

pub(crate) fn dtype_entry(dtype: DType, check_grad: bool) -> ParamSet {
    ParamSet::new()
        .dtype(DTYPE, dtype)
        .flag(CHECK_GRAD, check_grad)
}

/// Tolerance for a tolerant-mode case: dtype default, overridden by the case's
/// `max_relative_error` and then by the conformance rule file.
pub(crate) fn case_tolerance(case: &TestCase, dtype: DType) -> Result<Tolerance, CaseError> {
    let declared = match case.params().get(MAX_RELATIVE_ERROR) {
        Some(_) => Some(case.float(MAX_RELATIVE_ERROR)?),
        None => None,
    };
    Ok(common::resolve_tolerance(case.name(), dtype, declared))
}

/// Uses the literal `<name>_data` values when the case declares them, otherwise draws a tensor.
pub(crate) fn literal_or_random(
    case: &TestCase,
    inputs: &InputGenerator,
    spec: &TensorSpec,
    range: RandomRange,
) -> Result<TensorValue, InputError> {
    let key = format!("{}_data", spec.name);
    let values: Vec<f64> = match case.params().get(&key) {
        None => return Ok(inputs.tensor(spec, range)?),
        Some(ParamValue::IntList(values)) => values.iter().map(|&v| v as f64).collect(),
        Some(ParamValue::FloatList(values)) => values.clone(),
        Some(other) => {
            return Err(InputError::Literal {
                name: spec.name.clone(),
                message: format!("expected a list of numbers, found {other:?}"),
            })
        }
    };
    if values.len() != spec.shape.num_elements() {
        return Err(InputError::Literal {
            name: spec.name.clone(),
            message: format!("{} values do not fill shape {}", values.len(), spec.shape),
        });
    }
    TensorValue::from_f64_as(spec.shape.clone(), spec.dtype, &values).map_err(|message| {
        InputError::Literal {
            name: spec.name.clone(),
            message,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_suite_expands() {
        let mut total = 0;
        for declared in all() {
            let cases = declared.suite.expand().unwrap();
            assert!(!cases.is_empty(), "{}", declared.suite.class_name());
            total += cases.len();
        }
        // 8 roll + 10 cosh + 13 + 25 + 10 + 21 mod
        assert_eq!(total, 87);
    }

    #[test]
    fn class_names_are_unique() {
        let mut names: Vec<String> = all()
            .iter()
            .map(|declared| declared.suite.class_name().to_string())
            .collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn literal_inputs_are_used_verbatim() {
        let declared = roll::test_roll_op();
        let case = declared.suite.expand().unwrap().remove(0);
        let spec = TensorSpec::input("x", case.shape("x_shape").unwrap(), DType::F32);
        let generator = InputGenerator::new(7, case.name());
        let value =
            literal_or_random(&case, &generator, &spec, RandomRange::default_for(DType::F32)).unwrap();
        assert_eq!(value.as_f32().unwrap(), &[1.0, 2.0, 3.0]);
    }
}
