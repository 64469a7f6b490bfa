//! `cosh` over the default float range `[0, 1)`.

use opcheck::case::{CaseError, ParamSet, TestCase};
use opcheck::driver::{CheckConfig, OpTest, Suite};
use opcheck::error::InputError;
use opcheck::generator::{InputGenerator, RandomRange};
use opcheck::program::{Program, ProgramBuilder, ProgramError};
use opcheck::tensor::{DType, Feeds, TensorSpec};

use super::{case_tolerance, dtype_entry, Declared, CHECK_GRAD, DTYPE, MAX_RELATIVE_ERROR};

pub struct CoshTest;

impl OpTest for CoshTest {
    fn prepare_inputs(&self, case: &TestCase, inputs: &InputGenerator) -> Result<Feeds, InputError> {
        let dtype = case.dtype(DTYPE)?;
        let spec = TensorSpec::input("x", case.shape("x_shape")?, dtype);
        let x = inputs.tensor(&spec, RandomRange::default_for(dtype))?;
        let mut feeds = Feeds::new();
        feeds.insert(spec.name, x);
        Ok(feeds)
    }

    fn build_program(&self, case: &TestCase, feeds: &Feeds) -> Result<Program, ProgramError> {
        let x = &feeds["x"];
        let mut builder = ProgramBuilder::new(case.name());
        let input = builder.create_input(x.dtype(), x.shape(), "x")?;
        let out = builder.cosh(input)?;
        builder.build(&[out])
    }

    fn check_config(&self, case: &TestCase) -> Result<CheckConfig, CaseError> {
        let tolerance = case_tolerance(case, case.dtype(DTYPE)?)?;
        Ok(CheckConfig::tolerant(tolerance).with_gradients(case.flag_or(CHECK_GRAD, false)?))
    }
}

pub fn test_cosh_op_shape() -> Declared {
    let shapes: [&[i64]; 7] = [
        &[1],
        &[1024],
        &[1, 2048],
        &[1, 1, 1],
        &[32, 64],
        &[16, 8, 4, 2],
        &[16, 8, 4, 2, 1],
    ];
    let suite = Suite::new("TestCoshOpShape")
        .inputs(
            shapes
                .iter()
                .map(|dims| ParamSet::new().shape("x_shape", dims))
                .collect(),
        )
        .dtypes(vec![dtype_entry(DType::F32, true)]);
    Declared::new(suite, &CoshTest)
}

pub fn test_cosh_op_dtype() -> Declared {
    let suite = Suite::new("TestCoshOpDtype")
        .inputs(vec![ParamSet::new().shape("x_shape", &[32, 64])])
        .dtypes(vec![
            dtype_entry(DType::F16, false).float(MAX_RELATIVE_ERROR, 1e-3),
            dtype_entry(DType::F32, true),
            dtype_entry(DType::F64, true),
        ]);
    Declared::new(suite, &CoshTest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_precision_case_is_loose_and_skips_gradients() {
        let cases = test_cosh_op_dtype().suite.expand().unwrap();
        assert_eq!(cases.len(), 3);

        let half = CoshTest.check_config(&cases[0]).unwrap();
        assert_eq!(half.tolerance.rtol, 1e-3);
        assert!(!half.check_gradients);

        let double = CoshTest.check_config(&cases[2]).unwrap();
        assert_eq!(double.tolerance.rtol, 1e-5);
        assert!(double.check_gradients);
    }

    #[test]
    fn inputs_stay_in_unit_range() {
        let case = test_cosh_op_shape().suite.expand().unwrap().remove(1);
        let feeds = CoshTest
            .prepare_inputs(&case, &InputGenerator::new(5, case.name()))
            .unwrap();
        let x = feeds["x"].to_f64_vec();
        assert_eq!(x.len(), 1024);
        assert!(x.iter().all(|v| (0.0..1.0).contains(v)));
    }
}
