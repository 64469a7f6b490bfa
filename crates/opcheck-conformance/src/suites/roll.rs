//! `roll`: outputs are a pure permutation, so both backends must agree bit for bit.

use opcheck::case::{CaseError, ParamSet, TestCase};
use opcheck::driver::{CheckConfig, OpTest, Suite};
use opcheck::error::InputError;
use opcheck::generator::{InputGenerator, RandomRange};
use opcheck::program::{Program, ProgramBuilder, ProgramError};
use opcheck::tensor::{DType, Feeds, TensorSpec};

use super::{dtype_entry, literal_or_random, Declared, CHECK_GRAD, DTYPE};

pub struct RollTest;

impl OpTest for RollTest {
    fn prepare_inputs(&self, case: &TestCase, inputs: &InputGenerator) -> Result<Feeds, InputError> {
        let dtype = case.dtype(DTYPE)?;
        let spec = TensorSpec::input("x", case.shape("x_shape")?, dtype);
        let x = literal_or_random(case, inputs, &spec, RandomRange::default_for(dtype))?;
        let mut feeds = Feeds::new();
        feeds.insert(spec.name, x);
        Ok(feeds)
    }

    fn build_program(&self, case: &TestCase, feeds: &Feeds) -> Result<Program, ProgramError> {
        let shifts = case.ints("shifts").map_err(invalid_attribute)?;
        let axis = case.ints("axis").map_err(invalid_attribute)?;
        let x = &feeds["x"];
        let mut builder = ProgramBuilder::new(case.name());
        let input = builder.create_input(x.dtype(), x.shape(), "x")?;
        let out = builder.roll(input, &shifts, &axis)?;
        builder.build(&[out])
    }

    /// `shifts` and `axis` are declaration parameters: a case missing either aborts the suite.
    fn check_config(&self, case: &TestCase) -> Result<CheckConfig, CaseError> {
        case.ints("shifts")?;
        case.ints("axis")?;
        Ok(CheckConfig::all_equal().with_gradients(case.flag_or(CHECK_GRAD, false)?))
    }
}

fn invalid_attribute(err: CaseError) -> ProgramError {
    ProgramError::InvalidAttribute {
        op: "roll",
        message: err.to_string(),
    }
}

fn roll_suite(class_name: &str, x_shape: &[i64], axis: &[i64], shifts: &[i64]) -> Suite {
    Suite::new(class_name)
        .inputs(vec![ParamSet::new()
            .shape("x_shape", x_shape)
            .ints("axis", axis)
            .ints("shifts", shifts)])
        .dtypes(vec![dtype_entry(DType::F32, true)])
}

fn with_literal_x(suite: Suite) -> Suite {
    suite.attrs(vec![ParamSet::new().ints("x_data", &[1, 2, 3])])
}

pub fn test_roll_op() -> Declared {
    Declared::new(with_literal_x(roll_suite("TestRollOp", &[3], &[0], &[1])), &RollTest)
}

pub fn test_roll_case1() -> Declared {
    Declared::new(roll_suite("TestRollCase1", &[1, 2, 3], &[1], &[3]), &RollTest)
}

pub fn test_roll_case2() -> Declared {
    Declared::new(roll_suite("TestRollCase2", &[1], &[0], &[2]), &RollTest)
}

pub fn test_roll_case3() -> Declared {
    Declared::new(
        roll_suite("TestRollCase3", &[1, 2, 3], &[0, 1, 2, -1], &[3, 4, 10, 3]),
        &RollTest,
    )
}

pub fn test_roll_case4() -> Declared {
    Declared::new(roll_suite("TestRollCase4", &[1, 2, 3], &[0, 1], &[3, -8]), &RollTest)
}

pub fn test_roll_case5() -> Declared {
    Declared::new(roll_suite("TestRollCase5", &[1, 2, 3], &[1], &[121]), &RollTest)
}

pub fn test_roll_case6() -> Declared {
    Declared::new(
        roll_suite("TestRollCase6", &[10, 2, 3], &[1, 2], &[121, 122]),
        &RollTest,
    )
}

/// Empty `axis` flattens, rolls, and restores the shape.
pub fn test_roll_axes_empty() -> Declared {
    Declared::new(
        with_literal_x(roll_suite("TestRollAxesEmpty", &[3], &[], &[1])),
        &RollTest,
    )
}
