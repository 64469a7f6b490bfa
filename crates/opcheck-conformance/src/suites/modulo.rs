//! Floor `mod` with broadcasting. `y` is drawn as a divisor so it is never zero.

use opcheck::case::{CaseError, ParamSet, TestCase};
use opcheck::driver::{CheckConfig, OpTest, Suite};
use opcheck::error::InputError;
use opcheck::generator::{InputGenerator, RandomRange};
use opcheck::program::{Program, ProgramBuilder, ProgramError};
use opcheck::tensor::{DType, Feeds, TensorSpec};

use super::{case_tolerance, dtype_entry, Declared, CHECK_GRAD, DTYPE, MAX_RELATIVE_ERROR};

const DEFAULT_MAX_RELATIVE_ERROR: f64 = 1e-5;

const BASE_SHAPES: [&[i64]; 5] = [&[32], &[32, 64], &[2, 3, 4], &[16, 8, 4, 2], &[16, 8, 4, 2, 1]];

pub struct ModTest;

fn range(case: &TestCase, operand: &str) -> Result<RandomRange, CaseError> {
    let low = case.float_or(&format!("{operand}_low"), -100.0)?;
    let high = case.float_or(&format!("{operand}_high"), 100.0)?;
    Ok(RandomRange::new(low, high))
}

impl OpTest for ModTest {
    fn prepare_inputs(&self, case: &TestCase, inputs: &InputGenerator) -> Result<Feeds, InputError> {
        let dtype = case.dtype(DTYPE)?;
        let x = TensorSpec::input("x", case.shape("x_shape")?, dtype);
        let y = TensorSpec::divisor("y", case.shape("y_shape")?, dtype);
        let mut feeds = Feeds::new();
        feeds.insert(x.name.clone(), inputs.tensor(&x, range(case, "x")?)?);
        feeds.insert(y.name.clone(), inputs.tensor(&y, range(case, "y")?)?);
        Ok(feeds)
    }

    fn build_program(&self, case: &TestCase, feeds: &Feeds) -> Result<Program, ProgramError> {
        let (x, y) = (&feeds["x"], &feeds["y"]);
        let mut builder = ProgramBuilder::new(case.name());
        let lhs = builder.create_input(x.dtype(), x.shape(), "x")?;
        let rhs = builder.create_input(y.dtype(), y.shape(), "y")?;
        let out = builder.modulo(lhs, rhs)?;
        builder.build(&[out])
    }

    fn check_config(&self, case: &TestCase) -> Result<CheckConfig, CaseError> {
        let tolerance = case_tolerance(case, case.dtype(DTYPE)?)?;
        Ok(CheckConfig::tolerant(tolerance).with_gradients(case.flag_or(CHECK_GRAD, false)?))
    }
}

fn pair(x_shape: &[i64], y_shape: &[i64]) -> ParamSet {
    ParamSet::new().shape("x_shape", x_shape).shape("y_shape", y_shape)
}

fn same_shape(dims: &[i64]) -> ParamSet {
    pair(dims, dims)
}

fn ranges(y_low: f64, y_high: f64) -> ParamSet {
    ParamSet::new()
        .float("x_low", -100.0)
        .float("x_high", 100.0)
        .float("y_low", y_low)
        .float("y_high", y_high)
        .float(MAX_RELATIVE_ERROR, DEFAULT_MAX_RELATIVE_ERROR)
}

fn base(class_name: &str) -> Suite {
    Suite::new(class_name)
        .inputs(BASE_SHAPES.iter().map(|dims| same_shape(dims)).collect())
        .dtypes(vec![dtype_entry(DType::F32, true)])
        .attrs(vec![ranges(-100.0, 100.0)])
}

pub fn test_mod_op_shape() -> Declared {
    let shapes: [&[i64]; 13] = [
        &[32],
        &[32, 64],
        &[2, 3, 4],
        &[16, 8, 4, 2],
        &[16, 8, 4, 1024],
        &[16, 8, 4, 2, 1],
        &[1, 1, 1, 1, 1],
        &[1],
        &[1024],
        &[2048],
        &[32768],
        &[65536],
        &[131072],
    ];
    let suite = base("TestModOpShapeTest")
        .inputs(shapes.iter().map(|dims| same_shape(dims)).collect());
    Declared::new(suite, &ModTest)
}

/// Half precision and the integer dtypes skip gradient comparison.
pub fn test_mod_op_dtype() -> Declared {
    // attrs overlay dtypes, so these attrs carry no tolerance.
    let suite = base("TestModOpDtypeTest")
        .dtypes(vec![
            dtype_entry(DType::F16, false).float(MAX_RELATIVE_ERROR, 1e-3),
            dtype_entry(DType::I32, false),
            dtype_entry(DType::I64, false),
            dtype_entry(DType::F32, true),
            dtype_entry(DType::F64, true),
        ])
        .attrs(vec![ParamSet::new()
            .float("x_low", -100.0)
            .float("x_high", 100.0)
            .float("y_low", -100.0)
            .float("y_high", 100.0)]);
    Declared::new(suite, &ModTest)
}

pub fn test_mod_op_polarity() -> Declared {
    let suite = base("TestModOpPolarityTest").attrs(vec![ranges(-100.0, -1.0), ranges(1.0, 100.0)]);
    Declared::new(suite, &ModTest)
}

pub fn test_mod_op_broadcast() -> Declared {
    let pairs: [(&[i64], &[i64]); 21] = [
        (&[32], &[1]),
        (&[1], &[32]),
        (&[1, 64], &[32, 1]),
        (&[1, 64], &[32, 64]),
        (&[32, 1], &[32, 64]),
        (&[1, 1], &[32, 64]),
        (&[1, 3, 4], &[2, 3, 4]),
        (&[1, 3, 1], &[2, 3, 4]),
        (&[1, 1, 1], &[2, 3, 4]),
        (&[2, 1, 1], &[1, 3, 4]),
        (&[1, 8, 4, 2], &[16, 8, 4, 2]),
        (&[16, 8, 1, 1], &[16, 8, 4, 2]),
        (&[1, 8, 1, 1], &[16, 8, 4, 2]),
        (&[1, 1, 1, 1], &[16, 8, 4, 2]),
        (&[1, 8, 1, 2], &[16, 1, 4, 1]),
        (&[1, 8, 4, 2, 32], &[16, 8, 4, 2, 32]),
        (&[16, 1, 1, 2, 32], &[16, 8, 4, 2, 32]),
        (&[16, 1, 4, 1, 1], &[16, 8, 4, 2, 32]),
        (&[1, 1, 1, 1, 32], &[16, 8, 4, 2, 32]),
        (&[1, 1, 1, 1, 1], &[16, 8, 4, 2, 32]),
        (&[16, 1, 4, 1, 32], &[1, 8, 1, 2, 1]),
    ];
    let suite = base("TestModOpBroadcastTest")
        .inputs(pairs.iter().map(|(x, y)| pair(x, y)).collect());
    Declared::new(suite, &ModTest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_cases_draw_one_signed_divisor() {
        let cases = test_mod_op_polarity().suite.expand().unwrap();
        assert_eq!(cases.len(), 10);
        for case in &cases {
            let feeds = ModTest
                .prepare_inputs(case, &InputGenerator::new(3, case.name()))
                .unwrap();
            let y = feeds["y"].to_f64_vec();
            let negative = case.float("y_high").unwrap() < 0.0;
            assert!(y.iter().all(|&v| v != 0.0 && (v < 0.0) == negative), "{case}");
        }
    }

    #[test]
    fn dtype_suite_tolerances() {
        let cases = test_mod_op_dtype().suite.expand().unwrap();
        // Inputs outer, dtypes inner: the first five cases share the first shape.
        let rtols: Vec<f64> = cases[..5]
            .iter()
            .map(|case| ModTest.check_config(case).unwrap().tolerance.rtol)
            .collect();
        assert_eq!(rtols, vec![1e-3, 1e-5, 1e-5, 1e-5, 1e-5]);
        let grads: Vec<bool> = cases[..5]
            .iter()
            .map(|case| ModTest.check_config(case).unwrap().check_gradients)
            .collect();
        assert_eq!(grads, vec![false, false, false, true, true]);
    }

    #[test]
    fn broadcast_pairs_build_broadcast_outputs() {
        let case = test_mod_op_broadcast().suite.expand().unwrap().remove(20);
        let feeds = ModTest
            .prepare_inputs(&case, &InputGenerator::new(9, case.name()))
            .unwrap();
        let program = ModTest.build_program(&case, &feeds).unwrap();
        let out = program.output_types().unwrap().remove(0);
        assert_eq!(out.shape.dims(), &[16, 8, 4, 2, 32]);
    }
}
