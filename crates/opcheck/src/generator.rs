//! Seeded random input generation.
//!
//! Every tensor is drawn from its own `StdRng` seeded with a value derived from the run seed, the
//! case name, and the slot name, so a case regenerates bit-identical inputs on every run no matter
//! which other cases were selected.

use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::error::InvalidShapeError;
use crate::tensor::{DType, Shape, TensorRole, TensorSpec, TensorValue};

/// Redraw budget per element before a range is declared unusable.
const MAX_DRAWS: usize = 64;

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    InvalidShape(#[from] InvalidShapeError),
    #[error("no usable {dtype} value in [{low}, {high}) (divisor: {divisor})")]
    EmptyRange {
        dtype: DType,
        low: f64,
        high: f64,
        divisor: bool,
    },
}

/// Half-open sampling range `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomRange {
    pub low: f64,
    pub high: f64,
}

impl RandomRange {
    pub const fn new(low: f64, high: f64) -> Self {
        RandomRange { low, high }
    }

    /// Floats default to `[0, 1)`, signed integers to `[-100, 100)`.
    pub fn default_for(dtype: DType) -> Self {
        if dtype.is_integer() {
            RandomRange::new(-100.0, 100.0)
        } else {
            RandomRange::new(0.0, 1.0)
        }
    }
}

/// Draws a tensor with values in `[low, high)`.
pub fn generate(
    shape: &[i64],
    dtype: DType,
    low: f64,
    high: f64,
    seed: u64,
) -> Result<TensorValue, GeneratorError> {
    let shape = Shape::new(shape)?;
    sample(&shape, dtype, RandomRange::new(low, high), false, seed)
}

/// Draws a tensor for `spec`. Divisor slots never receive zero.
pub fn generate_for(
    spec: &TensorSpec,
    range: RandomRange,
    seed: u64,
) -> Result<TensorValue, GeneratorError> {
    let divisor = spec.role == TensorRole::Divisor;
    sample(&spec.shape, spec.dtype, range, divisor, seed)
}

fn sample(
    shape: &Shape,
    dtype: DType,
    range: RandomRange,
    divisor: bool,
    seed: u64,
) -> Result<TensorValue, GeneratorError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let count = shape.num_elements();
    let empty = || GeneratorError::EmptyRange {
        dtype,
        low: range.low,
        high: range.high,
        divisor,
    };
    let value = match dtype {
        DType::F16 => {
            let values = draw_floats(&mut rng, count, range, divisor, |v| f16::from_f64(v).to_f64())
                .ok_or_else(empty)?;
            TensorValue::from_f16(shape.clone(), values.into_iter().map(f16::from_f64).collect())
        }
        DType::F32 => {
            let values = draw_floats(&mut rng, count, range, divisor, |v| v as f32 as f64)
                .ok_or_else(empty)?;
            TensorValue::from_f32(shape.clone(), values.into_iter().map(|v| v as f32).collect())
        }
        DType::F64 => {
            let values = draw_floats(&mut rng, count, range, divisor, |v| v).ok_or_else(empty)?;
            TensorValue::from_f64(shape.clone(), values)
        }
        DType::I32 => {
            let (lo, hi) = integer_bounds(range, i64::from(i32::MIN), i64::from(i32::MAX))
                .ok_or_else(empty)?;
            let values = draw_integers(&mut rng, count, lo, hi, divisor).ok_or_else(empty)?;
            TensorValue::from_i32(shape.clone(), values.into_iter().map(|v| v as i32).collect())
        }
        DType::I64 => {
            let (lo, hi) = integer_bounds(range, i64::MIN, i64::MAX).ok_or_else(empty)?;
            let values = draw_integers(&mut rng, count, lo, hi, divisor).ok_or_else(empty)?;
            TensorValue::from_i64(shape.clone(), values)
        }
        DType::Bool => {
            let values = (0..count).map(|_| divisor || rng.gen::<bool>()).collect();
            TensorValue::from_bool(shape.clone(), values)
        }
    };
    // Element counts come from `shape`, so construction cannot fail.
    value.map_err(|_| empty())
}

/// Samples in f64, rounds through `round`, and redraws anything the rounding pushed outside the
/// range (or onto zero for divisors).
fn draw_floats(
    rng: &mut StdRng,
    count: usize,
    range: RandomRange,
    divisor: bool,
    round: impl Fn(f64) -> f64,
) -> Option<Vec<f64>> {
    let RandomRange { low, high } = range;
    if !(low.is_finite() && high.is_finite() && low < high) {
        return None;
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let mut accepted = None;
        for _ in 0..MAX_DRAWS {
            let candidate = round(uniform(rng, low, high));
            if candidate >= low && candidate < high && !(divisor && candidate == 0.0) {
                accepted = Some(candidate);
                break;
            }
        }
        values.push(accepted?);
    }
    Some(values)
}

/// Uniform draw from `[low, high)`. Ranges wider than `f64::MAX` are sampled at half scale,
/// which doubles back exactly.
fn uniform(rng: &mut StdRng, low: f64, high: f64) -> f64 {
    if (high - low).is_finite() {
        rng.gen_range(low..high)
    } else {
        2.0 * rng.gen_range(low / 2.0..high / 2.0)
    }
}

/// Integer bounds `[lo, hi)` covering the integers of `range`, clipped to the dtype.
fn integer_bounds(range: RandomRange, min: i64, max: i64) -> Option<(i64, i64)> {
    if range.low.is_nan() || range.high.is_nan() {
        return None;
    }
    let lo = range.low.ceil().max(min as f64) as i64;
    let hi = range.high.ceil().min(max as f64 + 1.0);
    let hi = if hi >= i64::MAX as f64 { i64::MAX } else { hi as i64 };
    (lo < hi).then_some((lo, hi))
}

fn draw_integers(rng: &mut StdRng, count: usize, lo: i64, hi: i64, divisor: bool) -> Option<Vec<i64>> {
    if divisor && lo == 0 && hi == 1 {
        return None;
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let mut accepted = None;
        for _ in 0..MAX_DRAWS {
            let candidate = rng.gen_range(lo..hi);
            if !(divisor && candidate == 0) {
                accepted = Some(candidate);
                break;
            }
        }
        values.push(accepted?);
    }
    Some(values)
}

/// Mixes the run seed with FNV-1a hashes of the case and slot names.
pub fn derive_seed(run_seed: u64, case_name: &str, tensor_name: &str) -> u64 {
    let mut hash = FNV1A_OFFSET ^ run_seed;
    for byte in case_name
        .as_bytes()
        .iter()
        .chain(std::iter::once(&0u8))
        .chain(tensor_name.as_bytes())
    {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

/// Per-case view over the generator: derives slot seeds from the case name.
#[derive(Debug, Clone)]
pub struct InputGenerator {
    run_seed: u64,
    case_name: String,
}

impl InputGenerator {
    pub fn new(run_seed: u64, case_name: impl Into<String>) -> Self {
        InputGenerator {
            run_seed,
            case_name: case_name.into(),
        }
    }

    pub fn seed_for(&self, tensor_name: &str) -> u64 {
        derive_seed(self.run_seed, &self.case_name, tensor_name)
    }

    pub fn tensor(&self, spec: &TensorSpec, range: RandomRange) -> Result<TensorValue, GeneratorError> {
        generate_for(spec, range, self.seed_for(&spec.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bits() {
        let a = generate(&[4, 8], DType::F32, -1.0, 1.0, 7).unwrap();
        let b = generate(&[4, 8], DType::F32, -1.0, 1.0, 7).unwrap();
        let c = generate(&[4, 8], DType::F32, -1.0, 1.0, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn non_positive_dims_fail() {
        let err = generate(&[2, 0], DType::F32, 0.0, 1.0, 0).unwrap_err();
        assert!(matches!(
            err,
            GeneratorError::InvalidShape(InvalidShapeError::NonPositive { axis: 1, .. })
        ));
        assert!(generate(&[], DType::F32, 0.0, 1.0, 0).is_err());
    }

    #[test]
    fn divisor_integers_skip_zero() {
        let spec = TensorSpec::divisor("y", Shape::new(&[4096]).unwrap(), DType::I32);
        let value = generate_for(&spec, RandomRange::new(-2.0, 2.0), 3).unwrap();
        let values = value.as_i32().unwrap();
        assert!(values.iter().all(|&v| v != 0 && (-2..2).contains(&v)));
    }

    #[test]
    fn zero_only_divisor_range_is_empty() {
        let spec = TensorSpec::divisor("y", Shape::new(&[2]).unwrap(), DType::I64);
        let err = generate_for(&spec, RandomRange::new(0.0, 1.0), 3).unwrap_err();
        assert!(matches!(err, GeneratorError::EmptyRange { divisor: true, .. }));
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(generate(&[2], DType::F64, 1.0, 1.0, 0).is_err());
        assert!(generate(&[2], DType::I64, 5.0, -5.0, 0).is_err());
    }

    #[test]
    fn extreme_f64_range_does_not_overflow() {
        for (low, high) in [(-1e308, 1e308), (f64::MIN, f64::MAX)] {
            let value = generate(&[64], DType::F64, low, high, 11).unwrap();
            assert!(value.to_f64_vec().iter().all(|&v| v.is_finite() && v >= low && v < high));
        }
    }

    #[test]
    fn f16_rounding_never_reaches_high() {
        // Values just under 1.0 round to 1.0 in f16 and must be redrawn.
        let value = generate(&[8192], DType::F16, 0.999, 1.0, 11).unwrap();
        assert!(value.to_f64_vec().iter().all(|&v| (0.999..1.0).contains(&v)));
    }

    #[test]
    fn derived_seeds_depend_on_case_and_slot() {
        let gen = InputGenerator::new(2024, "TestModOpShapeTest_0");
        assert_ne!(gen.seed_for("x"), gen.seed_for("y"));
        assert_ne!(
            gen.seed_for("x"),
            InputGenerator::new(2024, "TestModOpShapeTest_1").seed_for("x")
        );
        assert_eq!(gen.seed_for("x"), derive_seed(2024, "TestModOpShapeTest_0", "x"));
    }
}
