//! Output comparison: exact bit equality or bounded relative error.

use std::fmt;

use tracing::debug;

use crate::backend::GradientMap;
use crate::error::ShapeMismatchError;
use crate::tensor::{DType, TensorValue};

pub const DEFAULT_RTOL: f64 = 1e-5;
pub const F16_RTOL: f64 = 1e-3;
/// Floor for the relative-error denominator.
pub const DEFAULT_EPSILON: f64 = 1e-12;
/// Mismatching element offsets kept per output.
pub const MAX_REPORTED_INDICES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareMode {
    /// Bit-for-bit equality.
    AllEqual,
    /// Per-element relative error `|a - b| / max(|a|, epsilon)` bounded by `rtol`.
    Tolerant,
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareMode::AllEqual => "all_equal",
            CompareMode::Tolerant => "tolerant",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    /// Optional bound on `|a - b|`, checked in addition to `rtol`.
    pub atol: Option<f64>,
    pub epsilon: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            rtol: DEFAULT_RTOL,
            atol: None,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl Tolerance {
    pub fn relative(rtol: f64) -> Self {
        Tolerance {
            rtol,
            ..Tolerance::default()
        }
    }

    /// Default tolerance for outputs of `dtype`.
    pub fn for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::F16 => Tolerance::relative(F16_RTOL),
            _ => Tolerance::default(),
        }
    }

    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = Some(atol);
        self
    }
}

/// Outcome for one output pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub matched: bool,
    pub max_relative_error: f64,
    pub max_absolute_error: f64,
    /// First mismatching flat offsets; `None` when matched.
    pub mismatched_indices: Option<Vec<usize>>,
    pub mismatch_count: usize,
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "matched={} max_rel={:.3e} max_abs={:.3e}",
            self.matched, self.max_relative_error, self.max_absolute_error
        )?;
        if let Some(indices) = &self.mismatched_indices {
            write!(f, " mismatches={} first={indices:?}", self.mismatch_count)?;
        }
        Ok(())
    }
}

/// Compares matched-order output lists.
///
/// Output count, shape, or dtype differences are errors rather than numeric mismatches.
pub fn compare(
    reference: &[TensorValue],
    candidate: &[TensorValue],
    mode: CompareMode,
    tolerance: &Tolerance,
) -> Result<Vec<ComparisonResult>, ShapeMismatchError> {
    if reference.len() != candidate.len() {
        return Err(ShapeMismatchError::OutputCount {
            reference: reference.len(),
            candidate: candidate.len(),
        });
    }
    reference
        .iter()
        .zip(candidate.iter())
        .enumerate()
        .map(|(index, (lhs, rhs))| compare_pair(index, lhs, rhs, mode, tolerance))
        .collect()
}

/// Compares gradients correlated by input name.
pub fn compare_gradients(
    reference: &GradientMap,
    candidate: &GradientMap,
    mode: CompareMode,
    tolerance: &Tolerance,
) -> Result<Vec<(String, ComparisonResult)>, ShapeMismatchError> {
    if let Some(name) = candidate.keys().find(|name| !reference.contains_key(*name)) {
        return Err(ShapeMismatchError::MissingGradient {
            name: name.clone(),
            side: "reference",
        });
    }
    let mut results = Vec::with_capacity(reference.len());
    for (index, (name, lhs)) in reference.iter().enumerate() {
        let rhs = candidate
            .get(name)
            .ok_or_else(|| ShapeMismatchError::MissingGradient {
                name: name.clone(),
                side: "candidate",
            })?;
        results.push((name.clone(), compare_pair(index, lhs, rhs, mode, tolerance)?));
    }
    Ok(results)
}

fn compare_pair(
    index: usize,
    reference: &TensorValue,
    candidate: &TensorValue,
    mode: CompareMode,
    tolerance: &Tolerance,
) -> Result<ComparisonResult, ShapeMismatchError> {
    if reference.shape() != candidate.shape() {
        return Err(ShapeMismatchError::Shape {
            index,
            reference: reference.shape().dims().to_vec(),
            candidate: candidate.shape().dims().to_vec(),
        });
    }
    if reference.dtype() != candidate.dtype() {
        return Err(ShapeMismatchError::DType {
            index,
            reference: reference.dtype(),
            candidate: candidate.dtype(),
        });
    }

    let (lhs, rhs) = (reference.data(), candidate.data());
    let mut max_relative_error = 0.0f64;
    let mut max_absolute_error = 0.0f64;
    let mut mismatched = Vec::new();
    let mut mismatch_count = 0usize;
    for idx in 0..reference.len() {
        let (abs, rel) = element_error(lhs.get_f64(idx), rhs.get_f64(idx), tolerance.epsilon);
        max_absolute_error = max_absolute_error.max(abs);
        max_relative_error = max_relative_error.max(rel);
        let ok = match mode {
            CompareMode::AllEqual => lhs.element_bits(idx) == rhs.element_bits(idx),
            CompareMode::Tolerant => {
                rel <= tolerance.rtol && tolerance.atol.map_or(true, |atol| abs <= atol)
            }
        };
        if !ok {
            mismatch_count += 1;
            if mismatched.len() < MAX_REPORTED_INDICES {
                mismatched.push(idx);
            }
        }
    }
    let matched = mismatch_count == 0;
    debug!(
        output = index,
        ?mode,
        max_relative_error,
        max_absolute_error,
        mismatch_count,
        "compared"
    );
    Ok(ComparisonResult {
        matched,
        max_relative_error,
        max_absolute_error,
        mismatched_indices: (!matched).then_some(mismatched),
        mismatch_count,
    })
}

/// Absolute and relative error of one element pair. NaN matches NaN and equal infinities
/// match; anything else non-finite is an infinite error.
fn element_error(a: f64, b: f64, epsilon: f64) -> (f64, f64) {
    if a.is_nan() || b.is_nan() {
        return if a.is_nan() && b.is_nan() {
            (0.0, 0.0)
        } else {
            (f64::INFINITY, f64::INFINITY)
        };
    }
    if a == b {
        return (0.0, 0.0);
    }
    let abs = (a - b).abs();
    if !abs.is_finite() {
        return (f64::INFINITY, f64::INFINITY);
    }
    (abs, abs / a.abs().max(epsilon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Shape;

    fn f32s(dims: &[i64], values: &[f32]) -> TensorValue {
        TensorValue::from_f32(Shape::new(dims).unwrap(), values.to_vec()).unwrap()
    }

    #[test]
    fn all_equal_flags_single_differing_bit() {
        let a = f32s(&[4], &[1.0, 2.0, 3.0, 4.0]);
        let b = f32s(&[4], &[1.0, 2.0, f32::from_bits(3.0f32.to_bits() + 1), 4.0]);
        let results = compare(&[a.clone()], &[b], CompareMode::AllEqual, &Tolerance::default())
            .unwrap();
        assert!(!results[0].matched);
        assert_eq!(results[0].mismatched_indices, Some(vec![2]));

        let results = compare(&[a.clone()], &[a], CompareMode::AllEqual, &Tolerance::default())
            .unwrap();
        assert!(results[0].matched);
        assert_eq!(results[0].mismatched_indices, None);
    }

    #[test]
    fn all_equal_distinguishes_signed_zero() {
        let a = f32s(&[1], &[0.0]);
        let b = f32s(&[1], &[-0.0]);
        let results = compare(&[a.clone()], &[b.clone()], CompareMode::AllEqual, &Tolerance::default())
            .unwrap();
        assert!(!results[0].matched);
        let results = compare(&[a], &[b], CompareMode::Tolerant, &Tolerance::default()).unwrap();
        assert!(results[0].matched);
    }

    #[test]
    fn tolerant_reports_max_error_on_success() {
        let a = f32s(&[3], &[100.0, 1.0, -2.0]);
        let b = f32s(&[3], &[100.0001, 1.0, -2.0]);
        let results = compare(&[a], &[b], CompareMode::Tolerant, &Tolerance::relative(1e-5)).unwrap();
        assert!(results[0].matched);
        assert!(results[0].max_relative_error > 0.0);
        assert!(results[0].max_relative_error <= 1e-5);
        assert!(results[0].max_absolute_error > 0.0);
    }

    #[test]
    fn tolerant_fails_past_rtol() {
        let a = f32s(&[2], &[1.0, 2.0]);
        let b = f32s(&[2], &[1.0, 2.01]);
        let results = compare(&[a], &[b], CompareMode::Tolerant, &Tolerance::default()).unwrap();
        assert!(!results[0].matched);
        assert_eq!(results[0].mismatch_count, 1);
        assert!((results[0].max_relative_error - 0.005).abs() < 1e-6);
    }

    #[test]
    fn atol_is_checked_alongside_rtol() {
        let a = f32s(&[1], &[1000.0]);
        let b = f32s(&[1], &[1000.001]);
        let loose = Tolerance::relative(1e-5);
        assert!(compare(&[a.clone()], &[b.clone()], CompareMode::Tolerant, &loose).unwrap()[0].matched);
        let strict = loose.with_atol(1e-4);
        assert!(!compare(&[a], &[b], CompareMode::Tolerant, &strict).unwrap()[0].matched);
    }

    #[test]
    fn nan_and_infinity_handling() {
        let a = f32s(&[3], &[f32::NAN, f32::INFINITY, 1.0]);
        let b = f32s(&[3], &[f32::NAN, f32::INFINITY, f32::NAN]);
        let results = compare(&[a], &[b], CompareMode::Tolerant, &Tolerance::default()).unwrap();
        assert!(!results[0].matched);
        assert_eq!(results[0].mismatched_indices, Some(vec![2]));
        assert!(results[0].max_relative_error.is_infinite());
    }

    #[test]
    fn shape_count_and_dtype_differences_are_errors() {
        let a = f32s(&[2, 3], &[0.0; 6]);
        let b = f32s(&[3, 2], &[0.0; 6]);
        assert!(matches!(
            compare(&[a.clone()], &[b], CompareMode::Tolerant, &Tolerance::default()),
            Err(ShapeMismatchError::Shape { index: 0, .. })
        ));
        assert!(matches!(
            compare(&[a.clone()], &[], CompareMode::AllEqual, &Tolerance::default()),
            Err(ShapeMismatchError::OutputCount { reference: 1, candidate: 0 })
        ));
        let c = TensorValue::full(Shape::new(&[2, 3]).unwrap(), DType::F64, 0.0);
        assert!(matches!(
            compare(&[a], &[c], CompareMode::Tolerant, &Tolerance::default()),
            Err(ShapeMismatchError::DType { .. })
        ));
    }

    #[test]
    fn gradients_correlate_by_name() {
        let mut reference = GradientMap::new();
        reference.insert("x".to_string(), f32s(&[2], &[1.0, 2.0]));
        reference.insert("y".to_string(), f32s(&[1], &[3.0]));
        let mut candidate = reference.clone();
        candidate.insert("y".to_string(), f32s(&[1], &[3.5]));
        let results =
            compare_gradients(&reference, &candidate, CompareMode::Tolerant, &Tolerance::default())
                .unwrap();
        assert_eq!(results[0].0, "x");
        assert!(results[0].1.matched);
        assert_eq!(results[1].0, "y");
        assert!(!results[1].1.matched);

        candidate.remove("y");
        assert!(matches!(
            compare_gradients(&reference, &candidate, CompareMode::Tolerant, &Tolerance::default()),
            Err(ShapeMismatchError::MissingGradient { side: "candidate", .. })
        ));
    }

    #[test]
    fn f16_default_is_looser() {
        assert_eq!(Tolerance::for_dtype(DType::F16).rtol, F16_RTOL);
        assert_eq!(Tolerance::for_dtype(DType::F32).rtol, DEFAULT_RTOL);
    }
}
