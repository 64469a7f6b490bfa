//! Eager host implementations of the operators, evaluated directly on tensor handles.
//!
//! Float math runs in f64 and is rounded once into the operand dtype.

use std::sync::Arc;

use half::f16;
use opcheck::backend::{BackendError, BackendResult};
use opcheck::broadcast::broadcast_dims;
use opcheck::program::{RollPlan, RollSpec};
use opcheck::tensor::{compute_strides, DType, Shape, TensorData, TensorValue};

/// Handle to a host tensor owned by the reference backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RefTensor {
    value: TensorValue,
}

impl RefTensor {
    pub fn value(&self) -> &TensorValue {
        &self.value
    }

    pub fn into_value(self) -> TensorValue {
        self.value
    }

    pub fn shape(&self) -> &Shape {
        self.value.shape()
    }

    pub fn dtype(&self) -> DType {
        self.value.dtype()
    }

    fn from_parts(shape: Shape, data: TensorData) -> BackendResult<Self> {
        TensorValue::new(shape, data)
            .map(|value| RefTensor { value })
            .map_err(BackendError::execution)
    }
}

/// Wraps a host value without copying its buffer.
pub fn to_tensor(value: &TensorValue) -> RefTensor {
    RefTensor {
        value: value.clone(),
    }
}

/// Rotates `x` along `axis` by `shifts`; empty `axis` rolls the flattened tensor.
pub fn roll(x: &RefTensor, shifts: &[i64], axis: &[i64]) -> BackendResult<RefTensor> {
    let spec = RollSpec {
        shifts: shifts.to_vec(),
        axis: axis.to_vec(),
    };
    let plan = spec.plan(x.shape().dims())?;
    let sources = roll_sources(x.shape().dims(), &plan);
    let data = gather(x.value.data(), &sources);
    RefTensor::from_parts(x.shape().clone(), data)
}

/// Source offset for every output offset of a roll.
pub(crate) fn roll_sources(dims: &[usize], plan: &RollPlan) -> Vec<usize> {
    let total: usize = dims.iter().product();
    match plan {
        RollPlan::Flat(shift) => (0..total).map(|idx| (idx + total - shift) % total).collect(),
        RollPlan::Axes(shifts) => {
            let strides = compute_strides(dims);
            MultiIndex::new(dims)
                .map(|coords| {
                    coords
                        .iter()
                        .zip(dims.iter())
                        .zip(shifts.iter())
                        .zip(strides.iter())
                        .map(|(((&coord, &dim), &shift), &stride)| {
                            ((coord + dim - shift) % dim) * stride
                        })
                        .sum()
                })
                .collect()
        }
    }
}

fn gather(data: &TensorData, sources: &[usize]) -> TensorData {
    fn pick<T: Copy>(values: &[T], sources: &[usize]) -> Arc<[T]> {
        sources.iter().map(|&src| values[src]).collect()
    }
    match data {
        TensorData::F16(values) => TensorData::F16(pick(values, sources)),
        TensorData::F32(values) => TensorData::F32(pick(values, sources)),
        TensorData::F64(values) => TensorData::F64(pick(values, sources)),
        TensorData::I32(values) => TensorData::I32(pick(values, sources)),
        TensorData::I64(values) => TensorData::I64(pick(values, sources)),
        TensorData::Bool(values) => TensorData::Bool(pick(values, sources)),
    }
}

/// Element-wise hyperbolic cosine.
pub fn cosh(x: &RefTensor) -> BackendResult<RefTensor> {
    let data = match x.value.data() {
        TensorData::F16(values) => {
            TensorData::F16(values.iter().map(|v| f16::from_f64(v.to_f64().cosh())).collect())
        }
        TensorData::F32(values) => {
            TensorData::F32(values.iter().map(|&v| (v as f64).cosh() as f32).collect())
        }
        TensorData::F64(values) => TensorData::F64(values.iter().map(|v| v.cosh()).collect()),
        other => return Err(BackendError::unsupported_dtype("cosh", other.dtype())),
    };
    RefTensor::from_parts(x.shape().clone(), data)
}

/// Floor modulo with broadcasting; the result has the sign of `y`.
pub fn modulo(x: &RefTensor, y: &RefTensor) -> BackendResult<RefTensor> {
    if x.dtype() != y.dtype() {
        return Err(BackendError::execution(format!(
            "mod operands differ in dtype: {} vs {}",
            x.dtype(),
            y.dtype()
        )));
    }
    let out_dims = broadcast_dims(x.shape().dims(), y.shape().dims())
        .map_err(|err| BackendError::execution(err.to_string()))?;
    let out_shape =
        Shape::from_dims(&out_dims).map_err(|err| BackendError::execution(err.to_string()))?;
    let lhs = broadcast_offsets(x.shape().dims(), &out_dims);
    let rhs = broadcast_offsets(y.shape().dims(), &out_dims);

    let data = match (x.value.data(), y.value.data()) {
        (TensorData::F16(a), TensorData::F16(b)) => TensorData::F16(
            lhs.iter()
                .zip(rhs.iter())
                .map(|(&i, &j)| f16::from_f64(floor_mod_f64(a[i].to_f64(), b[j].to_f64())))
                .collect(),
        ),
        (TensorData::F32(a), TensorData::F32(b)) => TensorData::F32(
            lhs.iter()
                .zip(rhs.iter())
                .map(|(&i, &j)| floor_mod_f64(a[i] as f64, b[j] as f64) as f32)
                .collect(),
        ),
        (TensorData::F64(a), TensorData::F64(b)) => TensorData::F64(
            lhs.iter()
                .zip(rhs.iter())
                .map(|(&i, &j)| floor_mod_f64(a[i], b[j]))
                .collect(),
        ),
        (TensorData::I32(a), TensorData::I32(b)) => {
            let values = lhs
                .iter()
                .zip(rhs.iter())
                .map(|(&i, &j)| floor_mod_i64(i64::from(a[i]), i64::from(b[j])).map(|v| v as i32))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(integer_division_by_zero)?;
            TensorData::I32(values.into())
        }
        (TensorData::I64(a), TensorData::I64(b)) => {
            let values = lhs
                .iter()
                .zip(rhs.iter())
                .map(|(&i, &j)| floor_mod_i64(a[i], b[j]))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(integer_division_by_zero)?;
            TensorData::I64(values.into())
        }
        (other, _) => return Err(BackendError::unsupported_dtype("mod", other.dtype())),
    };
    RefTensor::from_parts(out_shape, data)
}

fn integer_division_by_zero() -> BackendError {
    BackendError::execution("integer mod by zero")
}

pub(crate) fn floor_mod_f64(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn floor_mod_i64(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let r = a.wrapping_rem(b);
    Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
}

/// Flat source offset for every output offset when `src` is broadcast to `out`.
pub(crate) fn broadcast_offsets(src: &[usize], out: &[usize]) -> Vec<usize> {
    let pad = out.len() - src.len();
    let strides = compute_strides(src);
    MultiIndex::new(out)
        .map(|coords| {
            coords[pad..]
                .iter()
                .zip(src.iter())
                .zip(strides.iter())
                .map(|((&coord, &dim), &stride)| if dim == 1 { 0 } else { coord * stride })
                .sum()
        })
        .collect()
}

/// Row-major walk over every coordinate of a shape.
pub(crate) struct MultiIndex {
    shape: Vec<usize>,
    current: Vec<usize>,
    first: bool,
}

impl MultiIndex {
    pub(crate) fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            current: vec![0; shape.len()],
            first: true,
        }
    }
}

impl Iterator for MultiIndex {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first {
            self.first = false;
            if self.shape.iter().any(|&dim| dim == 0) {
                return None;
            }
            return Some(self.current.clone());
        }
        for i in (0..self.current.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.shape[i] {
                return Some(self.current.clone());
            }
            self.current[i] = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_tensor(dims: &[i64], values: &[f32]) -> RefTensor {
        to_tensor(&TensorValue::from_f32(Shape::new(dims).unwrap(), values.to_vec()).unwrap())
    }

    fn f32_values(tensor: &RefTensor) -> Vec<f32> {
        tensor.value().as_f32().unwrap().to_vec()
    }

    #[test]
    fn roll_matches_numpy() {
        let x = f32_tensor(&[3], &[1.0, 2.0, 3.0]);
        assert_eq!(f32_values(&roll(&x, &[1], &[0]).unwrap()), vec![3.0, 1.0, 2.0]);
        assert_eq!(f32_values(&roll(&x, &[-1], &[]).unwrap()), vec![2.0, 3.0, 1.0]);

        let x = f32_tensor(&[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(
            f32_values(&roll(&x, &[1], &[1]).unwrap()),
            vec![2.0, 0.0, 1.0, 5.0, 3.0, 4.0]
        );
        assert_eq!(
            f32_values(&roll(&x, &[1, 121], &[0, -1]).unwrap()),
            vec![5.0, 3.0, 4.0, 2.0, 0.0, 1.0]
        );
        assert_eq!(
            f32_values(&roll(&x, &[2], &[]).unwrap()),
            vec![4.0, 5.0, 0.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn cosh_is_even() {
        let x = f32_tensor(&[3], &[0.0, 0.5, -0.5]);
        let out = f32_values(&cosh(&x).unwrap());
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], out[2]);
        assert!((out[1] - 1.127_626).abs() < 1e-6);
    }

    #[test]
    fn modulo_follows_divisor_sign() {
        let x = f32_tensor(&[4], &[7.0, -7.0, 7.0, -7.0]);
        let y = f32_tensor(&[4], &[3.0, 3.0, -3.0, -3.0]);
        assert_eq!(f32_values(&modulo(&x, &y).unwrap()), vec![1.0, 2.0, -2.0, -1.0]);
    }

    #[test]
    fn modulo_broadcasts() {
        let x = f32_tensor(&[2, 1], &[5.0, -5.0]);
        let y = f32_tensor(&[3], &[2.0, 3.0, 4.0]);
        let out = modulo(&x, &y).unwrap();
        assert_eq!(out.shape().dims(), &[2, 3]);
        assert_eq!(f32_values(&out), vec![1.0, 2.0, 1.0, 1.0, 1.0, 3.0]);
    }

    #[test]
    fn integer_modulo_by_zero_errors() {
        let shape = Shape::new(&[2]).unwrap();
        let x = to_tensor(&TensorValue::from_i64(shape.clone(), vec![5, 6]).unwrap());
        let y = to_tensor(&TensorValue::from_i64(shape, vec![-4, 0]).unwrap());
        assert!(modulo(&x, &y).is_err());
        assert_eq!(floor_mod_i64(5, -4), Some(-3));
        assert_eq!(floor_mod_i64(i64::MIN, -1), Some(0));
    }

    #[test]
    fn to_tensor_shares_the_buffer() {
        let value = TensorValue::from_f32(Shape::new(&[2]).unwrap(), vec![1.0, 2.0]).unwrap();
        assert!(to_tensor(&value).value().shares_buffer(&value));
    }
}
