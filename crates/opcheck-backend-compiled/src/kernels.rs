//! Typed host kernels. Arithmetic runs in the operand's working precision; `float16` is
//! widened to `f32` for the computation and narrowed once at the end.

use std::sync::Arc;

use half::f16;
use opcheck::backend::{BackendError, BackendResult};
use opcheck::tensor::TensorData;

use crate::lower::{BinaryKernel, RollKernel};

pub fn roll(kernel: &RollKernel, data: &TensorData) -> TensorData {
    match data {
        TensorData::F16(values) => TensorData::F16(kernel.apply(values).into()),
        TensorData::F32(values) => TensorData::F32(kernel.apply(values).into()),
        TensorData::F64(values) => TensorData::F64(kernel.apply(values).into()),
        TensorData::I32(values) => TensorData::I32(kernel.apply(values).into()),
        TensorData::I64(values) => TensorData::I64(kernel.apply(values).into()),
        TensorData::Bool(values) => TensorData::Bool(kernel.apply(values).into()),
    }
}

fn cosh_f32(x: f32) -> f32 {
    (x.exp() + (-x).exp()) * 0.5
}

fn cosh_f64(x: f64) -> f64 {
    (x.exp() + (-x).exp()) * 0.5
}

pub fn cosh(data: &TensorData) -> BackendResult<TensorData> {
    Ok(match data {
        TensorData::F16(values) => TensorData::F16(
            values
                .iter()
                .map(|x| f16::from_f32(cosh_f32(x.to_f32())))
                .collect(),
        ),
        TensorData::F32(values) => TensorData::F32(values.iter().map(|&x| cosh_f32(x)).collect()),
        TensorData::F64(values) => TensorData::F64(values.iter().map(|&x| cosh_f64(x)).collect()),
        other => return Err(BackendError::unsupported_dtype("cosh", other.dtype())),
    })
}

/// `grad * sinh(x)`.
pub fn cosh_backward(x: &TensorData, grad: &TensorData) -> BackendResult<TensorData> {
    Ok(match (x, grad) {
        (TensorData::F16(x), TensorData::F16(g)) => TensorData::F16(
            x.iter()
                .zip(g.iter())
                .map(|(x, g)| f16::from_f32(g.to_f32() * x.to_f32().sinh()))
                .collect(),
        ),
        (TensorData::F32(x), TensorData::F32(g)) => {
            TensorData::F32(x.iter().zip(g.iter()).map(|(x, g)| g * x.sinh()).collect())
        }
        (TensorData::F64(x), TensorData::F64(g)) => {
            TensorData::F64(x.iter().zip(g.iter()).map(|(x, g)| g * x.sinh()).collect())
        }
        (x, g) => {
            return Err(BackendError::execution(format!(
                "cosh gradient over {} values with a {} seed",
                x.dtype(),
                g.dtype()
            )))
        }
    })
}

trait FloorMod: Copy {
    /// `None` when the remainder is undefined for this dtype.
    fn floor_mod(self, rhs: Self) -> Option<Self>;
}

impl FloorMod for f32 {
    fn floor_mod(self, rhs: f32) -> Option<f32> {
        let r = self % rhs;
        Some(if r != 0.0 && (r < 0.0) != (rhs < 0.0) { r + rhs } else { r })
    }
}

impl FloorMod for f64 {
    fn floor_mod(self, rhs: f64) -> Option<f64> {
        let r = self % rhs;
        Some(if r != 0.0 && (r < 0.0) != (rhs < 0.0) { r + rhs } else { r })
    }
}

impl FloorMod for f16 {
    fn floor_mod(self, rhs: f16) -> Option<f16> {
        self.to_f32().floor_mod(rhs.to_f32()).map(f16::from_f32)
    }
}

impl FloorMod for i32 {
    fn floor_mod(self, rhs: i32) -> Option<i32> {
        if rhs == 0 {
            return None;
        }
        let r = self.wrapping_rem(rhs);
        Some(if r != 0 && (r < 0) != (rhs < 0) { r + rhs } else { r })
    }
}

impl FloorMod for i64 {
    fn floor_mod(self, rhs: i64) -> Option<i64> {
        if rhs == 0 {
            return None;
        }
        let r = self.wrapping_rem(rhs);
        Some(if r != 0 && (r < 0) != (rhs < 0) { r + rhs } else { r })
    }
}

fn floor_mod_typed<T: FloorMod>(kernel: &BinaryKernel, lhs: &[T], rhs: &[T]) -> BackendResult<Arc<[T]>> {
    let total: usize = kernel.out_dims.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut undefined = false;
    kernel.for_each(|_, l, r| match lhs[l].floor_mod(rhs[r]) {
        Some(value) => out.push(value),
        None => {
            undefined = true;
            out.push(lhs[l]);
        }
    });
    if undefined {
        return Err(BackendError::execution("division by zero in integer floor_mod"));
    }
    Ok(out.into())
}

pub fn floor_mod(kernel: &BinaryKernel, lhs: &TensorData, rhs: &TensorData) -> BackendResult<TensorData> {
    Ok(match (lhs, rhs) {
        (TensorData::F16(a), TensorData::F16(b)) => TensorData::F16(floor_mod_typed(kernel, a, b)?),
        (TensorData::F32(a), TensorData::F32(b)) => TensorData::F32(floor_mod_typed(kernel, a, b)?),
        (TensorData::F64(a), TensorData::F64(b)) => TensorData::F64(floor_mod_typed(kernel, a, b)?),
        (TensorData::I32(a), TensorData::I32(b)) => TensorData::I32(floor_mod_typed(kernel, a, b)?),
        (TensorData::I64(a), TensorData::I64(b)) => TensorData::I64(floor_mod_typed(kernel, a, b)?),
        (a, b) => {
            return Err(BackendError::execution(format!(
                "floor_mod over {} and {} operands",
                a.dtype(),
                b.dtype()
            )))
        }
    })
}

/// Gradients of floor modulo, accumulated in f64 over broadcast axes.
///
/// `d/dx = grad`, `d/dy = -grad * round((x - out) / y)`.
pub fn floor_mod_backward(
    kernel: &BinaryKernel,
    lhs: &TensorData,
    rhs: &TensorData,
    out: &TensorData,
    grad: &TensorData,
) -> (Vec<f64>, Vec<f64>) {
    let mut dx = vec![0.0f64; kernel.lhs_dims.iter().product()];
    let mut dy = vec![0.0f64; kernel.rhs_dims.iter().product()];
    kernel.for_each(|o, l, r| {
        let g = grad.get_f64(o);
        let quotient = (lhs.get_f64(l) - out.get_f64(o)) / rhs.get_f64(r);
        dx[l] += g;
        dy[r] -= g * quotient.round();
    });
    (dx, dy)
}

/// Element-wise sum of two same-typed gradient buffers.
pub fn add(lhs: &TensorData, rhs: &TensorData) -> BackendResult<TensorData> {
    fn sum<T: Copy + std::ops::Add<Output = T>>(a: &[T], b: &[T]) -> Arc<[T]> {
        a.iter().zip(b.iter()).map(|(&x, &y)| x + y).collect()
    }
    Ok(match (lhs, rhs) {
        (TensorData::F16(a), TensorData::F16(b)) => TensorData::F16(sum(a, b)),
        (TensorData::F32(a), TensorData::F32(b)) => TensorData::F32(sum(a, b)),
        (TensorData::F64(a), TensorData::F64(b)) => TensorData::F64(sum(a, b)),
        (a, b) => {
            return Err(BackendError::execution(format!(
                "cannot accumulate {} and {} gradients",
                a.dtype(),
                b.dtype()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_data(values: &[f32]) -> TensorData {
        TensorData::F32(values.into())
    }

    #[test]
    fn cosh_matches_std_closely() {
        for x in [0.0f32, 0.25, 0.5, 0.999, -0.75] {
            let expected = (x as f64).cosh();
            let got = cosh_f32(x) as f64;
            assert!(((got - expected) / expected).abs() < 1e-6, "x = {x}");
        }
    }

    #[test]
    fn floor_mod_sign_follows_divisor() {
        let kernel = BinaryKernel::new(&[4], &[4], &[4]);
        let out = floor_mod(
            &kernel,
            &f32_data(&[7.0, -7.0, 7.0, -7.0]),
            &f32_data(&[3.0, 3.0, -3.0, -3.0]),
        )
        .unwrap();
        assert_eq!(out, f32_data(&[1.0, 2.0, -2.0, -1.0]));
    }

    #[test]
    fn integer_floor_mod_rejects_zero_divisors() {
        let kernel = BinaryKernel::new(&[2], &[1], &[2]);
        let lhs = TensorData::I32(vec![5, -5].into());
        let out = floor_mod(&kernel, &lhs, &TensorData::I32(vec![3].into())).unwrap();
        assert_eq!(out, TensorData::I32(vec![2, 1].into()));
        let err = floor_mod(&kernel, &lhs, &TensorData::I32(vec![0].into())).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn float_zero_divisor_is_nan() {
        let kernel = BinaryKernel::new(&[1], &[1], &[1]);
        let out = floor_mod(&kernel, &f32_data(&[1.0]), &f32_data(&[0.0])).unwrap();
        match out {
            TensorData::F32(values) => assert!(values[0].is_nan()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn floor_mod_backward_reduces_broadcast_axes() {
        let kernel = BinaryKernel::new(&[2, 1], &[3], &[2, 3]);
        let lhs = TensorData::F64(vec![7.0, -7.0].into());
        let rhs = TensorData::F64(vec![2.0, 3.0, -4.0].into());
        let out = floor_mod(&kernel, &lhs, &rhs).unwrap();
        let grad = TensorData::F64(vec![1.0; 6].into());
        let (dx, dy) = floor_mod_backward(&kernel, &lhs, &rhs, &out, &grad);
        assert_eq!(dx, vec![3.0, 3.0]);
        assert_eq!(dy, vec![1.0, 1.0, 1.0]);
    }
}
