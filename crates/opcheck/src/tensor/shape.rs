//! Validated tensor shapes and row-major index bookkeeping.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidShapeError;

/// Stores the logical dimensions of a tensor.
///
/// Every shape has at least one axis and every axis is positive; rank-0 tensors are not
/// representable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<i64>")]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Validates declared dimensions.
    pub fn new(dims: &[i64]) -> Result<Self, InvalidShapeError> {
        if dims.is_empty() {
            return Err(InvalidShapeError::Empty);
        }
        let mut out = Vec::with_capacity(dims.len());
        for (axis, &dim) in dims.iter().enumerate() {
            if dim <= 0 {
                return Err(InvalidShapeError::NonPositive {
                    axis,
                    dims: dims.to_vec(),
                });
            }
            out.push(dim as usize);
        }
        Ok(Shape { dims: out })
    }

    /// Builds a shape from dimensions already known to be positive.
    pub fn from_dims(dims: &[usize]) -> Result<Self, InvalidShapeError> {
        let signed: Vec<i64> = dims.iter().map(|&dim| dim as i64).collect();
        Shape::new(&signed)
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Row-major contiguous strides.
    pub fn strides(&self) -> Vec<usize> {
        compute_strides(&self.dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

impl TryFrom<Vec<i64>> for Shape {
    type Error = InvalidShapeError;

    fn try_from(dims: Vec<i64>) -> Result<Self, Self::Error> {
        Shape::new(&dims)
    }
}

impl From<Shape> for Vec<i64> {
    fn from(shape: Shape) -> Self {
        shape.dims.iter().map(|&dim| dim as i64).collect()
    }
}

pub fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride *= dims[axis];
    }
    strides
}

/// Converts a flat row-major offset into per-axis coordinates.
pub fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0usize; dims.len()];
    for axis in (0..dims.len()).rev() {
        let dim = dims[axis];
        coords[axis] = index % dim;
        index /= dim;
    }
    coords
}
