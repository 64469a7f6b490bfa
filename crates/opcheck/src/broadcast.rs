//! Standard broadcasting: trailing-dimension alignment with size-1 stretching.

use crate::error::InvalidShapeError;
use crate::tensor::{compute_strides, Shape};

/// Shape produced by broadcasting `lhs` against `rhs`.
pub fn broadcast_shapes(lhs: &Shape, rhs: &Shape) -> Result<Shape, InvalidShapeError> {
    let out = broadcast_dims(lhs.dims(), rhs.dims())?;
    Shape::from_dims(&out)
}

pub fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>, InvalidShapeError> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0usize; rank];
    for idx in 0..rank {
        let l = dim_from_back(lhs, rank, idx);
        let r = dim_from_back(rhs, rank, idx);
        out[idx] = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(InvalidShapeError::NotBroadcastable {
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                })
            }
        };
    }
    Ok(out)
}

fn dim_from_back(dims: &[usize], rank: usize, idx: usize) -> usize {
    let offset = rank - dims.len();
    if idx < offset {
        1
    } else {
        dims[idx - offset]
    }
}

/// Strides for reading `src` as if it had shape `out`: stretched axes get stride 0.
///
/// `src` must broadcast to `out`.
pub fn broadcast_strides(src: &[usize], out: &[usize]) -> Vec<usize> {
    let src_strides = compute_strides(src);
    let offset = out.len() - src.len();
    let mut strides = vec![0usize; out.len()];
    for (axis, stride) in strides.iter_mut().enumerate().skip(offset) {
        let src_axis = axis - offset;
        if src[src_axis] != 1 {
            *stride = src_strides[src_axis];
        }
    }
    strides
}

/// Maps every flat index of `out` to the flat index of the broadcast source.
pub fn broadcast_index_map(src: &[usize], out: &[usize]) -> Vec<usize> {
    let strides = broadcast_strides(src, out);
    let total: usize = out.iter().product();
    let mut map = Vec::with_capacity(total);
    let mut coords = vec![0usize; out.len()];
    let mut offset = 0usize;
    for _ in 0..total {
        map.push(offset);
        for axis in (0..out.len()).rev() {
            coords[axis] += 1;
            offset += strides[axis];
            if coords[axis] < out[axis] {
                break;
            }
            offset -= strides[axis] * coords[axis];
            coords[axis] = 0;
        }
    }
    map
}

/// Sums `values` (laid out as `from`) down to the broadcast source shape `to`.
pub fn reduce_to_dims(values: &[f64], from: &[usize], to: &[usize]) -> Vec<f64> {
    let map = broadcast_index_map(to, from);
    let mut out = vec![0.0f64; to.iter().product()];
    for (value, &dst) in values.iter().zip(map.iter()) {
        out[dst] += *value;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dims: &[i64]) -> Shape {
        Shape::new(dims).unwrap()
    }

    #[test]
    fn trailing_alignment_and_stretching() {
        let out = broadcast_shapes(&shape(&[16, 1, 4, 1, 32]), &shape(&[1, 8, 1, 2, 1])).unwrap();
        assert_eq!(out.dims(), &[16, 8, 4, 2, 32]);
        let out = broadcast_shapes(&shape(&[32]), &shape(&[32, 1])).unwrap();
        assert_eq!(out.dims(), &[32, 32]);
    }

    #[test]
    fn incompatible_dims_are_rejected() {
        let err = broadcast_shapes(&shape(&[3, 4]), &shape(&[2, 4])).unwrap_err();
        assert!(matches!(err, InvalidShapeError::NotBroadcastable { .. }));
    }

    #[test]
    fn index_map_walks_stretched_axes() {
        let map = broadcast_index_map(&[2, 1], &[2, 3]);
        assert_eq!(map, vec![0, 0, 0, 1, 1, 1]);
        let map = broadcast_index_map(&[3], &[2, 3]);
        assert_eq!(map, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn reduce_sums_over_broadcast_axes() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(reduce_to_dims(&values, &[2, 3], &[1, 3]), vec![5.0, 7.0, 9.0]);
        assert_eq!(reduce_to_dims(&values, &[2, 3], &[2, 1]), vec![6.0, 15.0]);
    }
}
