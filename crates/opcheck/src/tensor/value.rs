//! Host-side tensor buffers shared read-only between backends.

use std::sync::Arc;

use half::f16;

use super::{DType, Shape};

/// Typed element storage. Buffers are reference counted so a value handed to both backends is
/// never duplicated.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F16(Arc<[f16]>),
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
    I32(Arc<[i32]>),
    I64(Arc<[i64]>),
    Bool(Arc<[bool]>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F16(_) => DType::F16,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::Bool(_) => DType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F16(values) => values.len(),
            TensorData::F32(values) => values.len(),
            TensorData::F64(values) => values.len(),
            TensorData::I32(values) => values.len(),
            TensorData::I64(values) => values.len(),
            TensorData::Bool(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widens element `index` to f64. Bools map to 0/1.
    pub fn get_f64(&self, index: usize) -> f64 {
        match self {
            TensorData::F16(values) => values[index].to_f64(),
            TensorData::F32(values) => values[index] as f64,
            TensorData::F64(values) => values[index],
            TensorData::I32(values) => values[index] as f64,
            TensorData::I64(values) => values[index] as f64,
            TensorData::Bool(values) => {
                if values[index] {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Raw bit pattern of element `index`, zero-extended to 64 bits.
    pub fn element_bits(&self, index: usize) -> u64 {
        match self {
            TensorData::F16(values) => u64::from(values[index].to_bits()),
            TensorData::F32(values) => u64::from(values[index].to_bits()),
            TensorData::F64(values) => values[index].to_bits(),
            TensorData::I32(values) => u64::from(values[index] as u32),
            TensorData::I64(values) => values[index] as u64,
            TensorData::Bool(values) => u64::from(values[index]),
        }
    }
}

/// Concrete numeric buffer conforming to a shape and dtype. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    shape: Shape,
    data: TensorData,
}

impl TensorValue {
    /// Pairs a shape with storage, checking the element count.
    pub fn new(shape: Shape, data: TensorData) -> Result<Self, String> {
        if shape.num_elements() != data.len() {
            return Err(format!(
                "shape {shape} expects {} elements but buffer holds {}",
                shape.num_elements(),
                data.len()
            ));
        }
        Ok(TensorValue { shape, data })
    }

    pub fn from_f16(shape: Shape, values: Vec<f16>) -> Result<Self, String> {
        Self::new(shape, TensorData::F16(values.into()))
    }

    pub fn from_f32(shape: Shape, values: Vec<f32>) -> Result<Self, String> {
        Self::new(shape, TensorData::F32(values.into()))
    }

    pub fn from_f64(shape: Shape, values: Vec<f64>) -> Result<Self, String> {
        Self::new(shape, TensorData::F64(values.into()))
    }

    pub fn from_i32(shape: Shape, values: Vec<i32>) -> Result<Self, String> {
        Self::new(shape, TensorData::I32(values.into()))
    }

    pub fn from_i64(shape: Shape, values: Vec<i64>) -> Result<Self, String> {
        Self::new(shape, TensorData::I64(values.into()))
    }

    pub fn from_bool(shape: Shape, values: Vec<bool>) -> Result<Self, String> {
        Self::new(shape, TensorData::Bool(values.into()))
    }

    /// Rounds f64 values into the requested dtype. Integer dtypes truncate toward zero.
    pub fn from_f64_as(shape: Shape, dtype: DType, values: &[f64]) -> Result<Self, String> {
        let data = match dtype {
            DType::F16 => TensorData::F16(values.iter().map(|&v| f16::from_f64(v)).collect()),
            DType::F32 => TensorData::F32(values.iter().map(|&v| v as f32).collect()),
            DType::F64 => TensorData::F64(values.into()),
            DType::I32 => TensorData::I32(values.iter().map(|&v| v as i32).collect()),
            DType::I64 => TensorData::I64(values.iter().map(|&v| v as i64).collect()),
            DType::Bool => TensorData::Bool(values.iter().map(|&v| v != 0.0).collect()),
        };
        Self::new(shape, data)
    }

    /// Tensor of the given dtype with every element set to `value`.
    pub fn full(shape: Shape, dtype: DType, value: f64) -> Self {
        let values = vec![value; shape.num_elements()];
        let data = match dtype {
            DType::F16 => TensorData::F16(values.iter().map(|&v| f16::from_f64(v)).collect()),
            DType::F32 => TensorData::F32(values.iter().map(|&v| v as f32).collect()),
            DType::F64 => TensorData::F64(values.into()),
            DType::I32 => TensorData::I32(values.iter().map(|&v| v as i32).collect()),
            DType::I64 => TensorData::I64(values.iter().map(|&v| v as i64).collect()),
            DType::Bool => TensorData::Bool(values.iter().map(|&v| v != 0.0).collect()),
        };
        TensorValue { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            TensorData::F64(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            TensorData::I32(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::I64(values) => Some(values),
            _ => None,
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len()).map(|idx| self.data.get_f64(idx)).collect()
    }

    /// True when both values hold the same buffer allocation.
    pub fn shares_buffer(&self, other: &TensorValue) -> bool {
        match (&self.data, &other.data) {
            (TensorData::F16(a), TensorData::F16(b)) => Arc::ptr_eq(a, b),
            (TensorData::F32(a), TensorData::F32(b)) => Arc::ptr_eq(a, b),
            (TensorData::F64(a), TensorData::F64(b)) => Arc::ptr_eq(a, b),
            (TensorData::I32(a), TensorData::I32(b)) => Arc::ptr_eq(a, b),
            (TensorData::I64(a), TensorData::I64(b)) => Arc::ptr_eq(a, b),
            (TensorData::Bool(a), TensorData::Bool(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
