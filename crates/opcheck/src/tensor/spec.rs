//! Named tensor slots of an operator under test.

use serde::{Deserialize, Serialize};

use super::{DType, Shape};

/// How a slot participates in the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorRole {
    Input,
    /// Input used as a divisor; generated values exclude zero.
    Divisor,
    Output,
}

/// Shape, dtype, and role of one named input or output slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
    pub role: TensorRole,
}

impl TensorSpec {
    pub fn input(name: impl Into<String>, shape: Shape, dtype: DType) -> Self {
        TensorSpec {
            name: name.into(),
            shape,
            dtype,
            role: TensorRole::Input,
        }
    }

    pub fn divisor(name: impl Into<String>, shape: Shape, dtype: DType) -> Self {
        TensorSpec {
            name: name.into(),
            shape,
            dtype,
            role: TensorRole::Divisor,
        }
    }

    pub fn output(name: impl Into<String>, shape: Shape, dtype: DType) -> Self {
        TensorSpec {
            name: name.into(),
            shape,
            dtype,
            role: TensorRole::Output,
        }
    }
}
