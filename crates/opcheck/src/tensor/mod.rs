//! Host tensor types: dtypes, validated shapes, slot specs, and shared buffers.

mod dtype;
mod shape;
mod spec;
mod value;

use std::collections::BTreeMap;

pub use dtype::{DType, UnknownDType};
pub use shape::{compute_strides, unravel_index, Shape};
pub use spec::{TensorRole, TensorSpec};
pub use value::{TensorData, TensorValue};

/// Input values keyed by slot name.
pub type Feeds = BTreeMap<String, TensorValue>;
