//! Error taxonomy shared by the engine.
//!
//! Declaration errors ([`InvalidShapeError`], [`HarnessError`]) abort a whole run. Execution and
//! comparison errors ([`BackendExecutionError`], [`ShapeMismatchError`]) are scoped to one case.

use std::fmt;

use thiserror::Error;

use crate::case::CaseError;
use crate::generator::GeneratorError;
use crate::tensor::DType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidShapeError {
    #[error("shape must have at least one dimension")]
    Empty,
    #[error("dimension {axis} of shape {dims:?} must be positive")]
    NonPositive { axis: usize, dims: Vec<i64> },
    #[error("shapes {lhs:?} and {rhs:?} are not broadcast-compatible")]
    NotBroadcastable { lhs: Vec<usize>, rhs: Vec<usize> },
    #[error("case `{case}`: parameter `{param}`: {source}")]
    InCase {
        case: String,
        param: String,
        #[source]
        source: Box<InvalidShapeError>,
    },
}

/// Which backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Run,
    Gradients,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Build => "build",
            Stage::Run => "run",
            Stage::Gradients => "gradients",
        })
    }
}

/// One backend failed to build or run a case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backend `{backend}` failed during {stage}: {message}")]
pub struct BackendExecutionError {
    pub backend: String,
    pub stage: Stage,
    pub message: String,
}

/// Reference and candidate produced outputs that cannot be compared element-wise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeMismatchError {
    #[error("reference produced {reference} outputs, candidate produced {candidate}")]
    OutputCount { reference: usize, candidate: usize },
    #[error("output {index}: reference shape {reference:?} vs candidate shape {candidate:?}")]
    Shape {
        index: usize,
        reference: Vec<usize>,
        candidate: Vec<usize>,
    },
    #[error("output {index}: reference dtype {reference} vs candidate dtype {candidate}")]
    DType {
        index: usize,
        reference: DType,
        candidate: DType,
    },
    #[error("gradient for input `{name}` missing from {side} backend")]
    MissingGradient { name: String, side: &'static str },
}

/// Failure while materializing the inputs of one case.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error(transparent)]
    Case(#[from] CaseError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    InvalidShape(#[from] InvalidShapeError),
    #[error("literal input `{name}`: {message}")]
    Literal { name: String, message: String },
}

/// Malformed suite declaration; fatal for the whole run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    InvalidShape(#[from] InvalidShapeError),
    #[error("case `{case}`: {source}")]
    Input {
        case: String,
        #[source]
        source: InputError,
    },
    #[error("case `{case}`: {source}")]
    Declaration {
        case: String,
        #[source]
        source: CaseError,
    },
}
