//! The capability interface every backend implements.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::program::{Program, ProgramError};
use crate::tensor::{DType, Feeds, TensorValue};

/// Gradients keyed by input name.
pub type GradientMap = BTreeMap<String, TensorValue>;

/// Execution target selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Host,
    Accelerator,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Host => "host",
            Target::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("invalid program: {0}")]
    InvalidProgram(#[from] ProgramError),
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },
    #[error("no value fed for input `{name}`")]
    MissingFeed { name: String },
    #[error("input `{name}` does not match its declaration: {message}")]
    FeedMismatch { name: String, message: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn missing_feed(name: impl Into<String>) -> Self {
        BackendError::MissingFeed { name: name.into() }
    }

    pub fn unsupported_dtype(op: &'static str, dtype: DType) -> Self {
        BackendError::unimplemented(op, format!("dtype {dtype} is not supported"))
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// An execution engine that can build and run a [`Program`].
///
/// Backends only read the feeds they are given; the executor hands the same buffers to both
/// the reference and the candidate.
pub trait OpBackend: Send + Sync {
    /// Backend-specific compiled form of a program.
    type Executable;

    /// Returns a human-readable backend identifier (e.g., `"reference"`).
    fn backend_name(&self) -> &str;

    /// Whether the backend can execute on `target`.
    fn supports(&self, target: Target) -> bool {
        target == Target::Host
    }

    /// Validates and prepares `program` for execution.
    fn build(&self, program: &Program) -> BackendResult<Self::Executable>;

    /// Executes a built program. Outputs follow `program.outputs` order.
    fn run(&self, executable: &Self::Executable, feeds: &Feeds) -> BackendResult<Vec<TensorValue>>;

    /// Computes gradients of every float input with respect to the outputs, seeded with
    /// `output_grads` (one per output).
    fn compute_gradients(
        &self,
        _executable: &Self::Executable,
        _feeds: &Feeds,
        _output_grads: &[TensorValue],
    ) -> BackendResult<GradientMap> {
        Err(BackendError::unimplemented(
            "compute_gradients",
            format!("backend `{}` has no gradient support", self.backend_name()),
        ))
    }
}

/// Checks that every program input has a feed with the declared shape and dtype.
pub fn check_feeds(program: &Program, feeds: &Feeds) -> BackendResult<()> {
    for (inst, name) in program.inputs() {
        let value = feeds.get(name).ok_or_else(|| BackendError::missing_feed(name))?;
        if value.dtype() != inst.output.dtype || value.shape() != &inst.output.shape {
            return Err(BackendError::FeedMismatch {
                name: name.to_string(),
                message: format!(
                    "declared {} but fed {}{}",
                    inst.output,
                    value.dtype(),
                    value.shape()
                ),
            });
        }
    }
    Ok(())
}
