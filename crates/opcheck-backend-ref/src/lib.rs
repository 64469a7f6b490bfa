//! Reference backend: an eager host evaluator whose results define the expected answers.

pub mod backend;
pub mod eager;

pub use backend::{ReferenceBackend, ReferenceExecutable};
pub use eager::{cosh, modulo, roll, to_tensor, RefTensor};
