//! Differential operator conformance engine.
//!
//! Suites declare parameter lists, [`case::expand`] turns them into named cases, and the
//! [`driver::Driver`] runs each case through a reference and a candidate [`backend::OpBackend`]
//! with identical seeded inputs before comparing the outputs.

pub mod backend;
pub mod broadcast;
pub mod case;
pub mod compare;
pub mod driver;
pub mod env;
pub mod error;
pub mod executor;
pub mod generator;
pub mod logging;
pub mod program;
pub mod tensor;

pub use backend::{BackendError, BackendResult, GradientMap, OpBackend, Target};
pub use case::{ParamSet, ParamValue, TestCase};
pub use compare::{CompareMode, ComparisonResult, Tolerance};
pub use driver::{CheckConfig, Driver, OpTest, RunConfig, Suite, SuiteReport};
pub use error::{BackendExecutionError, HarnessError, InvalidShapeError, ShapeMismatchError};
pub use executor::DualExecutor;
pub use program::{Program, ProgramBuilder, ValueId};
pub use tensor::{DType, Feeds, Shape, TensorSpec, TensorValue};
