//! Runs one program on the reference backend and then on the candidate.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::backend::{GradientMap, OpBackend};
use crate::error::{BackendExecutionError, Stage};
use crate::program::Program;
use crate::tensor::{Feeds, TensorValue};

/// Outputs (and optional gradients) collected from both backends.
#[derive(Debug, Clone)]
pub struct DualOutputs {
    pub reference: Vec<TensorValue>,
    pub candidate: Vec<TensorValue>,
    pub reference_grads: Option<GradientMap>,
    pub candidate_grads: Option<GradientMap>,
}

#[derive(Debug)]
pub struct DualExecutor<R, C> {
    reference: Arc<R>,
    candidate: Arc<C>,
}

impl<R, C> Clone for DualExecutor<R, C> {
    fn clone(&self) -> Self {
        DualExecutor {
            reference: Arc::clone(&self.reference),
            candidate: Arc::clone(&self.candidate),
        }
    }
}

impl<R: OpBackend, C: OpBackend> DualExecutor<R, C> {
    pub fn new(reference: Arc<R>, candidate: Arc<C>) -> Self {
        DualExecutor {
            reference,
            candidate,
        }
    }

    pub fn reference(&self) -> &R {
        &self.reference
    }

    pub fn candidate(&self) -> &C {
        &self.candidate
    }

    /// Builds and runs `program` on the reference, then on the candidate, with the same feeds.
    ///
    /// When `gradients` is set both backends are asked for input gradients seeded with all-ones
    /// tensors of the output types; the seeds are created once and shared.
    pub fn execute(
        &self,
        program: &Program,
        feeds: &Feeds,
        gradients: bool,
    ) -> Result<DualOutputs, BackendExecutionError> {
        let seeds = if gradients {
            let types = program.output_types().map_err(|err| BackendExecutionError {
                backend: self.reference.backend_name().to_string(),
                stage: Stage::Build,
                message: err.to_string(),
            })?;
            Some(
                types
                    .into_iter()
                    .map(|ty| TensorValue::full(ty.shape, ty.dtype, 1.0))
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };

        let (reference, reference_grads) =
            run_backend(self.reference.as_ref(), program, feeds, seeds.as_deref())?;
        let (candidate, candidate_grads) =
            run_backend(self.candidate.as_ref(), program, feeds, seeds.as_deref())?;
        Ok(DualOutputs {
            reference,
            candidate,
            reference_grads,
            candidate_grads,
        })
    }
}

fn run_backend<B: OpBackend + ?Sized>(
    backend: &B,
    program: &Program,
    feeds: &Feeds,
    seeds: Option<&[TensorValue]>,
) -> Result<(Vec<TensorValue>, Option<GradientMap>), BackendExecutionError> {
    let fail = |stage: Stage, message: String| BackendExecutionError {
        backend: backend.backend_name().to_string(),
        stage,
        message,
    };

    let start = Instant::now();
    let executable = backend
        .build(program)
        .map_err(|err| fail(Stage::Build, err.to_string()))?;
    let outputs = backend
        .run(&executable, feeds)
        .map_err(|err| fail(Stage::Run, err.to_string()))?;
    let grads = match seeds {
        Some(seeds) => Some(
            backend
                .compute_gradients(&executable, feeds, seeds)
                .map_err(|err| fail(Stage::Gradients, err.to_string()))?,
        ),
        None => None,
    };
    debug!(
        backend = backend.backend_name(),
        program = %program.name,
        outputs = outputs.len(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
        "backend finished"
    );
    Ok((outputs, grads))
}
