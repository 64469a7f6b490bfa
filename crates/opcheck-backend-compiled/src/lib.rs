//! Candidate backend: programs are lowered once into slot-addressed kernel steps and then
//! executed without further shape work.

pub mod kernels;
pub mod lower;

use opcheck::backend::{BackendError, BackendResult, GradientMap, OpBackend};
use opcheck::program::Program;
use opcheck::tensor::{Feeds, TensorData, TensorValue};

pub use lower::{lower, CompiledProgram, Kernel, Step};

#[derive(Debug, Default, Clone, Copy)]
pub struct CompiledBackend;

impl CompiledBackend {
    pub fn new() -> Self {
        CompiledBackend
    }
}

impl OpBackend for CompiledBackend {
    type Executable = CompiledProgram;

    fn backend_name(&self) -> &str {
        "compiled"
    }

    fn build(&self, program: &Program) -> BackendResult<CompiledProgram> {
        let compiled = lower(program)?;
        tracing::debug!(
            program = %compiled.name,
            steps = compiled.slot_count(),
            "lowered program"
        );
        Ok(compiled)
    }

    fn run(&self, executable: &CompiledProgram, feeds: &Feeds) -> BackendResult<Vec<TensorValue>> {
        let slots = forward(executable, feeds)?;
        executable
            .outputs
            .iter()
            .map(|&slot| slot_value(&slots, slot).cloned())
            .collect()
    }

    fn compute_gradients(
        &self,
        executable: &CompiledProgram,
        feeds: &Feeds,
        output_grads: &[TensorValue],
    ) -> BackendResult<GradientMap> {
        if output_grads.len() != executable.outputs.len() {
            return Err(BackendError::execution(format!(
                "expected {} output gradients, got {}",
                executable.outputs.len(),
                output_grads.len()
            )));
        }
        let slots = forward(executable, feeds)?;
        let mut pending: Vec<Option<TensorValue>> = vec![None; executable.slot_count()];

        for (&slot, seed) in executable.outputs.iter().zip(output_grads.iter()) {
            let step = &executable.steps[slot];
            if !step.ty.dtype.is_float() {
                return Err(BackendError::unimplemented(
                    "compute_gradients",
                    format!("output slot {slot} has non-differentiable dtype {}", step.ty.dtype),
                ));
            }
            if seed.dtype() != step.ty.dtype || seed.shape() != &step.ty.shape {
                return Err(BackendError::execution(format!(
                    "gradient seed {}{} does not match output {}",
                    seed.dtype(),
                    seed.shape(),
                    step.ty
                )));
            }
            accumulate(&mut pending, slot, seed.clone())?;
        }

        let mut grads = GradientMap::new();
        for (index, step) in executable.steps.iter().enumerate().rev() {
            let Some(grad) = pending[step.slot].take() else {
                continue;
            };
            backward_step(step, &slots, grad, &mut pending, &mut grads)
                .map_err(|err| with_step_context(err, executable, index, step))?;
        }

        for (name, step) in executable.inputs() {
            if step.ty.dtype.is_float() && !grads.contains_key(name) {
                grads.insert(
                    name.to_string(),
                    TensorValue::full(step.ty.shape.clone(), step.ty.dtype, 0.0),
                );
            }
        }
        Ok(grads)
    }
}

fn backward_step(
    step: &Step,
    slots: &[Option<TensorValue>],
    grad: TensorValue,
    pending: &mut [Option<TensorValue>],
    grads: &mut GradientMap,
) -> BackendResult<()> {
    match &step.kernel {
        Kernel::Load { name } => {
            if step.ty.dtype.is_float() {
                grads.insert(name.clone(), grad);
            }
        }
        Kernel::Roll { backward, .. } => {
            let operand = step.operands[0];
            let data = kernels::roll(backward, grad.data());
            accumulate(pending, operand, typed(&slots[operand], data)?)?;
        }
        Kernel::Cosh => {
            let operand = step.operands[0];
            let x = slot_value(slots, operand)?;
            let data = kernels::cosh_backward(x.data(), grad.data())?;
            accumulate(pending, operand, typed(&slots[operand], data)?)?;
        }
        Kernel::FloorMod(kernel) => {
            let (lhs_slot, rhs_slot) = (step.operands[0], step.operands[1]);
            let lhs = slot_value(slots, lhs_slot)?;
            let rhs = slot_value(slots, rhs_slot)?;
            let out = slot_value(slots, step.slot)?;
            let (dx, dy) =
                kernels::floor_mod_backward(kernel, lhs.data(), rhs.data(), out.data(), grad.data());
            let dx = TensorValue::from_f64_as(lhs.shape().clone(), lhs.dtype(), &dx)
                .map_err(BackendError::execution)?;
            let dy = TensorValue::from_f64_as(rhs.shape().clone(), rhs.dtype(), &dy)
                .map_err(BackendError::execution)?;
            accumulate(pending, lhs_slot, dx)?;
            accumulate(pending, rhs_slot, dy)?;
        }
    }
    Ok(())
}

fn typed(slot: &Option<TensorValue>, data: TensorData) -> BackendResult<TensorValue> {
    let shape = slot
        .as_ref()
        .map(|value| value.shape().clone())
        .ok_or_else(|| BackendError::execution("gradient targets an empty slot"))?;
    TensorValue::new(shape, data).map_err(BackendError::execution)
}

fn accumulate(pending: &mut [Option<TensorValue>], slot: usize, grad: TensorValue) -> BackendResult<()> {
    let merged = match pending[slot].take() {
        Some(existing) => {
            let data = kernels::add(existing.data(), grad.data())?;
            TensorValue::new(existing.shape().clone(), data).map_err(BackendError::execution)?
        }
        None => grad,
    };
    pending[slot] = Some(merged);
    Ok(())
}

fn slot_value(slots: &[Option<TensorValue>], slot: usize) -> BackendResult<&TensorValue> {
    slots
        .get(slot)
        .and_then(Option::as_ref)
        .ok_or_else(|| BackendError::execution(format!("slot {slot} was never written")))
}

fn forward(executable: &CompiledProgram, feeds: &Feeds) -> BackendResult<Vec<Option<TensorValue>>> {
    let mut slots: Vec<Option<TensorValue>> = vec![None; executable.slot_count()];
    for (index, step) in executable.steps.iter().enumerate() {
        let value = execute_step(step, &slots, feeds)
            .map_err(|err| with_step_context(err, executable, index, step))?;
        slots[step.slot] = Some(value);
    }
    Ok(slots)
}

fn execute_step(step: &Step, slots: &[Option<TensorValue>], feeds: &Feeds) -> BackendResult<TensorValue> {
    let data = match &step.kernel {
        Kernel::Load { name } => {
            let value = feeds.get(name).ok_or_else(|| BackendError::missing_feed(name))?;
            if value.dtype() != step.ty.dtype || value.shape() != &step.ty.shape {
                return Err(BackendError::FeedMismatch {
                    name: name.clone(),
                    message: format!("declared {} but fed {}{}", step.ty, value.dtype(), value.shape()),
                });
            }
            return Ok(value.clone());
        }
        Kernel::Roll { forward, .. } => {
            kernels::roll(forward, slot_value(slots, step.operands[0])?.data())
        }
        Kernel::Cosh => kernels::cosh(slot_value(slots, step.operands[0])?.data())?,
        Kernel::FloorMod(kernel) => kernels::floor_mod(
            kernel,
            slot_value(slots, step.operands[0])?.data(),
            slot_value(slots, step.operands[1])?.data(),
        )?,
    };
    TensorValue::new(step.ty.shape.clone(), data).map_err(BackendError::execution)
}

fn with_step_context(
    error: BackendError,
    executable: &CompiledProgram,
    index: usize,
    step: &Step,
) -> BackendError {
    match error {
        BackendError::Execution { message } => BackendError::Execution {
            message: format!(
                "{message} (in kernel `{}` at step #{} of `{}`, slots {:?} -> {})",
                step.kernel.name(),
                index,
                executable.name,
                step.operands,
                step.slot
            ),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcheck::program::ProgramBuilder;
    use opcheck::tensor::{DType, Shape};

    fn shape(dims: &[i64]) -> Shape {
        Shape::new(dims).unwrap()
    }

    #[test]
    fn runs_lowered_roll() {
        let mut builder = ProgramBuilder::new("roll");
        let x = builder.create_input(DType::I64, &shape(&[2, 3]), "x").unwrap();
        let out = builder.roll(x, &[-1], &[1]).unwrap();
        let program = builder.build(&[out]).unwrap();

        let backend = CompiledBackend::new();
        let exe = backend.build(&program).unwrap();
        let mut feeds = Feeds::new();
        feeds.insert(
            "x".to_string(),
            TensorValue::from_i64(shape(&[2, 3]), vec![0, 1, 2, 3, 4, 5]).unwrap(),
        );
        let outputs = backend.run(&exe, &feeds).unwrap();
        assert_eq!(outputs[0].as_i64().unwrap(), &[1, 2, 0, 4, 5, 3]);
    }

    #[test]
    fn fan_out_gradients_accumulate() {
        // out = x mod cosh(x); x feeds two instructions.
        let mut builder = ProgramBuilder::new("fan_out");
        let x = builder.create_input(DType::F64, &shape(&[2]), "x").unwrap();
        let c = builder.cosh(x).unwrap();
        let out = builder.modulo(x, c).unwrap();
        let program = builder.build(&[out]).unwrap();

        let backend = CompiledBackend::new();
        let exe = backend.build(&program).unwrap();
        let mut feeds = Feeds::new();
        feeds.insert(
            "x".to_string(),
            TensorValue::from_f64(shape(&[2]), vec![0.5, -0.5]).unwrap(),
        );
        let seed = TensorValue::full(shape(&[2]), DType::F64, 1.0);
        let grads = backend.compute_gradients(&exe, &feeds, &[seed]).unwrap();
        // 0.5 mod cosh(0.5): quotient 0, so dx = 1. -0.5 mod cosh(-0.5): quotient -1, so
        // dy = 1 and dx = 1 + sinh(-0.5).
        let dx = grads["x"].as_f64().unwrap();
        assert_eq!(dx[0], 1.0);
        assert!((dx[1] - (1.0 + (-0.5f64).sinh())).abs() < 1e-15);
    }

    #[test]
    fn kernel_errors_name_the_step() {
        let mut builder = ProgramBuilder::new("mod");
        let x = builder.create_input(DType::I32, &shape(&[1]), "x").unwrap();
        let y = builder.create_input(DType::I32, &shape(&[1]), "y").unwrap();
        let out = builder.modulo(x, y).unwrap();
        let program = builder.build(&[out]).unwrap();

        let backend = CompiledBackend::new();
        let exe = backend.build(&program).unwrap();
        let mut feeds = Feeds::new();
        feeds.insert("x".to_string(), TensorValue::from_i32(shape(&[1]), vec![1]).unwrap());
        feeds.insert("y".to_string(), TensorValue::from_i32(shape(&[1]), vec![0]).unwrap());
        let message = backend.run(&exe, &feeds).unwrap_err().to_string();
        assert!(message.contains("kernel `floor_mod` at step #2 of `mod`"), "{message}");
    }

    #[test]
    fn mismatched_feed_is_rejected() {
        let mut builder = ProgramBuilder::new("cosh");
        let x = builder.create_input(DType::F32, &shape(&[4]), "x").unwrap();
        let out = builder.cosh(x).unwrap();
        let program = builder.build(&[out]).unwrap();

        let backend = CompiledBackend::new();
        let exe = backend.build(&program).unwrap();
        let mut feeds = Feeds::new();
        feeds.insert("x".to_string(), TensorValue::full(shape(&[2, 2]), DType::F32, 0.0));
        let err = backend.run(&exe, &feeds).unwrap_err();
        assert!(matches!(err, BackendError::FeedMismatch { .. }));
    }
}
