use std::collections::HashMap;

use opcheck::backend::{check_feeds, BackendError, BackendResult, GradientMap, OpBackend};
use opcheck::broadcast::reduce_to_dims;
use opcheck::program::{Instruction, Operation, Program, ValueId};
use opcheck::tensor::{Feeds, TensorValue};

use crate::eager::{self, broadcast_offsets, roll_sources, RefTensor};

/// Interprets programs one instruction at a time through the eager operators.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        ReferenceBackend
    }
}

/// A validated program ready for interpretation.
#[derive(Debug, Clone)]
pub struct ReferenceExecutable {
    program: Program,
}

impl ReferenceExecutable {
    pub fn program(&self) -> &Program {
        &self.program
    }
}

impl OpBackend for ReferenceBackend {
    type Executable = ReferenceExecutable;

    fn backend_name(&self) -> &str {
        "reference"
    }

    fn build(&self, program: &Program) -> BackendResult<ReferenceExecutable> {
        program.validate()?;
        Ok(ReferenceExecutable {
            program: program.clone(),
        })
    }

    fn run(&self, executable: &ReferenceExecutable, feeds: &Feeds) -> BackendResult<Vec<TensorValue>> {
        let program = &executable.program;
        let values = evaluate(program, feeds)?;
        program
            .outputs
            .iter()
            .map(|id| {
                values
                    .get(id)
                    .map(|tensor| tensor.value().clone())
                    .ok_or_else(|| BackendError::execution(format!("missing program output {id}")))
            })
            .collect()
    }

    fn compute_gradients(
        &self,
        executable: &ReferenceExecutable,
        feeds: &Feeds,
        output_grads: &[TensorValue],
    ) -> BackendResult<GradientMap> {
        let program = &executable.program;
        if output_grads.len() != program.outputs.len() {
            return Err(BackendError::execution(format!(
                "expected {} output gradients, got {}",
                program.outputs.len(),
                output_grads.len()
            )));
        }
        let values = evaluate(program, feeds)?;

        let mut pending: HashMap<ValueId, Vec<f64>> = HashMap::new();
        for (id, seed) in program.outputs.iter().zip(output_grads.iter()) {
            let output = lookup(&values, *id)?;
            if !output.dtype().is_float() {
                return Err(BackendError::unimplemented(
                    "compute_gradients",
                    format!("output {id} has non-differentiable dtype {}", output.dtype()),
                ));
            }
            if seed.shape() != output.shape() {
                return Err(BackendError::execution(format!(
                    "gradient seed for {id} has shape {} but the output has shape {}",
                    seed.shape(),
                    output.shape()
                )));
            }
            accumulate(&mut pending, *id, seed.to_f64_vec());
        }

        let mut grads = GradientMap::new();
        for instruction in program.body.iter().rev() {
            let Some(grad) = pending.remove(&instruction.id) else {
                continue;
            };
            match &instruction.op {
                Operation::Input { name } => {
                    if instruction.output.dtype.is_float() {
                        let value = TensorValue::from_f64_as(
                            instruction.output.shape.clone(),
                            instruction.output.dtype,
                            &grad,
                        )
                        .map_err(BackendError::execution)?;
                        grads.insert(name.clone(), value);
                    }
                }
                Operation::Roll(spec) => {
                    let dims = instruction.output.shape.dims();
                    let sources = roll_sources(dims, &spec.inverse().plan(dims)?);
                    let operand_grad = sources.iter().map(|&src| grad[src]).collect();
                    accumulate(&mut pending, instruction.operands[0], operand_grad);
                }
                Operation::Cosh => {
                    let x = lookup(&values, instruction.operands[0])?.value().to_f64_vec();
                    let operand_grad = grad.iter().zip(x.iter()).map(|(g, x)| g * x.sinh()).collect();
                    accumulate(&mut pending, instruction.operands[0], operand_grad);
                }
                Operation::Mod => {
                    let (dx, dy) = mod_gradients(instruction, &values, &grad)?;
                    accumulate(&mut pending, instruction.operands[0], dx);
                    accumulate(&mut pending, instruction.operands[1], dy);
                }
            }
        }

        for (instruction, name) in program.inputs() {
            if instruction.output.dtype.is_float() && !grads.contains_key(name) {
                grads.insert(
                    name.to_string(),
                    TensorValue::full(instruction.output.shape.clone(), instruction.output.dtype, 0.0),
                );
            }
        }
        Ok(grads)
    }
}

/// `d/dx = g` and `d/dy = -g * round((x - out) / y)`, each summed over broadcast axes.
fn mod_gradients(
    instruction: &Instruction,
    values: &HashMap<ValueId, RefTensor>,
    grad: &[f64],
) -> BackendResult<(Vec<f64>, Vec<f64>)> {
    let x = lookup(values, instruction.operands[0])?;
    let y = lookup(values, instruction.operands[1])?;
    let out = lookup(values, instruction.id)?;
    let out_dims = out.shape().dims();
    let x_dims = x.shape().dims();
    let y_dims = y.shape().dims();

    let x_values = x.value().to_f64_vec();
    let y_values = y.value().to_f64_vec();
    let out_values = out.value().to_f64_vec();
    let x_offsets = broadcast_offsets(x_dims, out_dims);
    let y_offsets = broadcast_offsets(y_dims, out_dims);

    let dy_full: Vec<f64> = (0..out_values.len())
        .map(|idx| {
            let quotient = (x_values[x_offsets[idx]] - out_values[idx]) / y_values[y_offsets[idx]];
            -grad[idx] * quotient.round()
        })
        .collect();
    Ok((
        reduce_to_dims(grad, out_dims, x_dims),
        reduce_to_dims(&dy_full, out_dims, y_dims),
    ))
}

fn accumulate(pending: &mut HashMap<ValueId, Vec<f64>>, id: ValueId, grad: Vec<f64>) {
    match pending.get_mut(&id) {
        Some(existing) => {
            for (acc, value) in existing.iter_mut().zip(grad) {
                *acc += value;
            }
        }
        None => {
            pending.insert(id, grad);
        }
    }
}

fn lookup(values: &HashMap<ValueId, RefTensor>, id: ValueId) -> BackendResult<&RefTensor> {
    values
        .get(&id)
        .ok_or_else(|| BackendError::execution(format!("value {id} was never computed")))
}

fn evaluate(program: &Program, feeds: &Feeds) -> BackendResult<HashMap<ValueId, RefTensor>> {
    check_feeds(program, feeds)?;
    let mut values: HashMap<ValueId, RefTensor> = HashMap::with_capacity(program.body.len());
    for (index, instruction) in program.body.iter().enumerate() {
        let inputs = instruction
            .operands
            .iter()
            .map(|id| lookup(&values, *id).cloned())
            .collect::<BackendResult<Vec<_>>>()?;
        let output = execute_operation(instruction, &inputs, feeds)
            .map_err(|err| augment_backend_error(err, &program.name, index, instruction, &inputs))?;
        tracing::trace!(
            program = %program.name,
            id = %instruction.id,
            op = instruction.op.name(),
            "evaluated instruction"
        );
        values.insert(instruction.id, output);
    }
    Ok(values)
}

fn execute_operation(
    instruction: &Instruction,
    inputs: &[RefTensor],
    feeds: &Feeds,
) -> BackendResult<RefTensor> {
    match &instruction.op {
        Operation::Input { name } => feeds
            .get(name)
            .map(eager::to_tensor)
            .ok_or_else(|| BackendError::missing_feed(name)),
        Operation::Roll(spec) => eager::roll(expect_single(inputs, "roll")?, &spec.shifts, &spec.axis),
        Operation::Cosh => eager::cosh(expect_single(inputs, "cosh")?),
        Operation::Mod => match inputs {
            [x, y] => eager::modulo(x, y),
            _ => Err(BackendError::execution(format!(
                "mod expects 2 operands, got {}",
                inputs.len()
            ))),
        },
    }
}

fn expect_single<'a>(inputs: &'a [RefTensor], op: &str) -> BackendResult<&'a RefTensor> {
    match inputs {
        [single] => Ok(single),
        _ => Err(BackendError::execution(format!(
            "{op} expects 1 operand, got {}",
            inputs.len()
        ))),
    }
}

fn augment_backend_error(
    error: BackendError,
    program_name: &str,
    index: usize,
    instruction: &Instruction,
    inputs: &[RefTensor],
) -> BackendError {
    let context = format!(
        "program `{}` instruction #{}, {} {} operands [{}]",
        program_name,
        index,
        instruction.op.name(),
        instruction.id,
        format_operands(&instruction.operands, inputs)
    );
    match error {
        BackendError::Execution { message } => BackendError::Execution {
            message: format!("{message} (at {context})"),
        },
        BackendError::Unimplemented { op, reason } => BackendError::Unimplemented {
            op,
            reason: format!("{reason} (while executing {context})"),
        },
        other => other,
    }
}

fn format_operands(operands: &[ValueId], inputs: &[RefTensor]) -> String {
    if operands.is_empty() {
        return String::from("<none>");
    }
    operands
        .iter()
        .zip(inputs.iter())
        .map(|(id, tensor)| format!("{id}: {}{}", tensor.dtype(), tensor.shape()))
        .collect::<Vec<_>>()
        .join(", ")
}
