//! Lowering of logical programs into slot-addressed kernel steps.
//!
//! Everything that depends only on shapes (roll rotation passes, broadcast strides) is resolved
//! here, once per program, so execution is a flat loop over precomputed steps.

use std::collections::HashMap;

use opcheck::backend::{BackendError, BackendResult};
use opcheck::broadcast::broadcast_strides;
use opcheck::program::{Operation, Program, ProgramError, RollPlan, RollSpec, ValueId, ValueType};
use opcheck::tensor::DType;

/// Rotation of contiguous `[outer, dim, inner]` blocks by `shift` rows along `dim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollPass {
    pub outer: usize,
    pub dim: usize,
    pub inner: usize,
    pub shift: usize,
}

/// A roll decomposed into independent single-axis rotations. Zero shifts are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RollKernel {
    pub passes: Vec<RollPass>,
}

impl RollKernel {
    pub fn from_spec(spec: &RollSpec, dims: &[usize]) -> Result<Self, ProgramError> {
        let passes = match spec.plan(dims)? {
            RollPlan::Flat(shift) => {
                let total = dims.iter().product();
                vec![RollPass {
                    outer: 1,
                    dim: total,
                    inner: 1,
                    shift,
                }]
            }
            RollPlan::Axes(shifts) => shifts
                .iter()
                .enumerate()
                .map(|(axis, &shift)| RollPass {
                    outer: dims[..axis].iter().product(),
                    dim: dims[axis],
                    inner: dims[axis + 1..].iter().product(),
                    shift,
                })
                .collect(),
        };
        Ok(RollKernel {
            passes: passes.into_iter().filter(|pass| pass.shift != 0).collect(),
        })
    }

    pub fn apply<T: Copy>(&self, src: &[T]) -> Vec<T> {
        let mut current = src.to_vec();
        if self.passes.is_empty() {
            return current;
        }
        let mut scratch = current.clone();
        for pass in &self.passes {
            let block_len = pass.dim * pass.inner;
            let head = pass.shift * pass.inner;
            let split = block_len - head;
            for block in 0..pass.outer {
                let base = block * block_len;
                let input = &current[base..base + block_len];
                let output = &mut scratch[base..base + block_len];
                output[..head].copy_from_slice(&input[split..]);
                output[head..].copy_from_slice(&input[..split]);
            }
            std::mem::swap(&mut current, &mut scratch);
        }
        current
    }
}

/// Broadcasting layout of a binary element-wise kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryKernel {
    pub out_dims: Vec<usize>,
    pub lhs_dims: Vec<usize>,
    pub rhs_dims: Vec<usize>,
    pub lhs_strides: Vec<usize>,
    pub rhs_strides: Vec<usize>,
}

impl BinaryKernel {
    pub fn new(lhs_dims: &[usize], rhs_dims: &[usize], out_dims: &[usize]) -> Self {
        BinaryKernel {
            out_dims: out_dims.to_vec(),
            lhs_dims: lhs_dims.to_vec(),
            rhs_dims: rhs_dims.to_vec(),
            lhs_strides: broadcast_strides(lhs_dims, out_dims),
            rhs_strides: broadcast_strides(rhs_dims, out_dims),
        }
    }

    /// Calls `f(out, lhs, rhs)` with flat offsets for every output element in row-major order.
    pub fn for_each(&self, mut f: impl FnMut(usize, usize, usize)) {
        let total: usize = self.out_dims.iter().product();
        let rank = self.out_dims.len();
        let mut coords = vec![0usize; rank];
        let (mut lhs, mut rhs) = (0usize, 0usize);
        for out in 0..total {
            f(out, lhs, rhs);
            for axis in (0..rank).rev() {
                coords[axis] += 1;
                lhs += self.lhs_strides[axis];
                rhs += self.rhs_strides[axis];
                if coords[axis] < self.out_dims[axis] {
                    break;
                }
                lhs -= self.lhs_strides[axis] * coords[axis];
                rhs -= self.rhs_strides[axis] * coords[axis];
                coords[axis] = 0;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kernel {
    Load { name: String },
    Roll { forward: RollKernel, backward: RollKernel },
    Cosh,
    FloorMod(BinaryKernel),
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Load { .. } => "load",
            Kernel::Roll { .. } => "roll",
            Kernel::Cosh => "cosh",
            Kernel::FloorMod(_) => "floor_mod",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kernel: Kernel,
    pub operands: Vec<usize>,
    pub slot: usize,
    pub ty: ValueType,
}

/// A program lowered to dense value slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub name: String,
    pub steps: Vec<Step>,
    pub outputs: Vec<usize>,
}

impl CompiledProgram {
    pub fn slot_count(&self) -> usize {
        self.steps.len()
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, &Step)> {
        self.steps.iter().filter_map(|step| match &step.kernel {
            Kernel::Load { name } => Some((name.as_str(), step)),
            _ => None,
        })
    }
}

pub fn lower(program: &Program) -> BackendResult<CompiledProgram> {
    program.validate()?;
    let mut slots: HashMap<ValueId, usize> = HashMap::with_capacity(program.body.len());
    let mut steps: Vec<Step> = Vec::with_capacity(program.body.len());

    for instruction in &program.body {
        let operands = instruction
            .operands
            .iter()
            .map(|id| {
                slots
                    .get(id)
                    .copied()
                    .ok_or(BackendError::InvalidProgram(ProgramError::UnknownValue(*id)))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let dims = instruction.output.shape.dims();
        let dtype = instruction.output.dtype;
        let kernel = match &instruction.op {
            Operation::Input { name } => Kernel::Load { name: name.clone() },
            Operation::Roll(spec) => Kernel::Roll {
                forward: RollKernel::from_spec(spec, dims)?,
                backward: RollKernel::from_spec(&spec.inverse(), dims)?,
            },
            Operation::Cosh => {
                if !dtype.is_float() {
                    return Err(BackendError::unsupported_dtype("cosh", dtype));
                }
                Kernel::Cosh
            }
            Operation::Mod => {
                if dtype == DType::Bool {
                    return Err(BackendError::unsupported_dtype("mod", dtype));
                }
                let lhs = &steps[operands[0]];
                let rhs = &steps[operands[1]];
                Kernel::FloorMod(BinaryKernel::new(
                    step_dims(lhs),
                    step_dims(rhs),
                    dims,
                ))
            }
        };
        let slot = steps.len();
        slots.insert(instruction.id, slot);
        steps.push(Step {
            kernel,
            operands,
            slot,
            ty: instruction.output.clone(),
        });
    }

    let outputs = program
        .outputs
        .iter()
        .map(|id| {
            slots
                .get(id)
                .copied()
                .ok_or(BackendError::InvalidProgram(ProgramError::UnknownValue(*id)))
        })
        .collect::<BackendResult<Vec<_>>>()?;

    Ok(CompiledProgram {
        name: program.name.clone(),
        steps,
        outputs,
    })
}

fn step_dims(step: &Step) -> &[usize] {
    step.ty.shape.dims()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcheck::program::ProgramBuilder;
    use opcheck::tensor::Shape;

    fn roll_kernel(dims: &[usize], shifts: &[i64], axis: &[i64]) -> RollKernel {
        let spec = RollSpec {
            shifts: shifts.to_vec(),
            axis: axis.to_vec(),
        };
        RollKernel::from_spec(&spec, dims).unwrap()
    }

    #[test]
    fn roll_passes_rotate_blocks() {
        let kernel = roll_kernel(&[2, 3], &[1], &[1]);
        assert_eq!(
            kernel.passes,
            vec![RollPass {
                outer: 2,
                dim: 3,
                inner: 1,
                shift: 1
            }]
        );
        assert_eq!(kernel.apply(&[0, 1, 2, 3, 4, 5]), vec![2, 0, 1, 5, 3, 4]);

        let kernel = roll_kernel(&[2, 3], &[1, 121], &[0, -1]);
        assert_eq!(kernel.apply(&[0, 1, 2, 3, 4, 5]), vec![5, 3, 4, 2, 0, 1]);
    }

    #[test]
    fn flat_roll_and_identity() {
        let kernel = roll_kernel(&[2, 3], &[2], &[]);
        assert_eq!(kernel.apply(&[0, 1, 2, 3, 4, 5]), vec![4, 5, 0, 1, 2, 3]);

        let kernel = roll_kernel(&[4], &[8], &[0]);
        assert!(kernel.passes.is_empty());
        assert_eq!(kernel.apply(&[1, 2, 3, 4]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn backward_roll_undoes_forward() {
        let spec = RollSpec {
            shifts: vec![3, -5],
            axis: vec![0, 2],
        };
        let dims = [3, 2, 4];
        let forward = RollKernel::from_spec(&spec, &dims).unwrap();
        let backward = RollKernel::from_spec(&spec.inverse(), &dims).unwrap();
        let values: Vec<u32> = (0..24).collect();
        assert_eq!(backward.apply(&forward.apply(&values)), values);
    }

    #[test]
    fn binary_kernel_walks_broadcast_offsets() {
        let kernel = BinaryKernel::new(&[2, 1], &[3], &[2, 3]);
        let mut seen = Vec::new();
        kernel.for_each(|out, lhs, rhs| seen.push((out, lhs, rhs)));
        assert_eq!(
            seen,
            vec![(0, 0, 0), (1, 0, 1), (2, 0, 2), (3, 1, 0), (4, 1, 1), (5, 1, 2)]
        );
    }

    #[test]
    fn lowering_assigns_dense_slots() {
        let shape = Shape::new(&[4, 1]).unwrap();
        let mut builder = ProgramBuilder::new("chain");
        let x = builder.create_input(DType::F32, &shape, "x").unwrap();
        let y = builder.create_input(DType::F32, &Shape::new(&[3]).unwrap(), "y").unwrap();
        let c = builder.cosh(x).unwrap();
        let m = builder.modulo(c, y).unwrap();
        let program = builder.build(&[m]).unwrap();

        let compiled = lower(&program).unwrap();
        assert_eq!(compiled.slot_count(), 4);
        assert_eq!(compiled.outputs, vec![3]);
        assert_eq!(compiled.steps[3].operands, vec![2, 1]);
        let names: Vec<&str> = compiled.inputs().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["x", "y"]);
        match &compiled.steps[3].kernel {
            Kernel::FloorMod(kernel) => {
                assert_eq!(kernel.out_dims, vec![4, 3]);
                assert_eq!(kernel.lhs_strides, vec![1, 0]);
                assert_eq!(kernel.rhs_strides, vec![0, 1]);
            }
            other => panic!("unexpected kernel {other:?}"),
        }
    }
}
