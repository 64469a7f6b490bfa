//! Logical operator programs shared by both backends.
//!
//! A [`Program`] is a small SSA list: named inputs followed by `roll`/`cosh`/`mod` instructions,
//! with designated outputs. [`ProgramBuilder`] performs shape and dtype inference while the
//! program is assembled, so both backends receive an already-typed description.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broadcast::broadcast_shapes;
use crate::error::InvalidShapeError;
use crate::tensor::{DType, Shape};

/// Identifier for SSA values inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Static type of a program value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    pub shape: Shape,
    pub dtype: DType,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

/// Attributes of `roll`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollSpec {
    pub shifts: Vec<i64>,
    /// Axes to roll along. Empty means flatten, roll, and restore the shape.
    pub axis: Vec<i64>,
}

/// `roll` attributes resolved against a concrete shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollPlan {
    /// Roll the flattened buffer by this many positions.
    Flat(usize),
    /// Effective shift per axis, each in `0..dim`.
    Axes(Vec<usize>),
}

impl RollSpec {
    /// Normalizes negative axes, accumulates repeated axes, and reduces shifts modulo the
    /// dimension size.
    pub fn plan(&self, dims: &[usize]) -> Result<RollPlan, ProgramError> {
        if self.axis.is_empty() {
            if self.shifts.len() != 1 {
                return Err(ProgramError::InvalidAttribute {
                    op: "roll",
                    message: format!(
                        "flattened roll takes exactly one shift, got {:?}",
                        self.shifts
                    ),
                });
            }
            let total: usize = dims.iter().product();
            return Ok(RollPlan::Flat(euclid(self.shifts[0], total)));
        }
        if self.shifts.len() != self.axis.len() {
            return Err(ProgramError::InvalidAttribute {
                op: "roll",
                message: format!(
                    "shifts {:?} and axis {:?} differ in length",
                    self.shifts, self.axis
                ),
            });
        }
        let rank = dims.len() as i64;
        let mut accumulated = vec![0i128; dims.len()];
        for (&shift, &axis) in self.shifts.iter().zip(self.axis.iter()) {
            if axis < -rank || axis >= rank {
                return Err(ProgramError::InvalidAttribute {
                    op: "roll",
                    message: format!("axis {axis} out of range for rank {rank}"),
                });
            }
            let axis = if axis < 0 { axis + rank } else { axis } as usize;
            accumulated[axis] += i128::from(shift);
        }
        let shifts = accumulated
            .iter()
            .zip(dims.iter())
            .map(|(&shift, &dim)| shift.rem_euclid(dim as i128) as usize)
            .collect();
        Ok(RollPlan::Axes(shifts))
    }

    /// Attributes that undo this roll.
    pub fn inverse(&self) -> RollSpec {
        RollSpec {
            shifts: self.shifts.iter().map(|shift| shift.wrapping_neg()).collect(),
            axis: self.axis.clone(),
        }
    }
}

fn euclid(shift: i64, size: usize) -> usize {
    i128::from(shift).rem_euclid(size as i128) as usize
}

/// Declarative form of the operators under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Input { name: String },
    Roll(RollSpec),
    Cosh,
    /// Floor modulo; the result takes the sign of the divisor.
    Mod,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Input { .. } => "input",
            Operation::Roll(_) => "roll",
            Operation::Cosh => "cosh",
            Operation::Mod => "mod",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub output: ValueType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub body: Vec<Instruction>,
    pub outputs: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("{op}: {message}")]
    InvalidAttribute { op: &'static str, message: String },
    #[error("{op}: operand dtypes {lhs} and {rhs} differ")]
    DTypeMismatch {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },
    #[error("{op} does not support dtype {dtype}")]
    UnsupportedDType { op: &'static str, dtype: DType },
    #[error("{op}: {source}")]
    Shape {
        op: &'static str,
        #[source]
        source: InvalidShapeError,
    },
    #[error("unknown value {0}")]
    UnknownValue(ValueId),
    #[error("duplicate input name `{0}`")]
    DuplicateInput(String),
    #[error("{op} expects {expected} operands, got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("program `{0}` has no outputs")]
    NoOutputs(String),
    #[error("{id}: declared type {declared} but inferred {inferred}")]
    TypeMismatch {
        id: ValueId,
        declared: ValueType,
        inferred: ValueType,
    },
}

/// Infers the result type of `op` applied to `operands`.
pub fn infer_type(op: &Operation, operands: &[&ValueType]) -> Result<ValueType, ProgramError> {
    let arity = |expected: usize| {
        if operands.len() == expected {
            Ok(())
        } else {
            Err(ProgramError::Arity {
                op: op.name(),
                expected,
                actual: operands.len(),
            })
        }
    };
    match op {
        Operation::Input { .. } => Err(ProgramError::InvalidAttribute {
            op: "input",
            message: "inputs carry a declared type".to_string(),
        }),
        Operation::Roll(spec) => {
            arity(1)?;
            spec.plan(operands[0].shape.dims())?;
            Ok(operands[0].clone())
        }
        Operation::Cosh => {
            arity(1)?;
            if !operands[0].dtype.is_float() {
                return Err(ProgramError::UnsupportedDType {
                    op: "cosh",
                    dtype: operands[0].dtype,
                });
            }
            Ok(operands[0].clone())
        }
        Operation::Mod => {
            arity(2)?;
            let (lhs, rhs) = (operands[0], operands[1]);
            if lhs.dtype != rhs.dtype {
                return Err(ProgramError::DTypeMismatch {
                    op: "mod",
                    lhs: lhs.dtype,
                    rhs: rhs.dtype,
                });
            }
            if lhs.dtype == DType::Bool {
                return Err(ProgramError::UnsupportedDType {
                    op: "mod",
                    dtype: DType::Bool,
                });
            }
            let shape = broadcast_shapes(&lhs.shape, &rhs.shape)
                .map_err(|source| ProgramError::Shape { op: "mod", source })?;
            Ok(ValueType {
                shape,
                dtype: lhs.dtype,
            })
        }
    }
}

impl Program {
    /// Input instructions in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = (&Instruction, &str)> {
        self.body.iter().filter_map(|inst| match &inst.op {
            Operation::Input { name } => Some((inst, name.as_str())),
            _ => None,
        })
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs().map(|(_, name)| name).collect()
    }

    pub fn instruction(&self, id: ValueId) -> Option<&Instruction> {
        self.body.iter().find(|inst| inst.id == id)
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.instruction(id).map(|inst| &inst.output)
    }

    pub fn output_types(&self) -> Result<Vec<ValueType>, ProgramError> {
        self.outputs
            .iter()
            .map(|id| {
                self.value_type(*id)
                    .cloned()
                    .ok_or(ProgramError::UnknownValue(*id))
            })
            .collect()
    }

    /// Re-runs inference over the body and checks every declared type, operand reference, and
    /// output. Backends call this before lowering programs they did not build themselves.
    pub fn validate(&self) -> Result<(), ProgramError> {
        let mut types: HashMap<ValueId, &ValueType> = HashMap::new();
        let mut names: Vec<&str> = Vec::new();
        for inst in &self.body {
            let operand_types = inst
                .operands
                .iter()
                .map(|id| types.get(id).copied().ok_or(ProgramError::UnknownValue(*id)))
                .collect::<Result<Vec<_>, _>>()?;
            if let Operation::Input { name } = &inst.op {
                if names.contains(&name.as_str()) {
                    return Err(ProgramError::DuplicateInput(name.clone()));
                }
                names.push(name);
            } else {
                let inferred = infer_type(&inst.op, &operand_types)?;
                if inferred != inst.output {
                    return Err(ProgramError::TypeMismatch {
                        id: inst.id,
                        declared: inst.output.clone(),
                        inferred,
                    });
                }
            }
            types.insert(inst.id, &inst.output);
        }
        if self.outputs.is_empty() {
            return Err(ProgramError::NoOutputs(self.name.clone()));
        }
        for id in &self.outputs {
            if !types.contains_key(id) {
                return Err(ProgramError::UnknownValue(*id));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program @{} {{", self.name)?;
        for inst in &self.body {
            write!(f, "  {} = ", inst.id)?;
            match &inst.op {
                Operation::Input { name } => write!(f, "input \"{name}\"")?,
                Operation::Roll(spec) => {
                    write!(f, "roll")?;
                    write_operands(f, &inst.operands)?;
                    write!(f, " {{shifts = {:?}, axis = {:?}}}", spec.shifts, spec.axis)?;
                }
                op => {
                    write!(f, "{}", op.name())?;
                    write_operands(f, &inst.operands)?;
                }
            }
            writeln!(f, " : {}", inst.output)?;
        }
        write!(f, "  return")?;
        write_operands(f, &self.outputs)?;
        writeln!(f)?;
        write!(f, "}}")
    }
}

fn write_operands(f: &mut fmt::Formatter<'_>, operands: &[ValueId]) -> fmt::Result {
    for (idx, id) in operands.iter().enumerate() {
        if idx == 0 {
            write!(f, " {id}")?;
        } else {
            write!(f, ", {id}")?;
        }
    }
    Ok(())
}

/// Assembles a typed [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    name: String,
    next_value_id: u32,
    body: Vec<Instruction>,
    value_types: HashMap<ValueId, ValueType>,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ProgramBuilder {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares a named input slot.
    pub fn create_input(
        &mut self,
        dtype: DType,
        shape: &Shape,
        name: impl Into<String>,
    ) -> Result<ValueId, ProgramError> {
        let name = name.into();
        let duplicate = self
            .body
            .iter()
            .any(|inst| matches!(&inst.op, Operation::Input { name: existing } if *existing == name));
        if duplicate {
            return Err(ProgramError::DuplicateInput(name));
        }
        let ty = ValueType {
            shape: shape.clone(),
            dtype,
        };
        Ok(self.push(Operation::Input { name }, Vec::new(), ty))
    }

    pub fn roll(&mut self, x: ValueId, shifts: &[i64], axis: &[i64]) -> Result<ValueId, ProgramError> {
        let spec = RollSpec {
            shifts: shifts.to_vec(),
            axis: axis.to_vec(),
        };
        self.emit(Operation::Roll(spec), vec![x])
    }

    pub fn cosh(&mut self, x: ValueId) -> Result<ValueId, ProgramError> {
        self.emit(Operation::Cosh, vec![x])
    }

    /// Floor modulo of `x` by `y` with broadcasting.
    pub fn modulo(&mut self, x: ValueId, y: ValueId) -> Result<ValueId, ProgramError> {
        self.emit(Operation::Mod, vec![x, y])
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.value_types.get(&id)
    }

    pub fn build(self, outputs: &[ValueId]) -> Result<Program, ProgramError> {
        if outputs.is_empty() {
            return Err(ProgramError::NoOutputs(self.name));
        }
        if let Some(missing) = outputs.iter().find(|id| !self.value_types.contains_key(id)) {
            return Err(ProgramError::UnknownValue(*missing));
        }
        Ok(Program {
            name: self.name,
            body: self.body,
            outputs: outputs.to_vec(),
        })
    }

    fn emit(&mut self, op: Operation, operands: Vec<ValueId>) -> Result<ValueId, ProgramError> {
        let operand_types = operands
            .iter()
            .map(|id| self.value_types.get(id).ok_or(ProgramError::UnknownValue(*id)))
            .collect::<Result<Vec<_>, _>>()?;
        let output = infer_type(&op, &operand_types)?;
        Ok(self.push(op, operands, output))
    }

    fn push(&mut self, op: Operation, operands: Vec<ValueId>, output: ValueType) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.value_types.insert(id, output.clone());
        self.body.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dims: &[i64]) -> Shape {
        Shape::new(dims).unwrap()
    }

    #[test]
    fn roll_plan_normalizes_and_accumulates() {
        let spec = RollSpec {
            shifts: vec![3, 4, 10, 3],
            axis: vec![0, 1, 2, -1],
        };
        assert_eq!(spec.plan(&[1, 2, 3]).unwrap(), RollPlan::Axes(vec![0, 0, 1]));

        let spec = RollSpec {
            shifts: vec![3, -8],
            axis: vec![0, 1],
        };
        assert_eq!(spec.plan(&[1, 2, 3]).unwrap(), RollPlan::Axes(vec![0, 0, 0]));

        let spec = RollSpec {
            shifts: vec![1],
            axis: vec![],
        };
        assert_eq!(spec.plan(&[1, 2, 3]).unwrap(), RollPlan::Flat(1));
    }

    #[test]
    fn roll_rejects_bad_axes() {
        let spec = RollSpec {
            shifts: vec![1],
            axis: vec![3],
        };
        assert!(spec.plan(&[1, 2, 3]).is_err());
        let spec = RollSpec {
            shifts: vec![1, 2],
            axis: vec![0],
        };
        assert!(spec.plan(&[4]).is_err());
    }

    #[test]
    fn mod_broadcasts_and_checks_dtypes() {
        let mut builder = ProgramBuilder::new("mod");
        let x = builder.create_input(DType::F32, &shape(&[1, 64]), "x").unwrap();
        let y = builder.create_input(DType::F32, &shape(&[32, 1]), "y").unwrap();
        let out = builder.modulo(x, y).unwrap();
        assert_eq!(builder.value_type(out).unwrap().shape.dims(), &[32, 64]);

        let z = builder.create_input(DType::I32, &shape(&[1]), "z").unwrap();
        assert!(matches!(
            builder.modulo(x, z),
            Err(ProgramError::DTypeMismatch { .. })
        ));
        let program = builder.build(&[out]).unwrap();
        program.validate().unwrap();
        assert_eq!(program.input_names(), vec!["x", "y", "z"]);
    }

    #[test]
    fn cosh_requires_float() {
        let mut builder = ProgramBuilder::new("cosh");
        let x = builder.create_input(DType::I64, &shape(&[4]), "x").unwrap();
        assert!(matches!(
            builder.cosh(x),
            Err(ProgramError::UnsupportedDType { op: "cosh", .. })
        ));
    }

    #[test]
    fn validate_catches_tampered_types() {
        let mut builder = ProgramBuilder::new("roll");
        let x = builder.create_input(DType::F32, &shape(&[2, 3]), "x").unwrap();
        let out = builder.roll(x, &[1], &[1]).unwrap();
        let mut program = builder.build(&[out]).unwrap();
        program.body[1].output.dtype = DType::F64;
        assert!(matches!(
            program.validate(),
            Err(ProgramError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn display_dumps_every_instruction() {
        let mut builder = ProgramBuilder::new("roll");
        let x = builder.create_input(DType::F32, &shape(&[1, 2, 3]), "x").unwrap();
        let out = builder.roll(x, &[3], &[1]).unwrap();
        let text = builder.build(&[out]).unwrap().to_string();
        assert!(text.contains("%0 = input \"x\" : float32[1, 2, 3]"));
        assert!(text.contains("%1 = roll %0 {shifts = [3], axis = [1]}"));
        assert!(text.contains("return %1"));
    }
}
