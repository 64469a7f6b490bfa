//! Case matrix expansion.
//!
//! A suite declares three lists of parameter sets (`inputs`, `dtypes`, `attrs`). Expansion takes
//! their Cartesian product row-major in declaration order, merges each combination (attrs override
//! dtypes override inputs), and names the result `<class_name>_<index>`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broadcast::broadcast_dims;
use crate::error::InvalidShapeError;
use crate::tensor::{DType, Shape};

/// Suffix marking a parameter as a tensor shape.
pub const SHAPE_SUFFIX: &str = "_shape";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl ParamValue {
    fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
            ParamValue::IntList(_) => "int list",
            ParamValue::FloatList(_) => "float list",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

/// Ordered parameter map with typed builder methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, ParamValue>);

impl ParamSet {
    pub fn new() -> Self {
        ParamSet::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Declares a tensor shape. The key should end in `_shape`.
    pub fn shape(self, key: impl Into<String>, dims: &[i64]) -> Self {
        self.set(key, ParamValue::IntList(dims.to_vec()))
    }

    pub fn dtype(self, key: impl Into<String>, dtype: DType) -> Self {
        self.set(key, ParamValue::Str(dtype.name().to_string()))
    }

    pub fn int(self, key: impl Into<String>, value: i64) -> Self {
        self.set(key, ParamValue::Int(value))
    }

    pub fn float(self, key: impl Into<String>, value: f64) -> Self {
        self.set(key, ParamValue::Float(value))
    }

    pub fn ints(self, key: impl Into<String>, values: &[i64]) -> Self {
        self.set(key, ParamValue::IntList(values.to_vec()))
    }

    pub fn flag(self, key: impl Into<String>, value: bool) -> Self {
        self.set(key, ParamValue::Bool(value))
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Merges `other` on top of `self`; colliding keys take `other`'s value.
    fn overlay(&mut self, other: &ParamSet) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaseError {
    #[error("missing parameter `{0}`")]
    MissingParam(String),
    #[error("parameter `{key}` is a {found}, expected {expected}")]
    WrongParamType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("parameter `{key}`: {message}")]
    InvalidValue { key: String, message: String },
}

/// One concrete parameterization. Immutable once expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    name: String,
    class_name: String,
    index: usize,
    params: ParamSet,
}

impl TestCase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    fn require(&self, key: &str) -> Result<&ParamValue, CaseError> {
        self.params
            .get(key)
            .ok_or_else(|| CaseError::MissingParam(key.to_string()))
    }

    pub fn shape(&self, key: &str) -> Result<Shape, CaseError> {
        let dims = self.ints(key)?;
        Shape::new(&dims).map_err(|err| CaseError::InvalidValue {
            key: key.to_string(),
            message: err.to_string(),
        })
    }

    pub fn dtype(&self, key: &str) -> Result<DType, CaseError> {
        match self.require(key)? {
            ParamValue::Str(name) => name.parse().map_err(|err: crate::tensor::UnknownDType| {
                CaseError::InvalidValue {
                    key: key.to_string(),
                    message: err.to_string(),
                }
            }),
            other => Err(wrong_type(key, "dtype name", other)),
        }
    }

    pub fn ints(&self, key: &str) -> Result<Vec<i64>, CaseError> {
        match self.require(key)? {
            ParamValue::IntList(values) => Ok(values.clone()),
            other => Err(wrong_type(key, "int list", other)),
        }
    }

    pub fn int(&self, key: &str) -> Result<i64, CaseError> {
        match self.require(key)? {
            ParamValue::Int(value) => Ok(*value),
            other => Err(wrong_type(key, "int", other)),
        }
    }

    /// Numeric parameter as f64; ints widen.
    pub fn float(&self, key: &str) -> Result<f64, CaseError> {
        match self.require(key)? {
            ParamValue::Float(value) => Ok(*value),
            ParamValue::Int(value) => Ok(*value as f64),
            other => Err(wrong_type(key, "number", other)),
        }
    }

    pub fn float_or(&self, key: &str, default: f64) -> Result<f64, CaseError> {
        if self.params.get(key).is_none() {
            return Ok(default);
        }
        self.float(key)
    }

    pub fn flag_or(&self, key: &str, default: bool) -> Result<bool, CaseError> {
        match self.params.get(key) {
            None => Ok(default),
            Some(ParamValue::Bool(value)) => Ok(*value),
            Some(other) => Err(wrong_type(key, "bool", other)),
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.params)
    }
}

fn wrong_type(key: &str, expected: &'static str, found: &ParamValue) -> CaseError {
    CaseError::WrongParamType {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

/// Expands the Cartesian product of the three declaration lists.
///
/// Fails if any `_shape` parameter is malformed or the shapes of one case cannot broadcast
/// together.
pub fn expand(
    class_name: &str,
    inputs: &[ParamSet],
    dtypes: &[ParamSet],
    attrs: &[ParamSet],
) -> Result<Vec<TestCase>, InvalidShapeError> {
    let single_empty = [ParamSet::new()];
    let inputs = if inputs.is_empty() { &single_empty[..] } else { inputs };
    let dtypes = if dtypes.is_empty() { &single_empty[..] } else { dtypes };
    let attrs = if attrs.is_empty() { &single_empty[..] } else { attrs };

    let mut cases = Vec::with_capacity(inputs.len() * dtypes.len() * attrs.len());
    for input in inputs {
        for dtype in dtypes {
            for attr in attrs {
                let mut params = input.clone();
                params.overlay(dtype);
                params.overlay(attr);
                let index = cases.len();
                let name = format!("{class_name}_{index}");
                validate_shapes(&name, &params)?;
                cases.push(TestCase {
                    name,
                    class_name: class_name.to_string(),
                    index,
                    params,
                });
            }
        }
    }
    Ok(cases)
}

fn validate_shapes(case: &str, params: &ParamSet) -> Result<(), InvalidShapeError> {
    let in_case = |param: &str, source: InvalidShapeError| InvalidShapeError::InCase {
        case: case.to_string(),
        param: param.to_string(),
        source: Box::new(source),
    };
    let mut combined: Option<Vec<usize>> = None;
    for (key, value) in params.iter() {
        if !key.ends_with(SHAPE_SUFFIX) {
            continue;
        }
        let dims = match value {
            ParamValue::IntList(dims) => dims,
            _ => return Err(in_case(key, InvalidShapeError::Empty)),
        };
        let shape = Shape::new(dims).map_err(|err| in_case(key, err))?;
        combined = Some(match combined {
            None => shape.dims().to_vec(),
            Some(acc) => broadcast_dims(&acc, shape.dims()).map_err(|err| in_case(key, err))?,
        });
    }
    Ok(())
}

/// Selects cases by numeric index or by name pattern.
///
/// A filter pattern may match anywhere in the case name (`Cosh*_0` selects `TestCoshOpShape_0`);
/// `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseFilter {
    All,
    Index(usize),
    Pattern(String),
}

impl CaseFilter {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() || text == "*" {
            return CaseFilter::All;
        }
        match text.parse::<usize>() {
            Ok(index) => CaseFilter::Index(index),
            Err(_) => CaseFilter::Pattern(text.to_string()),
        }
    }

    pub fn matches(&self, case: &TestCase) -> bool {
        match self {
            CaseFilter::All => true,
            CaseFilter::Index(index) => case.index == *index,
            CaseFilter::Pattern(pattern) => matches_pattern(&case.name, &format!("*{pattern}*")),
        }
    }
}

/// Anchored glob match: the whole of `value` must match `pattern`, where `*` matches any run
/// of characters (including none). A pattern without `*` is an exact name.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    let mut segments = pattern.split('*');
    let head = segments.next().unwrap_or_default();
    let Some(mut rest) = value.strip_prefix(head) else {
        return false;
    };
    let mut middle: Vec<&str> = segments.collect();
    let Some(tail) = middle.pop() else {
        return rest.is_empty();
    };
    for segment in middle {
        match rest.find(segment) {
            Some(at) => rest = &rest[at + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(x: &[i64], y: &[i64]) -> ParamSet {
        ParamSet::new().shape("x_shape", x).shape("y_shape", y)
    }

    #[test]
    fn product_is_row_major_in_declaration_order() {
        let inputs = vec![pair(&[32], &[32]), pair(&[2, 3], &[2, 3])];
        let dtypes = vec![
            ParamSet::new().dtype("x_dtype", DType::F32),
            ParamSet::new().dtype("x_dtype", DType::F64),
            ParamSet::new().dtype("x_dtype", DType::I32),
        ];
        let cases = expand("TestModOp", &inputs, &dtypes, &[]).unwrap();
        assert_eq!(cases.len(), 6);
        assert_eq!(cases[0].name(), "TestModOp_0");
        assert_eq!(cases[5].name(), "TestModOp_5");
        assert_eq!(cases[1].shape("x_shape").unwrap().dims(), &[32]);
        assert_eq!(cases[1].dtype("x_dtype").unwrap(), DType::F64);
        assert_eq!(cases[3].shape("x_shape").unwrap().dims(), &[2, 3]);
        assert_eq!(cases[3].dtype("x_dtype").unwrap(), DType::F32);
    }

    #[test]
    fn attrs_override_dtypes_override_inputs() {
        let inputs = vec![ParamSet::new().shape("x_shape", &[4]).float("max_relative_error", 1.0)];
        let dtypes = vec![ParamSet::new().float("max_relative_error", 2.0).int("x_low", 0)];
        let attrs = vec![ParamSet::new().int("x_low", -5)];
        let cases = expand("C", &inputs, &dtypes, &attrs).unwrap();
        assert_eq!(cases[0].float("max_relative_error").unwrap(), 2.0);
        assert_eq!(cases[0].int("x_low").unwrap(), -5);
    }

    #[test]
    fn mismatched_lengths_still_cross_multiply() {
        let inputs = vec![pair(&[1], &[1]), pair(&[2], &[2]), pair(&[3], &[3])];
        let dtypes = vec![ParamSet::new().dtype("x_dtype", DType::F32)];
        let attrs = vec![ParamSet::new().int("k", 1), ParamSet::new().int("k", 2)];
        let cases = expand("C", &inputs, &dtypes, &attrs).unwrap();
        assert_eq!(cases.len(), 6);
        let ks: Vec<i64> = cases.iter().map(|case| case.int("k").unwrap()).collect();
        assert_eq!(ks, vec![1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn expansion_is_deterministic() {
        let inputs = vec![pair(&[32], &[1]), pair(&[1, 64], &[32, 1])];
        let attrs = vec![ParamSet::new().int("y_low", 1)];
        let first = expand("B", &inputs, &[], &attrs).unwrap();
        let second = expand("B", &inputs, &[], &attrs).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bad_shapes_fail_expansion() {
        let inputs = vec![ParamSet::new().shape("x_shape", &[0, 3])];
        let err = expand("Bad", &inputs, &[], &[]).unwrap_err();
        assert!(matches!(err, InvalidShapeError::InCase { ref case, .. } if case == "Bad_0"));

        let inputs = vec![pair(&[3, 4], &[2, 4])];
        let err = expand("Bad", &inputs, &[], &[]).unwrap_err();
        match err {
            InvalidShapeError::InCase { source, .. } => {
                assert!(matches!(*source, InvalidShapeError::NotBroadcastable { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn accessors_report_type_errors() {
        let cases = expand("C", &[ParamSet::new().int("axis", 1)], &[], &[]).unwrap();
        assert!(matches!(
            cases[0].ints("axis"),
            Err(CaseError::WrongParamType { .. })
        ));
        assert!(matches!(
            cases[0].int("shifts"),
            Err(CaseError::MissingParam(_))
        ));
        assert_eq!(cases[0].float_or("max_relative_error", 1e-5).unwrap(), 1e-5);
    }

    #[test]
    fn filters_by_index_and_pattern() {
        let inputs = vec![pair(&[1], &[1]), pair(&[2], &[2])];
        let cases = expand("TestCoshOpShape", &inputs, &[], &[]).unwrap();
        assert!(CaseFilter::parse("1").matches(&cases[1]));
        assert!(!CaseFilter::parse("1").matches(&cases[0]));
        assert!(CaseFilter::parse("Cosh*_0").matches(&cases[0]));
        assert!(!CaseFilter::parse("Cosh*_0").matches(&cases[1]));
        assert!(!CaseFilter::parse("*Mod*").matches(&cases[0]));
        assert!(CaseFilter::parse("CoshOp").matches(&cases[1]));
        assert!(CaseFilter::parse("").matches(&cases[1]));
    }

    #[test]
    fn filter_patterns_match_anywhere() {
        let cases = expand("TestCoshOpShape", &[ParamSet::new(), ParamSet::new()], &[], &[]).unwrap();
        assert!(CaseFilter::parse("OpShape_1").matches(&cases[1]));
        assert!(CaseFilter::parse("Shape*1").matches(&cases[1]));
        assert!(!CaseFilter::parse("Shape*1").matches(&cases[0]));
    }

    #[test]
    fn rule_patterns_are_anchored() {
        assert!(matches_pattern("TestCoshOpShape_3", "TestCosh*"));
        assert!(!matches_pattern("TestCoshOpShape_3", "Cosh*"));
        assert!(matches_pattern("TestCoshOpShape_3", "*Cosh*"));
        assert!(matches_pattern("TestCoshOpDtype_0", "TestCoshOpDtype_0"));
        assert!(!matches_pattern("TestCoshOpDtype_10", "TestCoshOpDtype_1"));
        assert!(matches_pattern("TestModOp_12", "Test*Op_*2"));
        assert!(!matches_pattern("ab", "ab*b"));
        assert!(matches_pattern("anything", "*"));
    }
}
