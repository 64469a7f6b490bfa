//! Tolerance overrides loaded from `configs/conformance.json`.
//!
//! Resolution order for one case: the dtype default, the file's `default` block, the case's own
//! `max_relative_error`, then the most specific matching rule (backend only, test only, backend
//! and test).

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use opcheck::case::matches_pattern;
use opcheck::compare::Tolerance;
use opcheck::tensor::DType;
use serde::Deserialize;

static CONFORMANCE_CONFIG: OnceLock<ConformanceConfig> = OnceLock::new();
thread_local! {
    static CONFORMANCE_CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConformanceConfig {
    #[serde(default)]
    default: Option<ToleranceConfig>,
    #[serde(default)]
    rules: Vec<ToleranceRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ToleranceRule {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    test: Option<String>,
    #[serde(default)]
    atol: Option<f64>,
    #[serde(default)]
    rtol: Option<f64>,
    #[serde(default)]
    epsilon: Option<f64>,
}

impl ToleranceRule {
    fn overrides(&self) -> ToleranceConfig {
        ToleranceConfig {
            atol: self.atol,
            rtol: self.rtol,
            epsilon: self.epsilon,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct ToleranceConfig {
    #[serde(default)]
    atol: Option<f64>,
    #[serde(default)]
    rtol: Option<f64>,
    #[serde(default)]
    epsilon: Option<f64>,
}

/// Restores the previous candidate backend name on drop.
pub struct ConformanceContextGuard {
    prev: Option<String>,
}

/// Names the candidate backend that tolerance rules are matched against on this thread.
pub fn set_conformance_context(backend: &str) -> ConformanceContextGuard {
    CONFORMANCE_CONTEXT.with(|slot| {
        let prev = slot.borrow_mut().replace(backend.to_string());
        ConformanceContextGuard { prev }
    })
}

impl Drop for ConformanceContextGuard {
    fn drop(&mut self) {
        CONFORMANCE_CONTEXT.with(|slot| {
            *slot.borrow_mut() = self.prev.take();
        });
    }
}

fn current_backend() -> Option<String> {
    CONFORMANCE_CONTEXT.with(|slot| slot.borrow().clone())
}

fn config_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/conformance.json")
}

pub fn parse_config(contents: &str) -> anyhow::Result<ConformanceConfig> {
    serde_json::from_str(contents).context("malformed conformance config")
}

/// Loads the rule file once per process. A missing file means no overrides.
pub fn load_config() -> anyhow::Result<&'static ConformanceConfig> {
    if let Some(config) = CONFORMANCE_CONFIG.get() {
        return Ok(config);
    }
    let path = config_path();
    let config = if path.exists() {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read conformance config {}", path.display()))?;
        parse_config(&contents).with_context(|| format!("in {}", path.display()))?
    } else {
        ConformanceConfig::default()
    };
    Ok(CONFORMANCE_CONFIG.get_or_init(|| config))
}

fn apply(target: &mut Tolerance, overrides: &ToleranceConfig) {
    if let Some(atol) = overrides.atol {
        target.atol = Some(atol);
    }
    if let Some(rtol) = overrides.rtol {
        target.rtol = rtol;
    }
    if let Some(epsilon) = overrides.epsilon {
        target.epsilon = epsilon;
    }
}

impl ConformanceConfig {
    pub fn resolve(
        &self,
        backend: Option<&str>,
        case_name: &str,
        dtype: DType,
        declared_rtol: Option<f64>,
    ) -> Tolerance {
        let mut resolved = Tolerance::for_dtype(dtype);
        if let Some(defaults) = &self.default {
            apply(&mut resolved, defaults);
        }
        if let Some(rtol) = declared_rtol {
            resolved.rtol = rtol;
        }

        let mut backend_rule: Option<ToleranceConfig> = None;
        let mut test_rule: Option<ToleranceConfig> = None;
        let mut backend_test_rule: Option<ToleranceConfig> = None;
        for rule in &self.rules {
            let backend_match = match (rule.backend.as_deref(), backend) {
                (Some(pattern), Some(name)) => matches_pattern(name, pattern),
                _ => false,
            };
            let test_match = rule
                .test
                .as_deref()
                .map(|pattern| matches_pattern(case_name, pattern))
                .unwrap_or(false);
            match (backend_match, test_match) {
                (true, true) => backend_test_rule = Some(rule.overrides()),
                (false, true) if rule.backend.is_none() => test_rule = Some(rule.overrides()),
                (true, false) if rule.test.is_none() => backend_rule = Some(rule.overrides()),
                _ => {}
            }
        }
        for rule in [backend_rule, test_rule, backend_test_rule].iter().flatten() {
            apply(&mut resolved, rule);
        }
        resolved
    }
}

/// Tolerance for `case_name` under the current candidate backend.
pub fn resolve_tolerance(case_name: &str, dtype: DType, declared_rtol: Option<f64>) -> Tolerance {
    let backend = current_backend();
    match CONFORMANCE_CONFIG.get() {
        Some(config) => config.resolve(backend.as_deref(), case_name, dtype, declared_rtol),
        None => ConformanceConfig::default().resolve(None, case_name, dtype, declared_rtol),
    }
}
