//! Process-wide settings read from the environment once per run.

use std::env;
use std::sync::OnceLock;

use crate::backend::Target;
use crate::case::CaseFilter;

pub const DEFAULT_SEED: u64 = 2024;

static OPCHECK_SEED: OnceLock<u64> = OnceLock::new();
static OPCHECK_FILTER: OnceLock<CaseFilter> = OnceLock::new();
static OPCHECK_TARGET: OnceLock<Target> = OnceLock::new();
static OPCHECK_SUMMARY: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_target(value: &str) -> Option<Target> {
    match value.trim().to_ascii_lowercase().as_str() {
        "host" | "cpu" | "x86" => Some(Target::Host),
        "accelerator" | "gpu" | "cuda" => Some(Target::Accelerator),
        _ => None,
    }
}

/// Run seed mixed into every generated tensor (`OPCHECK_SEED`).
pub fn seed() -> u64 {
    *OPCHECK_SEED.get_or_init(|| match env::var("OPCHECK_SEED") {
        Ok(value) => value.trim().parse().unwrap_or(DEFAULT_SEED),
        Err(_) => DEFAULT_SEED,
    })
}

/// Case selection by name pattern or index (`OPCHECK_FILTER`).
pub fn case_filter() -> CaseFilter {
    OPCHECK_FILTER
        .get_or_init(|| match env::var("OPCHECK_FILTER") {
            Ok(value) => CaseFilter::parse(&value),
            Err(_) => CaseFilter::All,
        })
        .clone()
}

/// Execution target (`OPCHECK_TARGET`); fixed before any case runs.
pub fn target() -> Target {
    *OPCHECK_TARGET.get_or_init(|| match env::var("OPCHECK_TARGET") {
        Ok(value) => parse_target(&value).unwrap_or(Target::Host),
        Err(_) => Target::Host,
    })
}

/// Whether the conformance harness prints its summary table (`OPCHECK_SUMMARY`).
pub fn summary_enabled() -> bool {
    *OPCHECK_SUMMARY.get_or_init(|| match env::var("OPCHECK_SUMMARY") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_and_target_parsing() {
        assert!(parse_bool(" Yes "));
        assert!(!parse_bool("0"));
        assert_eq!(parse_target("CUDA"), Some(Target::Accelerator));
        assert_eq!(parse_target("x86"), Some(Target::Host));
        assert_eq!(parse_target("tpu"), None);
    }
}
