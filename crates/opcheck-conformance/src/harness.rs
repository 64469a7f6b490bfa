use std::sync::Arc;

use anyhow::Context;
use opcheck::backend::OpBackend;
use opcheck::driver::{CaseStatus, Driver, RunConfig, SuiteReport};
use opcheck::env;
use opcheck::executor::DualExecutor;
use opcheck::logging;
use opcheck_backend_ref::ReferenceBackend;

use crate::common;
use crate::suites::Declared;

#[derive(Clone)]
struct TableRow {
    case: String,
    status: String,
    max_relative_error: Option<f64>,
    elapsed_ms: f64,
}

/// Runs one declared suite with the reference backend against `candidate`.
///
/// Returns the report when every selected case passed; otherwise an error listing each failing
/// case with its parameters. A summary table is printed when `OPCHECK_SUMMARY` is set.
pub fn run_suite<C: OpBackend + 'static>(candidate: C, declared: Declared) -> anyhow::Result<SuiteReport> {
    logging::init();
    common::load_config()?;
    let backend_name = candidate.backend_name().to_string();
    let _context_guard = common::set_conformance_context(&backend_name);

    let executor = DualExecutor::new(Arc::new(ReferenceBackend::new()), Arc::new(candidate));
    let driver = Driver::new(executor, RunConfig::from_env());
    let report = driver
        .run(&declared.suite, declared.op)
        .with_context(|| {
            format!(
                "suite {} against backend `{backend_name}`",
                declared.suite.class_name()
            )
        })?;
    tracing::info!(
        class = %report.class_name,
        backend = %backend_name,
        passed = report.passed_count(),
        total = report.outcomes.len(),
        "suite finished"
    );

    if env::summary_enabled() {
        print_summary(&backend_name, &report);
    }
    report.into_result().map_err(anyhow::Error::new)
}

fn rows(report: &SuiteReport) -> Vec<TableRow> {
    report
        .outcomes
        .iter()
        .map(|outcome| TableRow {
            case: outcome.name.clone(),
            status: match outcome.status {
                CaseStatus::Passed => "ok".to_string(),
                CaseStatus::Failed(_) => "fail".to_string(),
            },
            max_relative_error: outcome.max_relative_error,
            elapsed_ms: outcome.elapsed.as_secs_f64() * 1e3,
        })
        .collect()
}

fn print_summary(backend: &str, report: &SuiteReport) {
    if let Some(reason) = &report.skipped {
        println!("{} [{backend}]: skipped ({reason})", report.class_name);
        return;
    }
    println!(
        "{} [{backend}]: {}/{} passed, {} filtered",
        report.class_name,
        report.passed_count(),
        report.outcomes.len(),
        report.filtered
    );
    for line in render_table(&rows(report)) {
        println!("{line}");
    }
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
    Center,
}

fn format_cell(value: &str, width: usize, align: Align) -> String {
    match align {
        Align::Left => format!("{value:<width$}"),
        Align::Right => format!("{value:>width$}"),
        Align::Center => {
            let pad = width.saturating_sub(value.len());
            let left = pad / 2;
            let right = pad - left;
            format!("{}{}{}", " ".repeat(left), value, " ".repeat(right))
        }
    }
}

fn border(widths: &[usize]) -> String {
    let mut line = String::new();
    line.push('+');
    for width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}

fn render_table(rows: &[TableRow]) -> Vec<String> {
    let cells: Vec<[String; 4]> = rows
        .iter()
        .map(|row| {
            [
                row.case.clone(),
                row.status.clone(),
                format_error(row.max_relative_error),
                format_ms(row.elapsed_ms),
            ]
        })
        .collect();
    let headers = ["case", "status", "max_rel", "ms"];
    let aligns = [Align::Left, Align::Center, Align::Right, Align::Right];
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            cells
                .iter()
                .map(|row| row[col].len())
                .max()
                .unwrap_or(0)
                .max(headers[col].len())
        })
        .collect();

    let line = |values: [&str; 4]| {
        let joined = values
            .iter()
            .zip(widths.iter().zip(aligns.iter()))
            .map(|(value, (&width, &align))| format_cell(value, width, align))
            .collect::<Vec<_>>()
            .join(" | ");
        format!("| {joined} |")
    };

    let mut out = vec![border(&widths), line(headers), border(&widths)];
    for row in &cells {
        out.push(line([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
        ]));
    }
    out.push(border(&widths));
    out
}

fn format_error(value: Option<f64>) -> String {
    match value {
        Some(value) if value.is_finite() => format!("{value:.2e}"),
        Some(_) => "inf".to_string(),
        None => "n/a".to_string(),
    }
}

fn format_ms(value: f64) -> String {
    if value.is_finite() {
        format!("{:.3}", value)
    } else {
        "n/a".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_columns_line_up() {
        let rows = vec![
            TableRow {
                case: "TestCoshOpShape_0".to_string(),
                status: "ok".to_string(),
                max_relative_error: Some(1.5e-7),
                elapsed_ms: 0.25,
            },
            TableRow {
                case: "TestCoshOpShape_10".to_string(),
                status: "fail".to_string(),
                max_relative_error: None,
                elapsed_ms: 12.0,
            },
        ];
        let lines = render_table(&rows);
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().all(|line| line.len() == lines[0].len()));
        assert!(lines[3].contains("1.50e-7"));
        assert!(lines[4].contains(" fail "));
        assert!(lines[4].contains("n/a"));
    }

    #[test]
    fn centered_cells_split_padding() {
        assert_eq!(format_cell("ok", 6, Align::Center), "  ok  ");
        assert_eq!(format_cell("ok", 5, Align::Center), " ok  ");
        assert_eq!(format_ms(f64::NAN), "n/a");
    }

    #[test]
    fn reference_against_itself_passes() {
        let report = run_suite(ReferenceBackend::new(), crate::suites::roll::test_roll_op()).unwrap();
        assert_eq!(report.passed_count(), 1);
    }
}
