use std::time::Duration;

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

use crate::orchestrator::{AttemptReport, Stage};
use crate::properties::MatrixProperties;
use crate::regularize::RegularizationReport;

/// Flat status code for a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Success,
    /// Structural CSC violation.
    InvalidFormat,
    /// A working buffer could not be allocated.
    AllocationFailure(usize),
    /// The argument at this position was rejected.
    IllegalArgument(usize),
    /// Exact zero pivot at this row.
    SingularAt(usize),
    /// Backend allocation failure of this many bytes.
    OutOfMemory(usize),
    InternalError(i32),
}

impl SolveStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Summary of a successful solve.
#[derive(Debug, Clone)]
pub struct SolverStats {
    pub properties: MatrixProperties,
    /// `None` when regularization is disabled.
    pub regularization: Option<RegularizationReport>,
    /// Smallest and largest row factor, `None` when equilibration is disabled.
    pub row_scale: Option<(f64, f64)>,
    pub col_scale: Option<(f64, f64)>,
    pub attempts: Vec<AttemptReport>,
    /// `||A x - b||_inf / ||b||_inf` against the caller's matrix.
    pub relative_residual: f64,
    /// Bytes of working buffers allocated for the call.
    pub workspace_bytes: usize,
}

impl SolverStats {
    /// True when the fallback attempt produced the solution.
    pub fn retried(&self) -> bool {
        self.attempts.iter().any(|a| a.stage == Stage::Fallback)
    }
}

/// Preprocessing summary handed to a reporter before the backend runs.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub nrows: usize,
    pub ncols: usize,
    pub nnz: usize,
    pub properties: MatrixProperties,
    pub regularization: Option<RegularizationReport>,
    pub row_scale: Option<(f64, f64)>,
    pub col_scale: Option<(f64, f64)>,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

pub trait Reporter {
    fn on_analysis(&mut self, _report: &AnalysisReport) {}
    fn on_attempt(&mut self, report: &AttemptReport);
    fn on_finish(&mut self) {}
}

/// Collects the analysis and attempts, then prints them as tables.
pub struct StdoutReporter {
    analysis: Option<AnalysisReport>,
    attempts: Vec<AttemptReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self {
            analysis: None,
            attempts: Vec::new(),
        }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_analysis(&mut self, report: &AnalysisReport) {
        self.analysis = Some(report.clone());
    }

    fn on_attempt(&mut self, report: &AttemptReport) {
        self.attempts.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.analysis.is_none() && self.attempts.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        if let Some(analysis) = self.analysis.take() {
            for line in analysis_table(&analysis).to_string().lines() {
                emit_line(line);
            }
        }
        if !self.attempts.is_empty() {
            for line in attempt_table(&self.attempts).to_string().lines() {
                emit_line(line);
            }
        }
        self.attempts.clear();
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn analysis_table(a: &AnalysisReport) -> Table {
    let mut table = new_table();
    table.set_header(vec![Cell::new("analysis"), Cell::new("value")]);
    let mut row = |key: &str, value: String| {
        table.add_row(vec![
            Cell::new(key),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    };
    row("shape", format!("{}x{} nnz={}", a.nrows, a.ncols, a.nnz));
    row("cond est", format!("{:.2e}", a.properties.condition_estimate));
    row("diag ratio", format!("{:.2e}", a.properties.diag_ratio));
    row(
        "likely singular",
        if a.properties.likely_singular { "yes" } else { "no" }.to_string(),
    );
    if let Some(reg) = &a.regularization {
        row(
            "rows empty/missing/weak",
            format!(
                "{}/{}/{}",
                reg.empty_rows, reg.missing_diagonals, reg.weak_diagonals
            ),
        );
        row(
            "regularization",
            match reg.magnitude {
                Some(m) => format!("{m:.1e}"),
                None => "-".to_string(),
            },
        );
    }
    if let Some((lo, hi)) = a.row_scale {
        row("row scale", format!("[{lo:.1e}, {hi:.1e}]"));
    }
    if let Some((lo, hi)) = a.col_scale {
        row("col scale", format!("[{lo:.1e}, {hi:.1e}]"));
    }
    table
}

fn attempt_table(attempts: &[AttemptReport]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("attempt"),
        Cell::new("policy"),
        Cell::new("result"),
        Cell::new("time").set_alignment(CellAlignment::Right),
    ]);
    for attempt in attempts {
        let stage = match attempt.stage {
            Stage::Primary => "primary",
            Stage::Fallback => "fallback",
        };
        let result = match &attempt.result {
            Ok(()) => "ok".to_string(),
            Err(err) => err.to_string(),
        };
        table.add_row(vec![
            Cell::new(stage),
            Cell::new(attempt.policy),
            Cell::new(result),
            Cell::new(format_duration(attempt.elapsed)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}
