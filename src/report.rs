use core::fmt;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};
use log::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Projected or scaled gradient fell below the tolerance.
    ConvergedOptimality,
    /// Relative cost reduction fell below the tolerance.
    ConvergedCost,
    /// The unconstrained least-squares solution already satisfies the bounds.
    UnconstrainedOptimum,
    MaxIterations,
    MaxEvaluations,
    /// No step along the search direction satisfied the sufficient decrease test.
    LineSearchFailed,
    /// The trust-region direction was not a descent direction.
    NoProgress,
}

#[derive(Debug, Clone)]
pub struct SolverStats {
    pub status: SolveStatus,
    pub iterations: usize,
    pub evaluations: usize,
    pub cost: f64,
    pub optimality: f64,
    pub step_norm: f64,
}

/// Which trust-region candidate produced the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepChoice {
    /// Full Newton-like step, already inside the box.
    Newton,
    /// Newton-like step, truncated to stay interior.
    Truncated,
    /// Step reflected at the first bound it hits.
    Reflected,
    /// Scaled anti-gradient (Cauchy) step.
    Gradient,
    /// Backtracking along the reflected Newton-like path.
    Backtracked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepDetail {
    LineSearch { step_length: f64, evaluations: usize },
    TrustRegion(StepChoice),
}

impl fmt::Display for StepDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineSearch {
                step_length,
                evaluations,
            } => write!(f, "t={step_length:.1e} ({evaluations})"),
            Self::TrustRegion(choice) => {
                let name = match choice {
                    StepChoice::Newton => "newton",
                    StepChoice::Truncated => "truncated",
                    StepChoice::Reflected => "reflected",
                    StepChoice::Gradient => "gradient",
                    StepChoice::Backtracked => "backtracked",
                };
                f.write_str(name)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    pub cost: f64,
    pub cost_change: f64,
    pub step_norm: f64,
    pub optimality: f64,
    pub step: StepDetail,
}

pub(crate) fn emit_line(line: &str) {
    emit_line_at(Level::Info, line);
}

pub(crate) fn emit_line_at(level: Level, line: &str) {
    if log::log_enabled!(level) {
        log::log!(level, "{line}");
    } else {
        println!("{line}");
    }
}

pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self) {}
}

fn render_table(rows: &[IterationReport]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("iter").set_alignment(CellAlignment::Right),
        Cell::new("cost").set_alignment(CellAlignment::Right),
        Cell::new("change").set_alignment(CellAlignment::Right),
        Cell::new("step").set_alignment(CellAlignment::Right),
        Cell::new("optimality").set_alignment(CellAlignment::Right),
        Cell::new("kind"),
    ]);
    for row in rows {
        table.add_row(vec![
            Cell::new(row.iteration).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.6e}", row.cost)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2e}", row.cost_change)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2e}", row.step_norm)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2e}", row.optimality)).set_alignment(CellAlignment::Right),
            Cell::new(row.step),
        ]);
    }
    table
}

/// Prints an iteration table when the solve finishes.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(Level::Info) {
            println!();
        }
        for line in render_table(&self.rows).to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}

/// Keeps iteration diagnostics in memory until someone asks for them.
///
/// Nothing is written on `on_finish`; call `flush` to emit the captured
/// table, e.g. when the surrounding solve failed.
#[derive(Debug, Default)]
pub struct CapturingReporter {
    rows: Vec<IterationReport>,
}

impl CapturingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[IterationReport] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Captured table as text.
    pub fn output(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        render_table(&self.rows).to_string()
    }

    /// Emit the captured table at error level and forget it.
    pub fn flush(&mut self) {
        for line in self.output().lines() {
            emit_line_at(Level::Error, line);
        }
        self.rows.clear();
    }
}

impl Reporter for CapturingReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }
}

pub(crate) enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    pub(crate) fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    pub(crate) fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }

    pub(crate) fn report(&mut self, report: IterationReport) {
        if let Some(reporter) = self.as_mut() {
            reporter.on_iteration(&report);
        }
    }
}

fn format_duration(duration: Duration) -> String {
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

pub(crate) fn finish_stats(
    stats: SolverStats,
    start_time: Option<Instant>,
    reporter: &mut ReporterSlot<'_>,
) -> SolverStats {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish();
    }
    if let Some(start) = start_time {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!("status: {:?}, time: {elapsed}", stats.status));
    }
    stats
}
