//! # MF Adjuster
//!
//! Redistributes each unit's GL-5104 credit residual across that unit's
//! manufacturing cost debits (GL accounts prefixed `500`) and produces an
//! annotated spreadsheet.
//!
//! ## Pipeline
//!
//! 1. **Loader**: reads the CSV and validates the required columns
//! 2. **Normalizer**: lenient amount parsing, derived fields seeded
//! 3. **Service-charge classifier**: keyword match on GL account or reference
//! 4. **Residual calculator**: credits minus debits on GL-5104 rows, per unit
//! 5. **Adjustment distributor**: greedy reduction of eligible debit rows
//! 6. **Consolidator**: post-adjustment credit/debit delta per row
//! 7. **Summary builder**: per-unit totals plus a grand total
//! 8. **Renderer**: `.xlsx` workbook with a data sheet and a summary sheet
//!
//! Every stage works in place on one row buffer owned by the pipeline run;
//! row order from the source file is preserved throughout.
//!
//! ## Example
//!
//! ```no_run
//! use mf_adjuster::run_pipeline;
//!
//! fn main() -> mf_adjuster::Result<()> {
//!     let outcome = run_pipeline("journal.csv")?;
//!     let report = &outcome.report;
//!     println!("{} of {} rows adjusted", report.rows_adjusted, report.total_rows);
//!     outcome.write_workbook("journal_adjusted.xlsx")?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod io;
pub mod render;
pub mod types;

pub use engine::{
    DistributionOutcome, build_summary, classify_service_charges, compute_residuals, consolidate,
    distribute_adjustments, extract_original, normalize, process_rows,
};
pub use error::{AdjusterError, Result};
pub use io::{RawTable, load_records, load_records_from_reader, write_summary_csv};
pub use render::write_workbook;
pub use types::*;

use log::info;
use std::path::Path;

/// Everything one pipeline run produces, ready for rendering.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Source header row, in file order.
    pub headers: Vec<String>,
    pub rows: Vec<JournalRow>,
    pub residuals: ResidualMap,
    pub summary: Vec<SummaryRecord>,
    pub report: PipelineReport,
}

impl PipelineOutcome {
    pub fn write_workbook<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        render::write_workbook(&self.headers, &self.rows, &self.summary, path)
    }

    pub fn write_summary_csv<W: std::io::Write>(&self, output: W) -> Result<()> {
        io::write_summary_csv(&self.summary, output)
    }
}

/// Loads `path` and runs every stage up to the summary.
pub fn run_pipeline<P: AsRef<Path>>(path: P) -> Result<PipelineOutcome> {
    let table = load_records(path)?;
    Ok(process_table(table, &ResidualMap::new()))
}

/// Runs every in-memory stage over an already loaded table.
///
/// Entries in `overrides` replace computed residuals before distribution.
pub fn process_table(table: RawTable, overrides: &ResidualMap) -> PipelineOutcome {
    let mut rows = normalize(&table);
    let (residuals, report) = process_rows(&mut rows, overrides);
    let summary = build_summary(&rows);

    info!(
        "Processed {} rows: {} adjusted, {} units with GL-5104 activity",
        report.total_rows, report.rows_adjusted, report.units_with_residual
    );

    PipelineOutcome {
        headers: table.headers,
        rows,
        residuals,
        summary,
        report,
    }
}
