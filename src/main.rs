//! MF residual adjustment tool.
//!
//! This program reads a CSV file of journal entries, redistributes each unit's
//! GL-5104 credit residual across its manufacturing cost debits, and writes an
//! annotated spreadsheet.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- journal.csv -o journal_adjusted.xlsx
//! ```
//!
//! # Input Format
//!
//! The input CSV file must contain the columns:
//! - `Unit`: Cost-center identifier
//! - `GL Account`: General-ledger account code
//! - `Debit`: Debit amount (empty or non-numeric is read as 0)
//! - `Credit`: Credit amount (empty or non-numeric is read as 0)
//!
//! `Transaction`, `Source`, `Reference` and any other columns are passed
//! through unchanged. `Reference` also takes part in service-charge detection.
//!
//! # Output
//!
//! An `.xlsx` workbook with an `Adjusted Data` sheet and a `Summary` sheet.
//! With `--summary-csv` the summary is also written to stdout as CSV.
//!
//! Set `RUST_LOG=info` (or `debug`) to see what each stage did.
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::io;
use std::path::{Path, PathBuf};

use mf_adjuster::run_pipeline;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CSV file of journal entries
    input: PathBuf,

    /// Workbook to write; defaults to `<input>_adjusted.xlsx` next to the input
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also print the per-unit summary to stdout as CSV
    #[arg(long)]
    summary_csv: bool,

    /// Skip writing the workbook
    #[arg(long)]
    no_xlsx: bool,
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "journal".to_string());
    input.with_file_name(format!("{}_adjusted.xlsx", stem))
}

/// Main entry point for the adjustment tool.
///
/// Runs the pipeline over the input file, then renders the outcome. Any
/// fatal error aborts before the workbook is written.
fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let outcome = run_pipeline(&cli.input)
        .with_context(|| format!("Failed to process {}", cli.input.display()))?;

    if !cli.no_xlsx {
        let output = cli.output.clone().unwrap_or_else(|| default_output(&cli.input));
        outcome
            .write_workbook(&output)
            .with_context(|| format!("Failed to write workbook: {}", output.display()))?;
        info!("Workbook written to {}", output.display());
    }

    if cli.summary_csv {
        outcome
            .write_summary_csv(io::stdout())
            .context("Failed to write summary to stdout")?;
    }

    eprintln!(
        "total rows: {}, rows adjusted: {}, units with GL-5104 activity: {}",
        outcome.report.total_rows, outcome.report.rows_adjusted, outcome.report.units_with_residual
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output(Path::new("data/journal.csv")),
            PathBuf::from("data/journal_adjusted.xlsx")
        );
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from(["mf-adjuster", "in.csv", "-o", "out.xlsx", "--summary-csv"]);
        assert_eq!(cli.input, PathBuf::from("in.csv"));
        assert_eq!(cli.output, Some(PathBuf::from("out.xlsx")));
        assert!(cli.summary_csv);
        assert!(!cli.no_xlsx);
    }
}
