//! Input/Output operations for the MF adjuster.
//!
//! This module reads journal-entry CSV files into header-keyed records and
//! writes the per-unit summary back out in CSV format.

use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{AdjusterError, Result};
use crate::types::{REQUIRED_COLUMNS, SummaryRecord};

/// A parsed CSV table: the header row in file order plus one
/// header-keyed record per data line, in file order.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<HashMap<String, String>>,
}

/// Reads and validates a journal-entry CSV file.
///
/// # Errors
///
/// This function will return an error if:
/// - The file cannot be opened (`InputNotFound`)
/// - A line cannot be parsed (`Csv`) or has more fields than the header
///   (`MalformedLine`)
/// - The file has a header but no data rows (`EmptyInput`)
/// - Any of the required columns is absent from the header (`MissingColumns`)
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<RawTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| AdjusterError::InputNotFound {
        path: path.display().to_string(),
        source,
    })?;

    let table = load_records_from_reader(file)?;
    info!(
        "Loaded {} rows with {} columns from {}",
        table.records.len(),
        table.headers.len(),
        path.display()
    );
    Ok(table)
}

/// Same as [`load_records`], reading from any byte source.
pub fn load_records_from_reader<R: Read>(source: R) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(source);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.len() > headers.len() {
            return Err(AdjusterError::MalformedLine {
                line: record.position().map_or(0, |position| position.line()),
                expected: headers.len(),
                found: record.len(),
            });
        }
        // Short rows simply lack the trailing columns.
        let fields: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        records.push(fields);
    }

    if records.is_empty() {
        return Err(AdjusterError::EmptyInput);
    }

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header == *column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AdjusterError::MissingColumns(missing));
    }

    debug!("Input header: {:?}", headers);

    Ok(RawTable { headers, records })
}

/// Writes the summary table (including the grand total) as CSV.
///
/// # Errors
///
/// This function will return an error if:
/// - Serialization of any summary record fails
/// - Flushing the output buffer fails
pub fn write_summary_csv<W: Write>(summary: &[SummaryRecord], output: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);

    for record in summary {
        writer.serialize(record)?;
    }

    writer.flush()?;

    Ok(())
}
