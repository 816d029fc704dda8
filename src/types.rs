//! Core data types and fixed accounting conventions for the MF adjuster.
//!
//! This module defines the journal row that flows through every pipeline stage,
//! the residual map, the summary records and the report returned to callers.
//!
//! # Type Aliases
//!
//! - [`Amount`]: Monetary amounts (Decimal)
//! - [`ResidualMap`]: Net GL-5104 residual per unit (BTreeMap<String, Amount>)
//!
//! # Core Types
//!
//! - [`JournalRow`]: One journal-entry line, mutated in place by the pipeline
//! - [`SummaryRecord`]: Per-unit totals (plus the trailing grand total)
//! - [`PipelineReport`]: Counters describing one pipeline run
//!
//! # Conventions
//!
//! Column names and GL codes are fixed. Account matching is plain substring
//! containment (`5104`) or prefix (`500`), never structured parsing of the code.
//!
//! # Examples
//!
//! ```
//! use mf_adjuster::types::{format_money, parse_amount_lenient};
//! use rust_decimal::Decimal;
//! use std::str::FromStr;
//!
//! assert_eq!(parse_amount_lenient(" 852.00 "), Decimal::from_str("852.00").unwrap());
//! assert_eq!(parse_amount_lenient("n/a"), Decimal::ZERO);
//! assert_eq!(format_money(Decimal::from(852)), "852.00");
//! ```

use log::warn;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

pub type Amount = Decimal;
pub type ResidualMap = BTreeMap<String, Amount>;

pub const UNIT_COLUMN: &str = "Unit";
pub const GL_ACCOUNT_COLUMN: &str = "GL Account";
pub const DEBIT_COLUMN: &str = "Debit";
pub const CREDIT_COLUMN: &str = "Credit";
pub const TRANSACTION_COLUMN: &str = "Transaction";
pub const SOURCE_COLUMN: &str = "Source";
pub const REFERENCE_COLUMN: &str = "Reference";

/// Columns that must be present in the input header.
pub const REQUIRED_COLUMNS: [&str; 4] =
    [UNIT_COLUMN, GL_ACCOUNT_COLUMN, DEBIT_COLUMN, CREDIT_COLUMN];

/// GL account whose credits minus debits form a unit's residual.
pub const RESIDUAL_ACCOUNT: &str = "5104";

/// GL prefix of manufacturing cost accounts eligible for reduction.
pub const MF_ACCOUNT_PREFIX: &str = "500";

pub const SERVICE_CHARGE_KEYWORDS: [&str; 7] = [
    "SERVICE CHARGE",
    "SERVICE FEE",
    "SERV CHARGE",
    "SERV FEE",
    "SERVICE SALES",
    "SERVICE-CHARGE",
    "SERVICECHARGE",
];

pub const GRAND_TOTAL_LABEL: &str = "GRAND TOTAL";

/// One journal-entry line.
///
/// Rows are created by the normalizer and then mutated in place by the later
/// stages. The raw text of every source column is kept in `fields` so that
/// columns the pipeline does not interpret are passed through to the output.
///
/// # Fields
///
/// - `debit` / `credit`: Lenient numeric values; `debit` is the only field the
///   distributor reduces
/// - `service_charge`: Set once by the classifier
/// - `adjustment`: Empty until the row is adjusted, then
///   `Adjusted by <applied> (was <original>)`
/// - `total_adjusted`: The unit's residual, stamped on the first adjusted row
///   of the unit only. `None` is distinct from zero.
/// - `consolidated`: Post-adjustment credit/debit delta, `None` until the
///   consolidator has run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JournalRow {
    pub unit: String,
    pub gl_account: String,
    pub transaction: String,
    pub source: String,
    pub reference: String,
    pub debit: Amount,
    pub credit: Amount,
    pub service_charge: bool,
    pub adjustment: String,
    pub total_adjusted: Option<Amount>,
    pub consolidated: Option<Amount>,
    pub fields: HashMap<String, String>,
}

impl JournalRow {
    /// Builds a row from a raw header-keyed record. Missing text becomes an
    /// empty string and unparsable amounts become zero.
    pub fn from_record(record: &HashMap<String, String>) -> Self {
        let text = |column: &str| record.get(column).cloned().unwrap_or_default();
        let amount = |column: &str| {
            record
                .get(column)
                .map(|value| parse_amount_lenient(value))
                .unwrap_or(Decimal::ZERO)
        };

        JournalRow {
            unit: text(UNIT_COLUMN),
            gl_account: text(GL_ACCOUNT_COLUMN),
            transaction: text(TRANSACTION_COLUMN),
            source: text(SOURCE_COLUMN),
            reference: text(REFERENCE_COLUMN),
            debit: amount(DEBIT_COLUMN),
            credit: amount(CREDIT_COLUMN),
            service_charge: false,
            adjustment: String::new(),
            total_adjusted: None,
            consolidated: None,
            fields: record.clone(),
        }
    }

    /// True when the GL account contains `5104` anywhere in its text.
    pub fn is_residual_account(&self) -> bool {
        self.gl_account.contains(RESIDUAL_ACCOUNT)
    }

    /// True when the GL account text starts with `500`.
    pub fn is_mf_account(&self) -> bool {
        self.gl_account.starts_with(MF_ACCOUNT_PREFIX)
    }

    pub fn is_adjusted(&self) -> bool {
        !self.adjustment.is_empty()
    }
}

/// Per-unit totals emitted by the summary builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    #[serde(rename = "Unit")]
    pub unit: String,
    #[serde(rename = "Total Adjusted")]
    pub total_adjusted: Amount,
    #[serde(rename = "Rows Adjusted")]
    pub rows_adjusted: usize,
    #[serde(rename = "Debit Reduction")]
    pub debit_reduction: Amount,
    #[serde(rename = "Consolidated")]
    pub consolidated: Amount,
}

impl SummaryRecord {
    pub fn empty(unit: impl Into<String>) -> Self {
        SummaryRecord {
            unit: unit.into(),
            total_adjusted: Decimal::ZERO,
            rows_adjusted: 0,
            debit_reduction: Decimal::ZERO,
            consolidated: Decimal::ZERO,
        }
    }

    pub fn is_grand_total(&self) -> bool {
        self.unit == GRAND_TOTAL_LABEL
    }
}

/// Counters describing a completed pipeline run.
///
/// `units_with_residual` counts every unit present in the residual map, i.e.
/// every unit with any GL-5104 activity, whether or not it was adjusted.
/// `unapplied` lists units whose eligible debits ran out before the residual
/// was exhausted, with the remainder that could not be placed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineReport {
    pub total_rows: usize,
    pub rows_adjusted: usize,
    pub units_with_residual: usize,
    pub units_adjusted: usize,
    pub unapplied: BTreeMap<String, Amount>,
}

/// Parses an amount leniently.
///
/// Surrounding whitespace is trimmed. Empty or non-numeric text yields zero
/// instead of an error; scientific notation is accepted. Numbers beyond the
/// range of [`Amount`] saturate to `Decimal::MAX` / `Decimal::MIN`.
pub fn parse_amount_lenient(value: &str) -> Amount {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Decimal::ZERO;
    }
    if let Ok(amount) =
        Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed))
    {
        return amount;
    }
    match trimmed.parse::<f64>() {
        Ok(number) if number.is_nan() => Decimal::ZERO,
        Ok(number) => Decimal::from_f64(number).unwrap_or_else(|| {
            warn!("Amount {} exceeds the supported range, saturating", trimmed);
            if number > 0.0 { Decimal::MAX } else { Decimal::MIN }
        }),
        Err(_) => Decimal::ZERO,
    }
}

/// Renders an amount with exactly two decimal places, rounding half away
/// from zero.
pub fn format_money(value: Amount) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}
