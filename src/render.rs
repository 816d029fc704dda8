//! Spreadsheet rendering of an adjusted row set.
//!
//! Writes an `.xlsx` workbook with two sheets: the full data listing, with
//! adjusted rows highlighted, and the per-unit summary with a highlighted
//! grand total.

use std::path::Path;

use log::info;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook, Worksheet};

use crate::error::Result;
use crate::types::{Amount, CREDIT_COLUMN, DEBIT_COLUMN, JournalRow, SummaryRecord};

pub const DATA_SHEET: &str = "Adjusted Data";
pub const SUMMARY_SHEET: &str = "Summary";

/// Columns appended to the data sheet after the source columns.
pub const DERIVED_COLUMNS: [&str; 4] =
    ["Service Charge", "Adjustment", "Total Adjusted", "Consolidated"];

pub const SUMMARY_COLUMNS: [&str; 5] = [
    "Unit",
    "Total Adjusted",
    "Rows Adjusted",
    "Debit Reduction",
    "Consolidated",
];

const MONEY_FORMAT: &str = "#,##0.00";
const ADJUSTED_FILL: u32 = 0xFFF2CC;
const TOTAL_FILL: u32 = 0xD9D9D9;

/// Cell formats for one visual state (plain or highlighted).
struct Styles {
    text: Format,
    money: Format,
}

impl Styles {
    fn new(fill: Option<u32>, bold: bool) -> Self {
        let mut text = Format::new();
        let mut money = Format::new().set_num_format(MONEY_FORMAT);
        if let Some(rgb) = fill {
            text = text.set_background_color(Color::RGB(rgb));
            money = money.set_background_color(Color::RGB(rgb));
        }
        if bold {
            text = text.set_bold();
            money = money.set_bold();
        }
        Styles { text, money }
    }
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_border_bottom(FormatBorder::Thin)
}

fn to_number(amount: Amount) -> f64 {
    amount.to_f64().unwrap_or(0.0)
}

fn write_headers<'a, I>(worksheet: &mut Worksheet, headers: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let format = header_format();
    for (col, header) in headers.into_iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &format)?;
        worksheet.set_column_width(col as u16, (header.len() as f64 + 4.0).max(12.0))?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_data_sheet(
    worksheet: &mut Worksheet,
    headers: &[String],
    rows: &[JournalRow],
) -> Result<()> {
    worksheet.set_name(DATA_SHEET)?;
    write_headers(
        worksheet,
        headers
            .iter()
            .map(String::as_str)
            .chain(DERIVED_COLUMNS.iter().copied()),
    )?;

    let plain = Styles::new(None, false);
    let highlighted = Styles::new(Some(ADJUSTED_FILL), false);

    for (idx, row) in rows.iter().enumerate() {
        let row_num = (idx + 1) as u32;
        let styles = if row.is_adjusted() { &highlighted } else { &plain };
        let money = |worksheet: &mut Worksheet, col: u16, amount: Amount| {
            worksheet
                .write_number_with_format(row_num, col, to_number(amount), &styles.money)
                .map(|_| ())
        };

        for (col, header) in headers.iter().enumerate() {
            let col = col as u16;
            match header.as_str() {
                DEBIT_COLUMN => {
                    money(worksheet, col, row.debit)?;
                }
                CREDIT_COLUMN => {
                    money(worksheet, col, row.credit)?;
                }
                _ => {
                    let value = row.fields.get(header).map(String::as_str).unwrap_or("");
                    worksheet.write_string_with_format(row_num, col, value, &styles.text)?;
                }
            }
        }

        let base = headers.len() as u16;
        worksheet.write_boolean_with_format(row_num, base, row.service_charge, &styles.text)?;
        worksheet.write_string_with_format(row_num, base + 1, &row.adjustment, &styles.text)?;
        match row.total_adjusted {
            Some(total) => {
                money(worksheet, base + 2, total)?;
            }
            None => {
                worksheet.write_blank(row_num, base + 2, &styles.money)?;
            }
        }
        match row.consolidated {
            Some(delta) => {
                money(worksheet, base + 3, delta)?;
            }
            None => {
                worksheet.write_blank(row_num, base + 3, &styles.money)?;
            }
        }
    }

    Ok(())
}

fn write_summary_sheet(worksheet: &mut Worksheet, summary: &[SummaryRecord]) -> Result<()> {
    worksheet.set_name(SUMMARY_SHEET)?;
    write_headers(worksheet, SUMMARY_COLUMNS.iter().copied())?;

    let plain = Styles::new(None, false);
    let total = Styles::new(Some(TOTAL_FILL), true);

    for (idx, record) in summary.iter().enumerate() {
        let row_num = (idx + 1) as u32;
        let styles = if record.is_grand_total() { &total } else { &plain };

        let money = |worksheet: &mut Worksheet, col: u16, amount: Amount| {
            worksheet
                .write_number_with_format(row_num, col, to_number(amount), &styles.money)
                .map(|_| ())
        };

        worksheet.write_string_with_format(row_num, 0, &record.unit, &styles.text)?;
        money(worksheet, 1, record.total_adjusted)?;
        worksheet.write_number_with_format(row_num, 2, record.rows_adjusted as f64, &styles.text)?;
        money(worksheet, 3, record.debit_reduction)?;
        money(worksheet, 4, record.consolidated)?;
    }

    Ok(())
}

/// Writes the data and summary sheets to `path`.
///
/// # Errors
///
/// Returns `Render` if a worksheet cannot be built or the file cannot be saved.
pub fn write_workbook<P: AsRef<Path>>(
    headers: &[String],
    rows: &[JournalRow],
    summary: &[SummaryRecord],
    path: P,
) -> Result<()> {
    let mut workbook = Workbook::new();

    write_data_sheet(workbook.add_worksheet(), headers, rows)?;
    write_summary_sheet(workbook.add_worksheet(), summary)?;

    workbook.save(path.as_ref())?;
    info!(
        "Wrote {} rows and {} summary records to {}",
        rows.len(),
        summary.len(),
        path.as_ref().display()
    );

    Ok(())
}
