//! Adjustment engine for redistributing GL-5104 residuals.
//!
//! This module provides the pipeline stages that run after loading: normalizing
//! raw records, tagging service charges, computing per-unit residuals, greedily
//! reducing manufacturing debits, consolidating per-row deltas and summarizing
//! the result per unit. Every stage works on the same row buffer, in place and
//! in insertion order.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use log::{debug, info, warn};
use rust_decimal::Decimal;

use crate::io::RawTable;
use crate::types::{
    Amount, GRAND_TOTAL_LABEL, JournalRow, PipelineReport, ResidualMap, SERVICE_CHARGE_KEYWORDS,
    SummaryRecord, format_money,
};

/// What one distribution pass did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DistributionOutcome {
    pub rows_adjusted: usize,
    pub units_adjusted: usize,
    /// Residual left over per unit once its eligible debits were exhausted,
    /// including units that had no eligible rows at all.
    pub unapplied: BTreeMap<String, Amount>,
}

/// Converts raw header-keyed records into journal rows, preserving order.
///
/// Amounts are parsed leniently, so this stage never fails.
pub fn normalize(table: &RawTable) -> Vec<JournalRow> {
    table.records.iter().map(JournalRow::from_record).collect()
}

/// Case-insensitive keyword containment on the GL account or the reference.
pub fn is_service_charge(gl_account: &str, reference: &str) -> bool {
    let gl_account = gl_account.to_uppercase();
    let reference = reference.to_uppercase();
    SERVICE_CHARGE_KEYWORDS
        .iter()
        .any(|keyword| gl_account.contains(keyword) || reference.contains(keyword))
}

/// Sets the service-charge flag on every row and returns how many were flagged.
pub fn classify_service_charges(rows: &mut [JournalRow]) -> usize {
    let mut flagged = 0;
    for row in rows.iter_mut() {
        row.service_charge = is_service_charge(&row.gl_account, &row.reference);
        if row.service_charge {
            flagged += 1;
        }
    }
    debug!("Flagged {} service charge rows", flagged);
    flagged
}

/// Aggregates credits minus debits over every GL-5104 row, per unit.
///
/// # Returns
///
/// Returns a map that contains exactly the units having at least one 5104 row.
/// Residuals may be zero or negative. Sums saturate at the bounds of [`Amount`].
pub fn compute_residuals(rows: &[JournalRow]) -> ResidualMap {
    let mut sums: BTreeMap<String, (Amount, Amount)> = BTreeMap::new();

    for row in rows.iter().filter(|row| row.is_residual_account()) {
        let entry = sums
            .entry(row.unit.clone())
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 = entry.0.saturating_add(row.credit);
        entry.1 = entry.1.saturating_add(row.debit);
    }

    sums.into_iter()
        .map(|(unit, (credits, debits))| (unit, credits.saturating_sub(debits)))
        .collect()
}

/// Greedily reduces each unit's manufacturing debits by its positive residual.
///
/// For every unit with a strictly positive residual, the eligible rows (same
/// unit, GL starting with `500`, not a service charge, positive debit) are
/// walked ordered by GL account ascending and debit descending. Each row
/// absorbs as much of the remaining residual as its debit allows. Touched rows
/// get an annotation; the first touched row of a unit also carries the unit's
/// residual in `total_adjusted`.
///
/// Units with a zero or negative residual, or without eligible rows, are left
/// untouched.
pub fn distribute_adjustments(
    rows: &mut [JournalRow],
    residuals: &ResidualMap,
) -> DistributionOutcome {
    let mut outcome = DistributionOutcome::default();
    let mut written_units: HashSet<String> = HashSet::new();

    for (unit, &residual) in residuals {
        if residual <= Decimal::ZERO {
            continue;
        }

        let mut eligible: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.unit == *unit
                    && row.is_mf_account()
                    && !row.service_charge
                    && row.debit > Decimal::ZERO
            })
            .map(|(idx, _)| idx)
            .collect();

        if eligible.is_empty() {
            warn!("Unit {} has residual {} but no eligible debit rows", unit, residual);
            outcome.unapplied.insert(unit.clone(), residual);
            continue;
        }

        eligible.sort_by(|&a, &b| {
            rows[a]
                .gl_account
                .cmp(&rows[b].gl_account)
                .then_with(|| rows[b].debit.cmp(&rows[a].debit))
        });

        let mut remaining = residual;
        let mut touched = 0;

        for idx in eligible {
            if remaining <= Decimal::ZERO {
                break;
            }

            let row = &mut rows[idx];
            let original = row.debit;
            if original <= Decimal::ZERO {
                continue;
            }

            let applied = if original >= remaining {
                remaining
            } else {
                original
            };
            row.debit = original - applied;
            remaining -= applied;

            if applied > Decimal::ZERO {
                row.adjustment = format!(
                    "Adjusted by {} (was {})",
                    format_money(applied),
                    format_money(original)
                );
                if written_units.insert(unit.clone()) {
                    row.total_adjusted = Some(residual);
                }
                touched += 1;
                debug!(
                    "Unit {}: GL {} debit {} -> {}",
                    unit, row.gl_account, original, row.debit
                );
            }
        }

        if touched > 0 {
            outcome.rows_adjusted += touched;
            outcome.units_adjusted += 1;
        }

        if remaining > Decimal::ZERO {
            warn!(
                "Unit {}: eligible debits exhausted with {} of residual {} unapplied",
                unit, remaining, residual
            );
            outcome.unapplied.insert(unit.clone(), remaining);
        }
    }

    info!(
        "Adjusted {} rows across {} units",
        outcome.rows_adjusted, outcome.units_adjusted
    );
    outcome
}

/// Recomputes credit minus debit on every row.
///
/// GL-5104 rows keep the signed delta, all other rows store its absolute value.
/// Depends only on the current debit and credit, so running it twice is harmless.
pub fn consolidate(rows: &mut [JournalRow]) {
    for row in rows.iter_mut() {
        let delta = row.credit.saturating_sub(row.debit);
        row.consolidated = Some(if row.is_residual_account() {
            delta
        } else {
            delta.abs()
        });
    }
}

/// Recovers the pre-adjustment debit from an `Adjusted by .. (was ..)` annotation.
///
/// Falls back to `current` when the annotation is empty or the value after
/// `was` does not parse.
pub fn extract_original(annotation: &str, current: Amount) -> Amount {
    let Some((_, tail)) = annotation.rsplit_once("was") else {
        return current;
    };
    let value = tail.trim().trim_end_matches(')').trim();
    Decimal::from_str(value).unwrap_or(current)
}

/// Groups rows by unit into totals, sorted by unit, followed by a grand total.
///
/// Totals saturate at the bounds of [`Amount`] instead of overflowing.
pub fn build_summary(rows: &[JournalRow]) -> Vec<SummaryRecord> {
    let mut groups: BTreeMap<&str, SummaryRecord> = BTreeMap::new();

    for row in rows {
        let record = groups
            .entry(row.unit.as_str())
            .or_insert_with(|| SummaryRecord::empty(row.unit.as_str()));

        record.total_adjusted = record
            .total_adjusted
            .saturating_add(row.total_adjusted.unwrap_or(Decimal::ZERO));
        if row.is_adjusted() {
            record.rows_adjusted += 1;
        }
        let original = extract_original(&row.adjustment, row.debit);
        let reduction = original.saturating_sub(row.debit).max(Decimal::ZERO);
        record.debit_reduction = record.debit_reduction.saturating_add(reduction);
        record.consolidated = record
            .consolidated
            .saturating_add(row.consolidated.unwrap_or(Decimal::ZERO));
    }

    let mut summary: Vec<SummaryRecord> = groups.into_values().collect();

    let grand_total = summary
        .iter()
        .fold(SummaryRecord::empty(GRAND_TOTAL_LABEL), |mut total, record| {
            total.total_adjusted = total.total_adjusted.saturating_add(record.total_adjusted);
            total.rows_adjusted += record.rows_adjusted;
            total.debit_reduction = total.debit_reduction.saturating_add(record.debit_reduction);
            total.consolidated = total.consolidated.saturating_add(record.consolidated);
            total
        });
    summary.push(grand_total);

    summary
}

/// Runs every in-memory stage after normalization, in order.
///
/// `overrides` replaces individual residuals after they are computed and
/// before distribution; units absent from the computed map are not added.
///
/// # Returns
///
/// Returns the residual map used for distribution and the run's report.
pub fn process_rows(
    rows: &mut [JournalRow],
    overrides: &ResidualMap,
) -> (ResidualMap, PipelineReport) {
    classify_service_charges(rows);

    let mut residuals = compute_residuals(rows);
    for (unit, value) in overrides {
        if let Some(residual) = residuals.get_mut(unit) {
            *residual = *value;
        }
    }
    info!("Computed residuals for {} units", residuals.len());

    let distribution = distribute_adjustments(rows, &residuals);
    consolidate(rows);

    let report = PipelineReport {
        total_rows: rows.len(),
        rows_adjusted: distribution.rows_adjusted,
        units_with_residual: residuals.len(),
        units_adjusted: distribution.units_adjusted,
        unapplied: distribution.unapplied,
    };

    (residuals, report)
}

#[cfg(test)]
fn row(unit: &str, gl: &str, debit: &str, credit: &str) -> JournalRow {
    use std::str::FromStr;

    JournalRow {
        unit: unit.to_string(),
        gl_account: gl.to_string(),
        debit: Decimal::from_str(debit).unwrap(),
        credit: Decimal::from_str(credit).unwrap(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn scenario_a() -> Vec<JournalRow> {
        vec![
            row("129", "5104", "0", "26.15"),
            row("129", "5001", "852.00", "0"),
            row("129", "5002", "450.00", "0"),
            row("128", "5001", "200.00", "0"),
        ]
    }

    #[test]
    fn scenario_a_adjusts_single_row() {
        let mut rows = scenario_a();
        let (residuals, report) = process_rows(&mut rows, &ResidualMap::new());

        assert_eq!(residuals.get("129"), Some(&dec("26.15")));
        assert!(!residuals.contains_key("128"));

        assert_eq!(rows[1].debit, dec("825.85"));
        assert_eq!(rows[1].adjustment, "Adjusted by 26.15 (was 852.00)");
        assert_eq!(rows[1].total_adjusted, Some(dec("26.15")));

        // GL 5002 and unit 128 untouched
        assert_eq!(rows[2].debit, dec("450.00"));
        assert_eq!(rows[2].adjustment, "");
        assert_eq!(rows[3].debit, dec("200.00"));
        assert_eq!(rows[3].total_adjusted, None);

        assert_eq!(report.total_rows, 4);
        assert_eq!(report.rows_adjusted, 1);
        assert_eq!(report.units_with_residual, 1);
        assert!(report.unapplied.is_empty());
    }

    #[test]
    fn scenario_b_sums_multiple_credits() {
        let rows = vec![
            row("130", "5104", "0", "25.00"),
            row("130", "5104", "0", "25.00"),
        ];
        assert_eq!(compute_residuals(&rows)["130"], dec("50.00"));
    }

    #[test]
    fn scenario_c_nets_debits_against_credits() {
        let rows = vec![row("130", "5104", "25.00", "100.00")];
        assert_eq!(compute_residuals(&rows)["130"], dec("75.00"));
    }

    #[test]
    fn scenario_d_exhausts_all_eligible_rows() {
        let mut rows = vec![
            row("131", "5104", "0", "500.00"),
            row("131", "5001", "200.00", "0"),
            row("131", "5002", "150.00", "0"),
            row("131", "5003", "100.00", "0"),
        ];
        let (_, report) = process_rows(&mut rows, &ResidualMap::new());

        assert!(rows[1..].iter().all(|r| r.debit == Decimal::ZERO));
        assert_eq!(rows[1].adjustment, "Adjusted by 200.00 (was 200.00)");
        assert_eq!(rows[2].adjustment, "Adjusted by 150.00 (was 150.00)");
        assert_eq!(rows[3].adjustment, "Adjusted by 100.00 (was 100.00)");

        // Only the first row in walk order is stamped
        assert_eq!(rows[1].total_adjusted, Some(dec("500.00")));
        assert_eq!(rows[2].total_adjusted, None);
        assert_eq!(rows[3].total_adjusted, None);

        assert_eq!(report.rows_adjusted, 3);
        assert_eq!(report.unapplied.get("131"), Some(&dec("50.00")));

        let summary = build_summary(&rows);
        assert_eq!(summary[0].debit_reduction, dec("450.00"));
    }

    #[test]
    fn walk_orders_by_account_then_largest_debit() {
        let mut rows = vec![
            row("7", "5104", "0", "120"),
            row("7", "5002", "1000", "0"),
            row("7", "5001", "50", "0"),
            row("7", "5001", "100", "0"),
        ];
        let (_, report) = process_rows(&mut rows, &ResidualMap::new());

        // 5001/100 first, then 5001/50 absorbs the last 20
        assert_eq!(rows[3].debit, Decimal::ZERO);
        assert_eq!(rows[3].total_adjusted, Some(dec("120")));
        assert_eq!(rows[2].debit, dec("30"));
        assert_eq!(rows[2].adjustment, "Adjusted by 20.00 (was 50.00)");
        assert_eq!(rows[2].total_adjusted, None);
        assert_eq!(rows[1].debit, dec("1000"));
        assert_eq!(report.rows_adjusted, 2);
    }

    #[test]
    fn non_positive_residual_leaves_unit_untouched() {
        let mut rows = vec![
            row("5", "5104", "40", "40"),
            row("5", "5001", "10", "0"),
            row("6", "5104", "90", "10"),
            row("6", "5001", "10", "0"),
        ];
        let (residuals, report) = process_rows(&mut rows, &ResidualMap::new());

        assert_eq!(residuals["5"], Decimal::ZERO);
        assert_eq!(residuals["6"], dec("-80"));
        assert_eq!(report.rows_adjusted, 0);
        assert_eq!(report.units_with_residual, 2);
        assert!(rows.iter().all(|r| r.adjustment.is_empty() && r.total_adjusted.is_none()));
    }

    #[test]
    fn override_can_disable_distribution() {
        let mut rows = scenario_a();
        let mut overrides = ResidualMap::new();
        overrides.insert("129".to_string(), dec("-1"));
        overrides.insert("999".to_string(), dec("10"));

        let (residuals, report) = process_rows(&mut rows, &overrides);

        assert_eq!(residuals["129"], dec("-1"));
        assert!(!residuals.contains_key("999"));
        assert_eq!(report.rows_adjusted, 0);
        assert_eq!(rows[1].debit, dec("852.00"));
    }

    #[test]
    fn service_charges_and_non_mf_accounts_are_ineligible() {
        let mut rows = vec![
            row("8", "5104", "0", "30"),
            row("8", "5001 SERVICE FEE", "500", "0"),
            row("8", "6001", "500", "0"),
            row("8", "5001", "0", "0"),
            {
                let mut r = row("8", "5002", "500", "0");
                r.reference = "monthly serv charge".to_string();
                r
            },
        ];
        let (_, report) = process_rows(&mut rows, &ResidualMap::new());

        assert!(rows[1].service_charge);
        assert!(rows[4].service_charge);
        assert_eq!(report.rows_adjusted, 0);
        assert_eq!(report.units_adjusted, 0);
        assert_eq!(report.unapplied.get("8"), Some(&dec("30")));
    }

    #[test]
    fn service_charge_keywords_match_case_insensitively() {
        assert!(is_service_charge("5001 Service Fee", ""));
        assert!(is_service_charge("", "ServiceCharge March"));
        assert!(is_service_charge("", "xxSERVICE-CHARGExx"));
        assert!(is_service_charge("service sales", ""));
        assert!(!is_service_charge("5001", "Services rendered"));
    }

    #[test]
    fn residual_matches_account_substrings() {
        let rows = vec![
            row("1", "51040", "0", "5"),
            row("1", "A5104B", "0", "5"),
            row("2", "5001", "0", "5"),
        ];
        let residuals = compute_residuals(&rows);
        assert_eq!(residuals.len(), 1);
        assert_eq!(residuals["1"], dec("10"));
    }

    #[test]
    fn consolidation_signs_only_residual_rows() {
        let mut rows = vec![
            row("1", "5104", "100", "40"),
            row("1", "5001", "100", "40"),
            row("1", "6000", "0", "15"),
        ];
        consolidate(&mut rows);
        assert_eq!(rows[0].consolidated, Some(dec("-60")));
        assert_eq!(rows[1].consolidated, Some(dec("60")));
        assert_eq!(rows[2].consolidated, Some(dec("15")));

        let first: Vec<_> = rows.iter().map(|r| r.consolidated).collect();
        consolidate(&mut rows);
        let second: Vec<_> = rows.iter().map(|r| r.consolidated).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn original_debit_is_recovered_from_annotation() {
        assert_eq!(
            extract_original("Adjusted by 26.15 (was 852.00)", dec("825.85")),
            dec("852.00")
        );
        assert_eq!(extract_original("Adjusted by 5.00 (was 0.00)", dec("7")), Decimal::ZERO);
        assert_eq!(extract_original("", dec("12.5")), dec("12.5"));
        assert_eq!(extract_original("manual edit", dec("12.5")), dec("12.5"));
        assert_eq!(extract_original("was )", dec("12.5")), dec("12.5"));
        assert_eq!(extract_original("(was abc)", dec("12.5")), dec("12.5"));
        assert_eq!(extract_original("(was .)", dec("12.5")), dec("12.5"));
        assert_eq!(extract_original("(was 1,000.00)", dec("12.5")), dec("12.5"));
    }

    #[test]
    fn amounts_at_decimal_bounds_saturate_instead_of_overflowing() {
        let max = "79228162514264337593543950335";
        let csv = format!(
            "Unit,GL Account,Debit,Credit\n\
             1,5104,0,{max}\n\
             1,5104,0,{max}\n\
             1,5001,{max},0\n\
             1,6000,-{max},{max}\n\
             2,5104,1e30,0\n"
        );
        let table = crate::io::load_records_from_reader(csv.as_bytes()).unwrap();
        let mut rows = normalize(&table);
        let (residuals, report) = process_rows(&mut rows, &ResidualMap::new());

        assert_eq!(residuals["1"], Decimal::MAX);
        assert_eq!(residuals["2"], Decimal::MIN);
        assert_eq!(rows[2].debit, Decimal::ZERO);
        assert_eq!(rows[2].total_adjusted, Some(Decimal::MAX));
        assert_eq!(report.rows_adjusted, 1);
        assert_eq!(rows[3].consolidated, Some(Decimal::MAX));
        assert_eq!(rows[4].consolidated, Some(Decimal::MIN));

        let summary = build_summary(&rows);
        let unit_1 = &summary[0];
        assert_eq!(unit_1.debit_reduction, Decimal::MAX);
        assert_eq!(unit_1.consolidated, Decimal::MAX);
        let grand = summary.last().unwrap();
        assert_eq!(grand.total_adjusted, Decimal::MAX);
        assert_eq!(grand.rows_adjusted, 1);
    }

    #[test]
    fn summary_groups_sorted_units_with_grand_total() {
        let mut rows = scenario_a();
        rows.push(row("127", "6000", "0", "10"));
        process_rows(&mut rows, &ResidualMap::new());

        let summary = build_summary(&rows);
        let units: Vec<&str> = summary.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(units, vec!["127", "128", "129", "GRAND TOTAL"]);

        let unit_129 = &summary[2];
        assert_eq!(unit_129.total_adjusted, dec("26.15"));
        assert_eq!(unit_129.rows_adjusted, 1);
        assert_eq!(unit_129.debit_reduction, dec("26.15"));
        // 26.15 + 825.85 + 450.00
        assert_eq!(unit_129.consolidated, dec("1302.00"));

        let grand = summary.last().unwrap();
        assert!(grand.is_grand_total());
        assert_eq!(grand.total_adjusted, dec("26.15"));
        assert_eq!(grand.rows_adjusted, 1);
        assert_eq!(grand.debit_reduction, dec("26.15"));
        assert_eq!(grand.consolidated, dec("1512.00"));
    }

    #[test]
    fn summary_of_unprocessed_rows_is_zero() {
        let rows = scenario_a();
        let summary = build_summary(&rows);
        let grand = summary.last().unwrap();
        assert_eq!(grand.consolidated, Decimal::ZERO);
        assert_eq!(grand.debit_reduction, Decimal::ZERO);
    }

    #[test]
    fn tied_rows_distribute_the_same_total() {
        let build = |first_ref: &str, second_ref: &str| {
            let mut a = row("9", "5001", "40", "0");
            a.reference = first_ref.to_string();
            let mut b = row("9", "5001", "40", "0");
            b.reference = second_ref.to_string();
            vec![row("9", "5104", "0", "60"), a, b]
        };

        let mut forward = build("a", "b");
        let mut reversed = build("b", "a");
        process_rows(&mut forward, &ResidualMap::new());
        process_rows(&mut reversed, &ResidualMap::new());

        let total = |rows: &[JournalRow]| build_summary(rows)[0].debit_reduction;
        assert_eq!(total(&forward), dec("60"));
        assert_eq!(total(&forward), total(&reversed));
        // Stable sort keeps file order among ties
        assert_eq!(forward[1].debit, Decimal::ZERO);
        assert_eq!(forward[2].debit, dec("20"));
    }
}
