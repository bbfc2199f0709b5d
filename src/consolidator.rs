// 🧮 Consolidator
// Concatenates the expense rows of every bundle in one run (supplied order,
// never re-sorted) and normalizes identifiers and amounts.

use crate::classifier::RawExpense;
use crate::cnpj::{is_oversized, normalize_identifier};
use crate::period::{Period, Quarter};
use crate::sniffer::Cell;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Canonical expense record.
///
/// `identifier` is 14 digits unless the source held more (kept as-is so
/// validation rejects it). `amount` is None when the source was not numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    #[serde(rename = "CNPJ")]
    pub identifier: String,

    #[serde(rename = "RazaoSocial")]
    pub legal_name: Option<String>,

    #[serde(rename = "Trimestre")]
    pub quarter: Quarter,

    #[serde(rename = "Ano")]
    pub year: i32,

    #[serde(rename = "ValorDespesas")]
    pub amount: Option<f64>,
}

impl ExpenseRecord {
    pub fn period(&self) -> Period {
        Period::new(self.year, self.quarter)
    }
}

/// Parse an amount cell. Decimal commas become points; anything that still
/// isn't a finite number is None (never zero).
pub fn parse_amount(cell: &Cell) -> Option<f64> {
    let value = match cell {
        Cell::Null => return None,
        Cell::Number(n) => *n,
        Cell::Text(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
    };

    value.is_finite().then_some(value)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub bundles: usize,
    pub records: usize,
    pub oversized_identifiers: usize,
    pub unparsed_amounts: usize,
}

/// Single-writer accumulator for one run
#[derive(Debug, Default)]
pub struct Consolidator {
    records: Vec<ExpenseRecord>,
    stats: ConsolidationStats,
}

impl Consolidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one bundle's rows, in order
    pub fn push_bundle(&mut self, rows: Vec<RawExpense>) {
        self.stats.bundles += 1;
        self.records.reserve(rows.len());

        for row in rows {
            let record = self.normalize(row);
            self.records.push(record);
        }

        self.stats.records = self.records.len();
    }

    fn normalize(&mut self, row: RawExpense) -> ExpenseRecord {
        let identifier = normalize_identifier(row.identifier.as_deref().unwrap_or(""));
        if is_oversized(&identifier) {
            self.stats.oversized_identifiers += 1;
        }

        let amount = parse_amount(&row.amount);
        if amount.is_none() {
            self.stats.unparsed_amounts += 1;
        }

        ExpenseRecord {
            identifier,
            legal_name: row.legal_name,
            quarter: row.period.quarter,
            year: row.period.year,
            amount,
        }
    }

    pub fn finish(self) -> (Vec<ExpenseRecord>, ConsolidationStats) {
        if self.stats.oversized_identifiers > 0 {
            warn!(
                count = self.stats.oversized_identifiers,
                "identifiers longer than 14 digits kept as-is"
            );
        }
        (self.records, self.stats)
    }
}

/// Consolidate several bundles at once (bundle order preserved)
pub fn consolidate(bundles: Vec<Vec<RawExpense>>) -> (Vec<ExpenseRecord>, ConsolidationStats) {
    let mut consolidator = Consolidator::new();
    for rows in bundles {
        consolidator.push_bundle(rows);
    }
    consolidator.finish()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(identifier: Option<&str>, amount: Cell, period: Period) -> RawExpense {
        RawExpense {
            identifier: identifier.map(str::to_string),
            legal_name: Some("Operadora".to_string()),
            amount,
            period,
        }
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(&Cell::Text("1234,56".into())), Some(1234.56));
        assert_eq!(parse_amount(&Cell::Text(" -10.5 ".into())), Some(-10.5));
        assert_eq!(parse_amount(&Cell::Number(42.0)), Some(42.0));
        assert_eq!(parse_amount(&Cell::Text("abc".into())), None);
        assert_eq!(parse_amount(&Cell::Text("1.234,56".into())), None);
        assert_eq!(parse_amount(&Cell::Text("NaN".into())), None);
        assert_eq!(parse_amount(&Cell::Null), None);
    }

    #[test]
    fn test_preserves_bundle_order() {
        let newest = Period::new(2024, Quarter::Q3);
        let older = Period::new(2024, Quarter::Q1);

        let (records, stats) = consolidate(vec![
            vec![raw(Some("1"), Cell::Number(1.0), newest)],
            vec![
                raw(Some("2"), Cell::Number(2.0), older),
                raw(Some("3"), Cell::Number(3.0), older),
            ],
        ]);

        let ids: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["00000000000001", "00000000000002", "00000000000003"]);
        assert_eq!(records[0].period(), newest);
        assert_eq!(stats.bundles, 2);
        assert_eq!(stats.records, 3);
    }

    #[test]
    fn test_normalizes_identifier_and_amount() {
        let period = Period::new(2023, Quarter::Q4);
        let (records, stats) = consolidate(vec![vec![
            raw(Some("12.345.678/0001-95"), Cell::Text("10,25".into()), period),
            raw(None, Cell::Text("n/d".into()), period),
            raw(Some("1234567800019512"), Cell::Null, period),
        ]]);

        assert_eq!(records[0].identifier, "12345678000195");
        assert_eq!(records[0].amount, Some(10.25));
        assert_eq!(records[1].identifier, "00000000000000");
        assert_eq!(records[1].amount, None);
        assert_eq!(records[2].identifier, "1234567800019512");

        assert_eq!(stats.oversized_identifiers, 1);
        assert_eq!(stats.unparsed_amounts, 2);
    }

    #[test]
    fn test_empty_run() {
        let (records, stats) = consolidate(vec![vec![], vec![]]);
        assert!(records.is_empty());
        assert_eq!(stats.bundles, 2);
    }
}
