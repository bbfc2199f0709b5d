// 🏷️ Record Classifier - Keyword tables as data
// Decides whether a sniffed table holds expense records and projects its
// columns onto the canonical expense shape. Heuristic by nature: misses and
// false hits are expected.

use crate::period::Period;
use crate::sniffer::{Cell, NormalizedTable};
use serde::{Deserialize, Serialize};

// ============================================================================
// KEYWORD TABLES
// ============================================================================

/// Canonical expense fields a column can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseField {
    Identifier,
    LegalName,
    Amount,
}

/// Column-name keywords that mark a table as expense related
/// (identifier, legal name, value, policy term, claim, event, expense)
pub const RELEVANCE_KEYWORDS: &[&str] =
    &["cnpj", "raz", "valor", "termo", "sinistro", "evento", "despesa"];

/// Matching columns needed before a table counts as relevant
pub const MIN_RELEVANT_COLUMNS: usize = 2;

/// (substring, field) pairs, checked in order for every column
pub const FIELD_HINTS: &[(&str, ExpenseField)] = &[
    ("cnpj", ExpenseField::Identifier),
    ("raz", ExpenseField::LegalName),
    ("vl_", ExpenseField::Amount),
    ("valor", ExpenseField::Amount),
];

/// Column-name hints for the accounting code column
pub const ACCOUNT_CODE_HINTS: &[&str] = &["cd_conta", "conta", "codigo"];

/// Account codes of the expense family start with this
pub const EXPENSE_ACCOUNT_PREFIX: &str = "4";

// ============================================================================
// OUTPUT
// ============================================================================

/// Expense row as found in the source, before consolidation
#[derive(Debug, Clone, PartialEq)]
pub struct RawExpense {
    pub identifier: Option<String>,
    pub legal_name: Option<String>,
    pub amount: Cell,
    pub period: Period,
}

/// Column index per canonical field (first matching column wins)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pub identifier: Option<usize>,
    pub legal_name: Option<usize>,
    pub amount: Option<usize>,
}

impl ColumnMapping {
    pub fn from_columns(columns: &[String], hints: &[(&str, ExpenseField)]) -> Self {
        let mut mapping = ColumnMapping::default();

        for (index, column) in columns.iter().enumerate() {
            // A column maps to at most one field: the first hint it contains
            let field = hints
                .iter()
                .find(|(hint, _)| column.contains(hint))
                .map(|(_, field)| *field);

            let slot = match field {
                Some(ExpenseField::Identifier) => &mut mapping.identifier,
                Some(ExpenseField::LegalName) => &mut mapping.legal_name,
                Some(ExpenseField::Amount) => &mut mapping.amount,
                None => continue,
            };

            if slot.is_none() {
                *slot = Some(index);
            }
        }

        mapping
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct RecordClassifier {
    relevance_keywords: &'static [&'static str],
    min_relevant_columns: usize,
    field_hints: &'static [(&'static str, ExpenseField)],
    account_code_hints: &'static [&'static str],
    expense_account_prefix: &'static str,
}

impl RecordClassifier {
    pub fn new() -> Self {
        RecordClassifier {
            relevance_keywords: RELEVANCE_KEYWORDS,
            min_relevant_columns: MIN_RELEVANT_COLUMNS,
            field_hints: FIELD_HINTS,
            account_code_hints: ACCOUNT_CODE_HINTS,
            expense_account_prefix: EXPENSE_ACCOUNT_PREFIX,
        }
    }

    /// Number of columns containing at least one relevance keyword
    pub fn relevance_score(&self, table: &NormalizedTable) -> usize {
        table
            .columns
            .iter()
            .filter(|column| self.relevance_keywords.iter().any(|k| column.contains(k)))
            .count()
    }

    pub fn is_relevant(&self, table: &NormalizedTable) -> bool {
        self.relevance_score(table) >= self.min_relevant_columns
    }

    pub fn mapping(&self, table: &NormalizedTable) -> ColumnMapping {
        ColumnMapping::from_columns(&table.columns, self.field_hints)
    }

    /// Project a table onto expense rows stamped with `period`.
    ///
    /// Irrelevant tables give an empty Vec. When an account code column
    /// exists only expense-family rows are kept.
    pub fn classify(&self, table: &NormalizedTable, period: Period) -> Vec<RawExpense> {
        if !self.is_relevant(table) {
            return Vec::new();
        }

        let code_column = table.find_column(self.account_code_hints);
        let mapping = self.mapping(table);

        table
            .rows
            .iter()
            .filter(|row| match code_column {
                Some(i) => cell_text(row, Some(i))
                    .map(|code| code.starts_with(self.expense_account_prefix))
                    .unwrap_or(false),
                None => true,
            })
            .map(|row| RawExpense {
                identifier: cell_text(row, mapping.identifier),
                legal_name: cell_text(row, mapping.legal_name),
                amount: mapping
                    .amount
                    .and_then(|i| row.get(i))
                    .cloned()
                    .unwrap_or(Cell::Null),
                period,
            })
            .collect()
    }
}

fn cell_text(row: &[Cell], index: Option<usize>) -> Option<String> {
    index.and_then(|i| row.get(i)).and_then(Cell::as_text)
}

impl Default for RecordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Quarter;

    fn text(s: &str) -> Cell {
        Cell::from_text(s)
    }

    fn table(columns: &[&str], rows: Vec<Vec<Cell>>) -> NormalizedTable {
        NormalizedTable::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    fn period() -> Period {
        Period::new(2024, Quarter::Q3)
    }

    #[test]
    fn test_relevance_needs_two_columns() {
        let classifier = RecordClassifier::new();

        let one = table(&["cnpj", "data"], vec![]);
        assert_eq!(classifier.relevance_score(&one), 1);
        assert!(!classifier.is_relevant(&one));

        let two = table(&["CNPJ", "Razao_Social", "data"], vec![]);
        assert_eq!(classifier.relevance_score(&two), 2);
        assert!(classifier.is_relevant(&two));
    }

    #[test]
    fn test_irrelevant_table_gives_nothing() {
        let classifier = RecordClassifier::new();
        let t = table(&["nome", "idade"], vec![vec![text("Ana"), text("30")]]);
        assert!(classifier.classify(&t, period()).is_empty());
    }

    #[test]
    fn test_mapping_first_match_wins() {
        let columns: Vec<String> = ["vl_saldo_inicial", "cnpj", "razao_social", "vl_saldo_final", "cnpj_matriz"]
            .iter()
            .map(|c| c.to_string())
            .collect();

        let mapping = ColumnMapping::from_columns(&columns, FIELD_HINTS);
        assert_eq!(mapping.amount, Some(0));
        assert_eq!(mapping.identifier, Some(1));
        assert_eq!(mapping.legal_name, Some(2));
    }

    #[test]
    fn test_column_maps_to_one_field_only() {
        // contains both "cnpj" and "raz": identifier hint comes first
        let columns = vec!["cnpj_razao".to_string(), "valor".to_string()];
        let mapping = ColumnMapping::from_columns(&columns, FIELD_HINTS);

        assert_eq!(mapping.identifier, Some(0));
        assert_eq!(mapping.legal_name, None);
        assert_eq!(mapping.amount, Some(1));
    }

    #[test]
    fn test_account_code_filter() {
        let classifier = RecordClassifier::new();
        let t = table(
            &["cnpj", "cd_conta_contabil", "valor"],
            vec![
                vec![text("1"), text("411"), text("10,5")],
                vec![text("2"), text("311"), text("20")],
                vec![text("3"), Cell::Number(41.0), text("30")],
                vec![text("4"), Cell::Null, text("40")],
            ],
        );

        let rows = classifier.classify(&t, period());
        let ids: Vec<_> = rows.iter().map(|r| r.identifier.clone().unwrap()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(rows[0].amount, text("10,5"));
    }

    #[test]
    fn test_no_code_column_keeps_all_rows() {
        let classifier = RecordClassifier::new();
        let t = table(
            &["cnpj", "razao_social", "valor_despesa"],
            vec![
                vec![text("1"), text("A"), text("1")],
                vec![text("2"), text("B"), text("2")],
            ],
        );

        let rows = classifier.classify(&t, period());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.period == period()));
        assert_eq!(rows[1].legal_name.as_deref(), Some("B"));
    }

    #[test]
    fn test_unmapped_fields_are_null() {
        let classifier = RecordClassifier::new();
        // relevant (despesa + evento) but no identifier/name/amount columns
        let t = table(&["despesa", "evento"], vec![vec![text("x"), text("y")]]);

        let rows = classifier.classify(&t, period());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identifier, None);
        assert_eq!(rows[0].legal_name, None);
        assert_eq!(rows[0].amount, Cell::Null);
    }

    #[test]
    fn test_empty_relevant_table() {
        let classifier = RecordClassifier::new();
        let t = table(&["cnpj", "valor"], vec![]);
        assert!(classifier.classify(&t, period()).is_empty());
    }
}
