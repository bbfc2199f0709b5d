// 📊 Enrichment & Aggregation Engine
// validate → left-join registry → sum per (identifier, period) → stats per identifier
//
// Rows failing validation are excluded, never corrected. Only the counts are
// observable (ValidationSummary).

use crate::cnpj;
use crate::consolidator::ExpenseRecord;
use crate::period::Period;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Placeholder for registry attributes of unmatched identifiers
pub const UNKNOWN_MARKER: &str = "N/A";

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationRule {
    LegalNamePresent,
    AmountNonNegative,
    IdentifierCheckDigits,
}

impl ValidationRule {
    pub const ALL: [ValidationRule; 3] = [
        ValidationRule::LegalNamePresent,
        ValidationRule::AmountNonNegative,
        ValidationRule::IdentifierCheckDigits,
    ];

    pub fn passes(&self, record: &ExpenseRecord) -> bool {
        match self {
            ValidationRule::LegalNamePresent => record
                .legal_name
                .as_deref()
                .map(|name| !name.trim().is_empty())
                .unwrap_or(false),
            ValidationRule::AmountNonNegative => record.amount.map(|a| a >= 0.0).unwrap_or(false),
            ValidationRule::IdentifierCheckDigits => cnpj::validate(&record.identifier),
        }
    }
}

/// Rules a record fails (empty = valid). Every rule is checked.
pub fn failed_rules(record: &ExpenseRecord) -> Vec<ValidationRule> {
    ValidationRule::ALL
        .iter()
        .copied()
        .filter(|rule| !rule.passes(record))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub checked: usize,
    pub passed: usize,
    pub dropped: usize,
    pub missing_name: usize,
    pub negative_or_missing_amount: usize,
    pub invalid_identifier: usize,
}

impl ValidationSummary {
    fn record(&mut self, failures: &[ValidationRule]) {
        self.checked += 1;
        if failures.is_empty() {
            self.passed += 1;
            return;
        }

        self.dropped += 1;
        for rule in failures {
            match rule {
                ValidationRule::LegalNamePresent => self.missing_name += 1,
                ValidationRule::AmountNonNegative => self.negative_or_missing_amount += 1,
                ValidationRule::IdentifierCheckDigits => self.invalid_identifier += 1,
            }
        }
    }
}

// ============================================================================
// ENRICHMENT
// ============================================================================

/// A validated record with registry attributes attached
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub identifier: String,
    pub legal_name: String,
    pub period: Period,
    pub amount: f64,
    pub registry_code: String,
    pub category: String,
    pub region: String,
    pub matched: bool,
}

// ============================================================================
// AGGREGATED OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStat {
    #[serde(rename = "CNPJ")]
    pub identifier: String,

    #[serde(rename = "RazaoSocial")]
    pub legal_name: String,

    #[serde(rename = "RegistroANS")]
    pub registry_code: String,

    #[serde(rename = "Modalidade")]
    pub category: String,

    #[serde(rename = "UF")]
    pub region: String,

    #[serde(rename = "Total_Despesas")]
    pub total: f64,

    #[serde(rename = "Media_Trimestral")]
    pub mean: f64,

    /// Sample standard deviation; None with fewer than two periods
    #[serde(rename = "Desvio_Padrao_Despesas")]
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    pub stats: Vec<AggregatedStat>,
    pub validation: ValidationSummary,
    pub unmatched_records: usize,
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Per-identifier accumulator: registry attributes plus one sum per period
struct EntityTotals {
    head: EnrichedRecord,
    per_period: BTreeMap<Period, f64>,
}

impl EntityTotals {
    fn into_stat(self) -> AggregatedStat {
        let sums: Vec<f64> = self.per_period.values().copied().collect();
        let total: f64 = sums.iter().sum();
        let mean = if sums.is_empty() { 0.0 } else { total / sums.len() as f64 };

        AggregatedStat {
            identifier: self.head.identifier,
            legal_name: self.head.legal_name,
            registry_code: self.head.registry_code,
            category: self.head.category,
            region: self.head.region,
            total,
            mean,
            std_dev: sample_std_dev(&sums),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct AggregationEngine<'a> {
    registry: &'a Registry,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        AggregationEngine { registry }
    }

    /// Keep the records passing every rule
    pub fn validate<'r>(
        &self,
        records: &'r [ExpenseRecord],
    ) -> (Vec<&'r ExpenseRecord>, ValidationSummary) {
        let mut summary = ValidationSummary::default();
        let mut valid = Vec::with_capacity(records.len());

        for record in records {
            let failures = failed_rules(record);
            summary.record(&failures);
            if failures.is_empty() {
                valid.push(record);
            }
        }

        (valid, summary)
    }

    /// Left join against the registry. Only call with validated records.
    pub fn enrich(&self, record: &ExpenseRecord) -> EnrichedRecord {
        let entry = self.registry.get(&record.identifier);
        let attribute = |value: Option<&String>| {
            value
                .cloned()
                .unwrap_or_else(|| UNKNOWN_MARKER.to_string())
        };

        EnrichedRecord {
            identifier: record.identifier.clone(),
            legal_name: record.legal_name.clone().unwrap_or_default(),
            period: record.period(),
            amount: record.amount.unwrap_or(0.0),
            registry_code: attribute(entry.and_then(|e| e.registry_code.as_ref())),
            category: attribute(entry.and_then(|e| e.category.as_ref())),
            region: attribute(entry.and_then(|e| e.region.as_ref())),
            matched: entry.is_some(),
        }
    }

    /// Full stage: validate, enrich, two-level aggregate, sort by total desc
    pub fn aggregate(&self, records: &[ExpenseRecord]) -> AggregationOutcome {
        let (valid, validation) = self.validate(records);

        let mut order: Vec<EntityTotals> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut unmatched_records = 0;

        for record in valid {
            let enriched = self.enrich(record);
            if !enriched.matched {
                unmatched_records += 1;
            }

            let slot = match index.get(&enriched.identifier) {
                Some(&i) => i,
                None => {
                    index.insert(enriched.identifier.clone(), order.len());
                    order.push(EntityTotals {
                        head: enriched.clone(),
                        per_period: BTreeMap::new(),
                    });
                    order.len() - 1
                }
            };

            // level 1: collapse line items within a period
            *order[slot].per_period.entry(enriched.period).or_insert(0.0) += enriched.amount;
        }

        // level 2: statistics over the per-period sums
        let mut stats: Vec<AggregatedStat> = order.into_iter().map(EntityTotals::into_stat).collect();
        stats.sort_by(|a, b| b.total.total_cmp(&a.total));

        info!(
            checked = validation.checked,
            dropped = validation.dropped,
            unmatched = unmatched_records,
            operators = stats.len(),
            "aggregation complete"
        );
        debug!(
            missing_name = validation.missing_name,
            negative_or_missing_amount = validation.negative_or_missing_amount,
            invalid_identifier = validation.invalid_identifier,
            "validation breakdown"
        );

        AggregationOutcome {
            stats,
            validation,
            unmatched_records,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
