// 🔄 Ingestion Pipeline
// extract → sniff → classify → consolidate → enrich/aggregate
//
// Strictly staged and single-writer. A bundle that cannot be extracted is
// logged and skipped; only missing primary input stops the run.

use crate::aggregation::{AggregatedStat, AggregationEngine, ValidationSummary};
use crate::classifier::{RawExpense, RecordClassifier};
use crate::config::BundleSource;
use crate::consolidator::{consolidate, ConsolidationStats, ExpenseRecord};
use crate::error::{PipelineError, Result};
use crate::extractor::extract_bytes;
use crate::period::Period;
use crate::registry::Registry;
use crate::sniffer::Sniffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleReport {
    pub label: String,
    pub path: String,
    pub sha256: Option<String>,
    pub files: usize,
    pub skipped_files: usize,
    pub irrelevant_tables: usize,
    pub records: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub entries: usize,
    pub duplicates: usize,
}

/// Everything observable about one run. Stored in `ingest_runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub bundles: Vec<BundleReport>,
    pub consolidation: ConsolidationStats,
    pub registry: Option<RegistryStats>,
    pub validation: Option<ValidationSummary>,
    pub unmatched_records: usize,
    pub operators: usize,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            bundles: Vec::new(),
            consolidation: ConsolidationStats::default(),
            registry: None,
            validation: None,
            unmatched_records: 0,
            operators: 0,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn failed_bundles(&self) -> usize {
        self.bundles.iter().filter(|b| b.error.is_some()).count()
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub registry: Registry,
    pub records: Vec<ExpenseRecord>,
    pub stats: Vec<AggregatedStat>,
    pub report: RunReport,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    sniffer: Sniffer,
    classifier: RecordClassifier,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            sniffer: Sniffer::new(),
            classifier: RecordClassifier::new(),
        }
    }

    /// Archive bytes → expense rows stamped with `period`
    pub fn process_bundle(
        &self,
        label: &str,
        bytes: &[u8],
        period: Period,
    ) -> Result<(Vec<RawExpense>, BundleReport)> {
        let files = extract_bytes(label, bytes)?;

        let mut report = BundleReport {
            label: label.to_string(),
            sha256: Some(sha256_hex(bytes)),
            files: files.len(),
            ..Default::default()
        };
        let mut rows = Vec::new();

        for file in files {
            let table = match self.sniffer.sniff(&file) {
                Some(table) => table,
                None => {
                    report.skipped_files += 1;
                    continue;
                }
            };

            if !self.classifier.is_relevant(&table) {
                debug!(bundle = label, file = %file.name, columns = ?table.columns, "not an expense table");
                report.irrelevant_tables += 1;
                continue;
            }

            let classified = self.classifier.classify(&table, period);
            debug!(bundle = label, file = %file.name, rows = classified.len(), "classified expense table");
            rows.extend(classified);
        }

        report.records = rows.len();
        info!(
            bundle = label,
            files = report.files,
            skipped = report.skipped_files,
            irrelevant = report.irrelevant_tables,
            records = report.records,
            "bundle processed"
        );

        Ok((rows, report))
    }

    /// Stage 1: every bundle, in the order given, into one record set.
    ///
    /// A corrupt bundle is skipped. When none of the bundle files exist the
    /// run has no primary input at all, which is fatal.
    pub fn consolidate(&self, bundles: &[BundleSource], report: &mut RunReport) -> Result<Vec<ExpenseRecord>> {
        if bundles.is_empty() {
            return Err(PipelineError::MissingInput("no bundles to process".into()));
        }

        let missing: Vec<&BundleSource> = bundles.iter().filter(|b| !b.path.is_file()).collect();
        if missing.len() == bundles.len() {
            return Err(PipelineError::MissingInput(format!(
                "none of the {} bundle files exist (first: {})",
                bundles.len(),
                bundles[0].path.display()
            )));
        }

        let mut loaded = Vec::with_capacity(bundles.len());

        for bundle in bundles {
            let period = bundle.period()?;
            let label = bundle.label();

            match self.load_bundle(bundle, period) {
                Ok((rows, mut bundle_report)) => {
                    bundle_report.path = bundle.path.display().to_string();
                    loaded.push(rows);
                    report.bundles.push(bundle_report);
                }
                Err(e) if !e.is_fatal() => {
                    warn!(bundle = %label, error = %e, "bundle skipped");
                    report.bundles.push(BundleReport {
                        label,
                        path: bundle.path.display().to_string(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let (records, stats) = consolidate(loaded);
        info!(
            bundles = stats.bundles,
            failed = report.failed_bundles(),
            missing = missing.len(),
            records = stats.records,
            unparsed_amounts = stats.unparsed_amounts,
            "consolidation complete"
        );
        report.consolidation = stats;

        Ok(records)
    }

    fn load_bundle(&self, bundle: &BundleSource, period: Period) -> Result<(Vec<RawExpense>, BundleReport)> {
        let label = bundle.label();
        let bytes = std::fs::read(&bundle.path).map_err(|e| PipelineError::extraction(&label, e))?;
        self.process_bundle(&label, &bytes, period)
    }

    /// Stage 2: validate, enrich and aggregate consolidated records
    pub fn aggregate(
        &self,
        records: &[ExpenseRecord],
        registry: &Registry,
        report: &mut RunReport,
    ) -> Vec<AggregatedStat> {
        report.registry = Some(RegistryStats {
            entries: registry.len(),
            duplicates: registry.duplicates(),
        });

        let outcome = AggregationEngine::new(registry).aggregate(records);
        report.validation = Some(outcome.validation);
        report.unmatched_records = outcome.unmatched_records;
        report.operators = outcome.stats.len();

        outcome.stats
    }

    /// Both stages end to end
    pub fn run(&self, bundles: &[BundleSource], registry_path: &Path) -> Result<PipelineOutput> {
        let mut report = RunReport::new();
        info!(run_id = %report.run_id, bundles = bundles.len(), "pipeline run started");

        // absence of either primary input is fatal before any work is done
        if bundles.is_empty() {
            return Err(PipelineError::MissingInput("no bundles to process".into()));
        }
        let registry = Registry::load(registry_path)?;

        let records = self.consolidate(bundles, &mut report)?;
        let stats = self.aggregate(&records, &registry, &mut report);
        report.finish();

        Ok(PipelineOutput {
            registry,
            records,
            stats,
            report,
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
