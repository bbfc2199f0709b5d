// ANS Expenses - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod logging;
pub mod extractor;      // Bundle Extractor
pub mod sniffer;        // Schema Sniffer
pub mod period;
pub mod classifier;     // Record Classifier
pub mod cnpj;           // CNPJ Validator
pub mod registry;       // Registry Loader
pub mod consolidator;
pub mod aggregation;    // Enrichment & Aggregation Engine
pub mod pipeline;
pub mod export;
pub mod db;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use config::{BundleSource, PipelineConfig, discover_bundles};
pub use extractor::{MediaType, RawFile, extract_bytes, extract_path};
pub use sniffer::{Cell, NormalizedTable, Sniffer, TextEncoding};
pub use period::{Period, Quarter};
pub use classifier::{ColumnMapping, ExpenseField, RawExpense, RecordClassifier};
pub use registry::{Registry, RegistryEntry};
pub use consolidator::{ConsolidationStats, Consolidator, ExpenseRecord, consolidate};
pub use aggregation::{
    AggregatedStat, AggregationEngine, AggregationOutcome, ValidationRule, ValidationSummary,
    UNKNOWN_MARKER,
};
pub use pipeline::{BundleReport, Pipeline, PipelineOutput, RunReport};
pub use db::{
    Expense, Operator, Page, Statistics,
    setup_database, replace_operators, replace_expenses, replace_aggregates,
    insert_run_report, get_latest_run, verify_count,
    list_operators, get_operator, get_operator_expenses, get_statistics,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
