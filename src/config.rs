// ⚙️ Pipeline configuration (TOML)
// Every input/output location is explicit; nothing is resolved relative to
// the working directory of the process.

use crate::error::{PipelineError, Result};
use crate::period::{Period, Quarter};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

pub const DEFAULT_DATABASE_FILE: &str = "ans.db";

// ============================================================================
// BUNDLE SOURCE
// ============================================================================

/// One quarterly archive plus the labels stamped on its records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSource {
    pub year: i32,
    pub quarter: u8,
    pub path: PathBuf,
}

fn bundle_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)([1-4])T(\d{4})").ok())
        .as_ref()
}

impl BundleSource {
    pub fn new(year: i32, quarter: u8, path: impl Into<PathBuf>) -> Self {
        BundleSource {
            year,
            quarter,
            path: path.into(),
        }
    }

    /// Derive year/quarter from a file named like `3T2024.zip`
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let captures = bundle_name_pattern()?.captures(name)?;

        let quarter: u8 = captures.get(1)?.as_str().parse().ok()?;
        let year: i32 = captures.get(2)?.as_str().parse().ok()?;
        Some(BundleSource::new(year, quarter, path))
    }

    pub fn period(&self) -> Result<Period> {
        let quarter = Quarter::try_from(self.quarter).map_err(PipelineError::Config)?;
        Ok(Period::new(self.year, quarter))
    }

    /// Display label, e.g. "3T2024"
    pub fn label(&self) -> String {
        format!("{}T{}", self.quarter, self.year)
    }
}

/// Find `<q>T<yyyy>.zip` archives in `dir`, newest first
pub fn discover_bundles(dir: &Path, limit: Option<usize>) -> Result<Vec<BundleSource>> {
    let mut found = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);

        if !is_zip {
            continue;
        }

        match BundleSource::from_path(&path) {
            Some(bundle) => found.push(bundle),
            None => debug!(path = %path.display(), "archive name has no quarter label, ignored"),
        }
    }

    found.sort_by(|a, b| (b.year, b.quarter).cmp(&(a.year, a.quarter)));
    if let Some(limit) = limit {
        found.truncate(limit);
    }

    Ok(found)
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub registry_path: PathBuf,
    pub output_dir: PathBuf,

    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,

    #[serde(default)]
    pub quarter_limit: Option<usize>,

    #[serde(default)]
    pub bundles: Vec<BundleSource>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), bundles = config.bundles.len(), "config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for bundle in &self.bundles {
            bundle.period()?;
        }
        if self.quarter_limit == Some(0) {
            return Err(PipelineError::Config("quarter_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_DATABASE_FILE))
    }

    /// Explicit bundles in supplied order, then discovered ones (newest first)
    pub fn resolve_bundles(&self) -> Result<Vec<BundleSource>> {
        let mut bundles = self.bundles.clone();

        if let Some(dir) = &self.bundle_dir {
            for found in discover_bundles(dir, self.quarter_limit)? {
                if !bundles.iter().any(|b| b.path == found.path) {
                    bundles.push(found);
                }
            }
        }

        Ok(bundles)
    }
}

// ============================================================================
// TESTS
// ============================================================================
