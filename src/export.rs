// 📤 Flat-file outputs
// UTF-8 CSV with BOM (opens correctly in spreadsheet tools) and deflated zips.

use crate::aggregation::AggregatedStat;
use crate::consolidator::ExpenseRecord;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::FileOptions;
use zip::CompressionMethod;

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
pub const CONSOLIDATED_FILE: &str = "consolidado_despesas.csv";
pub const AGGREGATED_FILE: &str = "despesas_agregadas.csv";

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(UTF8_BOM)?;

    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(row).context("Failed to serialize CSV row")?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = rows.len(), "csv written");
    Ok(())
}

/// Write the consolidated record set (CNPJ,RazaoSocial,Trimestre,Ano,ValorDespesas)
pub fn write_expenses_csv(path: &Path, records: &[ExpenseRecord]) -> Result<()> {
    write_csv(path, records)
}

/// Read a consolidated file back; a leading BOM is tolerated
pub fn read_expenses_csv(path: &Path) -> Result<Vec<ExpenseRecord>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut rdr = csv::Reader::from_reader(content);
    let mut records = Vec::new();

    for result in rdr.deserialize() {
        let record: ExpenseRecord = result.context("Failed to deserialize expense record")?;
        records.push(record);
    }

    Ok(records)
}

/// Write aggregated statistics (CNPJ,...,Desvio_Padrao_Despesas)
pub fn write_aggregates_csv(path: &Path, stats: &[AggregatedStat]) -> Result<()> {
    write_csv(path, stats)
}

pub fn read_aggregates_csv(path: &Path) -> Result<Vec<AggregatedStat>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut rdr = csv::Reader::from_reader(content);
    rdr.deserialize()
        .map(|result| result.context("Failed to deserialize aggregated row"))
        .collect()
}

/// Pack one file into `<file stem>.zip` next to it (or at `zip_path`)
pub fn zip_file(source: &Path, zip_path: Option<&Path>) -> Result<PathBuf> {
    let target = match zip_path {
        Some(p) => p.to_path_buf(),
        None => source.with_extension("zip"),
    };

    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", source.display()))?;

    let mut content = Vec::new();
    File::open(source)
        .with_context(|| format!("Failed to open {}", source.display()))?
        .read_to_end(&mut content)?;

    let file = File::create(&target).with_context(|| format!("Failed to create {}", target.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(name, options)?;
    zip.write_all(&content)?;
    zip.finish()?;

    info!(source = %source.display(), archive = %target.display(), "archive written");
    Ok(target)
}

// ============================================================================
// TESTS
// ============================================================================
