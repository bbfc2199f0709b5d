// 🏢 Operator Registry - identifier → registry attributes
// Loaded once per run from the agency's registry file, immutable after that.
// One entry per identifier: the first row wins, later duplicates are dropped.

use crate::cnpj::normalize_identifier;
use crate::error::{PipelineError, Result};
use crate::sniffer::{Cell, NormalizedTable, Sniffer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// REGISTRY ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub registry_code: Option<String>,
    pub identifier: String,
    pub legal_name: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryField {
    RegistryCode,
    Identifier,
    LegalName,
    Category,
    Region,
}

/// Source column names (normalized) per canonical field
const COLUMN_ALIASES: &[(&str, RegistryField)] = &[
    ("registro_operadora", RegistryField::RegistryCode),
    ("registro_ans", RegistryField::RegistryCode),
    ("registroans", RegistryField::RegistryCode),
    ("reg_ans", RegistryField::RegistryCode),
    ("cnpj", RegistryField::Identifier),
    ("razao_social", RegistryField::LegalName),
    ("razaosocial", RegistryField::LegalName),
    ("modalidade", RegistryField::Category),
    ("uf", RegistryField::Region),
];

fn column_for(table: &NormalizedTable, field: RegistryField) -> Option<usize> {
    COLUMN_ALIASES
        .iter()
        .filter(|(_, f)| *f == field)
        .find_map(|(alias, _)| table.columns.iter().position(|c| c == alias))
}

/// Undo UTF-8 text that was decoded as Latin-1 somewhere upstream
/// ("SAÃšDE" → "SAÚDE"). Text that isn't mojibake comes back unchanged.
pub fn repair_mojibake(text: &str) -> String {
    if text.is_ascii() || text.chars().any(|c| c as u32 > 0xFF) {
        return text.to_string();
    }

    let bytes = encoding_rs::mem::encode_latin1_lossy(text);
    match std::str::from_utf8(&bytes) {
        Ok(repaired) => repaired.to_string(),
        Err(_) => text.to_string(),
    }
}

fn text_at(row: &[Cell], col: Option<usize>) -> Option<String> {
    col.and_then(|i| row.get(i))
        .and_then(Cell::as_text)
        .map(|s| repair_mojibake(&s))
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
    duplicates: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a delimited registry file from a local path
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(format!(
                "registry file not found: {}",
                path.display()
            )));
        }

        let bytes = std::fs::read(path)?;
        let table = Sniffer::new().sniff_delimited(&bytes).ok_or_else(|| {
            PipelineError::Registry(format!(
                "could not determine encoding/delimiter of {}",
                path.display()
            ))
        })?;

        debug!(
            path = %path.display(),
            encoding = table.encoding.map(|e| e.name()).unwrap_or("unknown"),
            rows = table.len(),
            "registry file sniffed"
        );

        let registry = Self::from_table(&table)?;
        info!(
            entries = registry.len(),
            duplicates = registry.duplicates(),
            "registry loaded"
        );
        Ok(registry)
    }

    /// Build from a sniffed table; the identifier column is mandatory
    pub fn from_table(table: &NormalizedTable) -> Result<Self> {
        let identifier_col = column_for(table, RegistryField::Identifier).ok_or_else(|| {
            PipelineError::Registry(format!(
                "no identifier column among {:?}",
                table.columns
            ))
        })?;

        let code_col = column_for(table, RegistryField::RegistryCode);
        let name_col = column_for(table, RegistryField::LegalName);
        let category_col = column_for(table, RegistryField::Category);
        let region_col = column_for(table, RegistryField::Region);

        let mut registry = Registry::new();
        for row in &table.rows {
            let raw_identifier = row
                .get(identifier_col)
                .and_then(|cell| cell.as_text())
                .unwrap_or_default();

            registry.insert(RegistryEntry {
                registry_code: text_at(row, code_col),
                identifier: normalize_identifier(&raw_identifier),
                legal_name: text_at(row, name_col),
                category: text_at(row, category_col),
                region: text_at(row, region_col),
            });
        }

        Ok(registry)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = RegistryEntry>) -> Self {
        let mut registry = Registry::new();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    }

    /// Insert unless the identifier is already known.
    /// Returns false (and counts a duplicate) when the entry is discarded.
    pub fn insert(&mut self, mut entry: RegistryEntry) -> bool {
        entry.identifier = normalize_identifier(&entry.identifier);

        if self.index.contains_key(&entry.identifier) {
            self.duplicates += 1;
            return false;
        }

        self.index.insert(entry.identifier.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    /// Lookup by identifier (any formatting)
    pub fn get(&self, identifier: &str) -> Option<&RegistryEntry> {
        let key = normalize_identifier(identifier);
        self.index.get(&key).map(|&i| &self.entries[i])
    }

    /// Entries in load order
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows discarded because their identifier was already registered
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CADOP: &str = "Registro_Operadora;CNPJ;Razao_Social;Modalidade;UF\n\
                         123456;12.345.678/0001-95;SAUDE TOTAL S.A.;Medicina de Grupo;SP\n\
                         654321;11222333000181;VIDA PLENA;Cooperativa Médica;MG\n\
                         999999;12345678000195;DUPLICADA LTDA;Autogestão;RJ\n";

    fn entry(identifier: &str, name: &str) -> RegistryEntry {
        RegistryEntry {
            registry_code: None,
            identifier: identifier.to_string(),
            legal_name: Some(name.to_string()),
            category: None,
            region: None,
        }
    }

    #[test]
    fn test_first_occurrence_wins() {
        let registry = Registry::from_entries(vec![
            entry("12345678000195", "PRIMEIRA"),
            entry("12.345.678/0001-95", "SEGUNDA"),
        ]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.duplicates(), 1);
        assert_eq!(
            registry.get("12345678000195").unwrap().legal_name.as_deref(),
            Some("PRIMEIRA")
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CADOP.as_bytes()).unwrap();

        let registry = Registry::load(file.path()).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.duplicates(), 1);

        let saude = registry.get("12345678000195").unwrap();
        assert_eq!(saude.registry_code.as_deref(), Some("123456"));
        assert_eq!(saude.legal_name.as_deref(), Some("SAUDE TOTAL S.A."));
        assert_eq!(saude.category.as_deref(), Some("Medicina de Grupo"));
        assert_eq!(saude.region.as_deref(), Some("SP"));

        let vida = registry.get("11.222.333/0001-81").unwrap();
        assert_eq!(vida.category.as_deref(), Some("Cooperativa Médica"));
    }

    #[test]
    fn test_load_latin1_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"CNPJ;Razao_Social;UF\n11222333000181;SA\xDADE;MG\n").unwrap();

        let registry = Registry::load(file.path()).unwrap();
        let entry = registry.get("11222333000181").unwrap();
        assert_eq!(entry.legal_name.as_deref(), Some("SAÚDE"));
    }

    #[test]
    fn test_identifier_padding() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"CNPJ;UF\n191000100;DF\n").unwrap();

        let registry = Registry::load(file.path()).unwrap();
        assert!(registry.get("00000191000100").is_some());
        assert!(registry.get("191.000.100").is_some());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = Registry::load(Path::new("/no/such/Relatorio_cadop.csv"));
        assert!(matches!(result, Err(PipelineError::MissingInput(_))));
    }

    #[test]
    fn test_missing_identifier_column() {
        let table = NormalizedTable::new(vec!["nome".into(), "uf".into()], vec![]);
        assert!(matches!(Registry::from_table(&table), Err(PipelineError::Registry(_))));
    }

    #[test]
    fn test_repair_mojibake() {
        assert_eq!(repair_mojibake("Cooperativa MÃ©dica"), "Cooperativa Médica");
        assert_eq!(repair_mojibake("SAÚDE"), "SAÚDE");
        assert_eq!(repair_mojibake("plain"), "plain");
    }
}
