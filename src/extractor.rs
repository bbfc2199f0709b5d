// 📦 Bundle Extractor
// Opens a zipped bundle and yields every member file (flat listing, nested
// folders included) with a media type guess. No filtering happens here.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Media type guessed from a member's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Csv,
    Text,
    Spreadsheet,
    Other,
}

impl MediaType {
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        let extension = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

        match extension {
            "csv" => MediaType::Csv,
            "txt" => MediaType::Text,
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => MediaType::Spreadsheet,
            _ => MediaType::Other,
        }
    }

    /// Delimited text (csv or plain text)
    pub fn is_delimited(&self) -> bool {
        matches!(self, MediaType::Csv | MediaType::Text)
    }
}

/// One archive member: relative path + raw bytes
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub media_type: MediaType,
    pub content: Vec<u8>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        let name = name.into();
        RawFile {
            media_type: MediaType::from_name(&name),
            name,
            content,
        }
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Extract every file member of an in-memory archive.
///
/// `label` is only used for error messages. A corrupt archive (or a member
/// that cannot be decompressed) fails the whole bundle: there is no partial
/// recovery.
pub fn extract_bytes(label: &str, bytes: &[u8]) -> Result<Vec<RawFile>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::extraction(label, e))?;

    let mut files = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut member = archive
            .by_index(i)
            .map_err(|e| PipelineError::extraction(label, e))?;

        if member.is_dir() {
            continue;
        }

        let name = member.name().to_string();
        let mut content = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut content)
            .map_err(|e| PipelineError::extraction(label, format!("{}: {}", name, e)))?;

        debug!(bundle = label, member = %name, bytes = content.len(), "extracted member");
        files.push(RawFile::new(name, content));
    }

    Ok(files)
}

/// Extract an archive stored on disk
pub fn extract_path(path: &Path) -> Result<Vec<RawFile>> {
    let label = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| PipelineError::extraction(&label, e))?;
    extract_bytes(&label, &bytes)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content).unwrap();
            }
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_media_type_from_name() {
        assert_eq!(MediaType::from_name("1T2024.csv"), MediaType::Csv);
        assert_eq!(MediaType::from_name("dados/DESPESAS.CSV"), MediaType::Csv);
        assert_eq!(MediaType::from_name("leia-me.txt"), MediaType::Text);
        assert_eq!(MediaType::from_name("balancete.xlsx"), MediaType::Spreadsheet);
        assert_eq!(MediaType::from_name("antigo.xls"), MediaType::Spreadsheet);
        assert_eq!(MediaType::from_name("manual.pdf"), MediaType::Other);
        assert_eq!(MediaType::from_name("sem_extensao"), MediaType::Other);
    }

    #[test]
    fn test_extract_flat_listing_with_subdirectories() {
        let bytes = build_zip(&[
            ("1T2024.csv", b"a;b\n1;2\n"),
            ("docs/", b""),
            ("docs/manual.pdf", b"%PDF"),
            ("docs/inner/extra.txt", b"x"),
        ]);

        let files = extract_bytes("1T2024.zip", &bytes).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(names, vec!["1T2024.csv", "docs/manual.pdf", "docs/inner/extra.txt"]);
        assert_eq!(files[0].content, b"a;b\n1;2\n");
        assert_eq!(files[0].media_type, MediaType::Csv);
        assert_eq!(files[1].media_type, MediaType::Other);
        assert_eq!(files[2].media_type, MediaType::Text);
    }

    #[test]
    fn test_extract_corrupt_archive() {
        let result = extract_bytes("broken.zip", b"this is not a zip archive");
        match result {
            Err(PipelineError::Extraction { bundle, .. }) => assert_eq!(bundle, "broken.zip"),
            other => panic!("expected extraction error, got {:?}", other.map(|f| f.len())),
        }
    }

    #[test]
    fn test_extract_missing_file() {
        let result = extract_path(Path::new("/definitely/not/here/1T2024.zip"));
        assert!(matches!(result, Err(PipelineError::Extraction { .. })));
    }

    #[test]
    fn test_extract_empty_archive() {
        let bytes = build_zip(&[]);
        let files = extract_bytes("empty.zip", &bytes).unwrap();
        assert!(files.is_empty());
    }
}
