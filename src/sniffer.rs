// 🔎 Schema Sniffer
// Agency files change encoding and delimiter from one release to the next.
// Instead of assuming one, try an ordered list of (encoding, delimiter)
// candidates and keep the first one that yields a real table.

use crate::extractor::{MediaType, RawFile};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::{ReaderBuilder, Trim};
use encoding_rs::{ISO_8859_15, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use tracing::debug;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Data rows parsed during a trial (after the header)
pub const DEFAULT_SAMPLE_ROWS: usize = 5;

// ============================================================================
// CELLS & TABLES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Number(f64),
}

impl Cell {
    /// Empty (or whitespace-only) text becomes Null
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Null
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    fn from_spreadsheet(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Null,
            Data::String(s) => Cell::from_text(s),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            other => Cell::from_text(&other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// String rendering; integral numbers render without a fractional part
    /// (an account code stored as 411.0 reads "411").
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            Cell::Number(n) => Some(n.to_string()),
        }
    }
}

/// Row-oriented table with normalized (lower-cased, trimmed) column names.
///
/// Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub encoding: Option<TextEncoding>,
    pub delimiter: Option<char>,
}

impl NormalizedTable {
    /// Build a table, normalizing column names and squaring rows to the
    /// header width (short rows padded with Null, long rows cut).
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| normalize_column(c)).collect();
        let width = columns.len();

        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Null);
                row
            })
            .collect();

        NormalizedTable {
            columns,
            rows,
            encoding: None,
            delimiter: None,
        }
    }

    pub fn with_dialect(mut self, encoding: TextEncoding, delimiter: u8) -> Self {
        self.encoding = Some(encoding);
        self.delimiter = Some(delimiter as char);
        self
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column whose name contains any of `hints`
    pub fn find_column(&self, hints: &[&str]) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| hints.iter().any(|hint| column.contains(hint)))
    }
}

pub fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// ENCODINGS
// ============================================================================

/// Candidate text encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    /// UTF-8, with or without a leading BOM
    Utf8,
    /// ISO-8859-1
    Latin1,
    /// ISO-8859-15
    Latin9,
    /// Windows code page 1252
    Windows1252,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "iso-8859-1",
            TextEncoding::Latin9 => "iso-8859-15",
            TextEncoding::Windows1252 => "windows-1252",
        }
    }

    /// Strict decode: None on the first malformed byte.
    ///
    /// The ISO-8859 variants reject 0x80..=0x9F; those are C1 controls there
    /// and only show up as text in Windows code pages.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                UTF_8
                    .decode_without_bom_handling_and_without_replacement(body)
                    .map(Cow::into_owned)
            }
            TextEncoding::Latin1 => {
                if has_c1_controls(bytes) {
                    return None;
                }
                Some(encoding_rs::mem::decode_latin1(bytes).into_owned())
            }
            TextEncoding::Latin9 => {
                if has_c1_controls(bytes) {
                    return None;
                }
                ISO_8859_15
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(Cow::into_owned)
            }
            TextEncoding::Windows1252 => WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(Cow::into_owned),
        }
    }
}

fn has_c1_controls(bytes: &[u8]) -> bool {
    bytes.iter().any(|b| (0x80..=0x9F).contains(b))
}

// ============================================================================
// SNIFFER
// ============================================================================

/// Trial-decoding sniffer over ordered encoding and delimiter candidates
#[derive(Debug, Clone)]
pub struct Sniffer {
    encodings: Vec<TextEncoding>,
    delimiters: Vec<u8>,
    sample_rows: usize,
}

impl Default for Sniffer {
    fn default() -> Self {
        Sniffer {
            encodings: vec![
                TextEncoding::Utf8,
                TextEncoding::Latin1,
                TextEncoding::Latin9,
                TextEncoding::Windows1252,
            ],
            delimiters: vec![b';', b',', b'\t'],
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }
}

impl Sniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sniffer with custom candidate lists (tried in the given order)
    pub fn with_candidates(encodings: Vec<TextEncoding>, delimiters: Vec<u8>) -> Self {
        Sniffer {
            encodings,
            delimiters,
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }

    /// Turn an archive member into a table.
    ///
    /// None means "undetermined": the caller skips the file.
    pub fn sniff(&self, file: &RawFile) -> Option<NormalizedTable> {
        let table = match file.media_type {
            MediaType::Csv | MediaType::Text => self.sniff_delimited(&file.content),
            MediaType::Spreadsheet => read_spreadsheet(&file.content),
            MediaType::Other => None,
        };

        match &table {
            Some(t) => debug!(
                file = %file.name,
                encoding = t.encoding.map(|e| e.name()).unwrap_or("spreadsheet"),
                columns = t.width(),
                rows = t.len(),
                "sniffed table"
            ),
            None => debug!(file = %file.name, "undetermined file, skipped"),
        }

        table
    }

    /// First (encoding, delimiter) pair whose sample parses into more than
    /// one column without a decode or structure error.
    pub fn detect(&self, bytes: &[u8]) -> Option<(TextEncoding, u8)> {
        self.detect_decoded(bytes)
            .map(|(encoding, delimiter, _)| (encoding, delimiter))
    }

    fn detect_decoded(&self, bytes: &[u8]) -> Option<(TextEncoding, u8, String)> {
        for encoding in &self.encodings {
            let text = match encoding.decode(bytes) {
                Some(text) => text,
                None => continue,
            };

            for delimiter in &self.delimiters {
                if sample_is_tabular(&text, *delimiter, self.sample_rows) {
                    return Some((*encoding, *delimiter, text));
                }
            }
        }

        None
    }

    /// Decode + parse delimited text with the detected dialect
    pub fn sniff_delimited(&self, bytes: &[u8]) -> Option<NormalizedTable> {
        let (encoding, delimiter, text) = self.detect_decoded(bytes)?;
        parse_delimited(&text, delimiter).map(|t| t.with_dialect(encoding, delimiter))
    }
}

fn sample_is_tabular(text: &str, delimiter: u8, sample_rows: usize) -> bool {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let width = match reader.headers() {
        Ok(headers) => headers.len(),
        Err(_) => return false,
    };

    if width < 2 {
        return false;
    }

    reader.records().take(sample_rows).all(|record| record.is_ok())
}

fn parse_delimited(text: &str, delimiter: u8) -> Option<NormalizedTable> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers().ok()?.iter().map(str::to_string).collect();
    let width = headers.len();

    let mut rows = Vec::new();
    let mut dropped = 0usize;

    for record in reader.records() {
        match record {
            Ok(record) if record.len() <= width => {
                rows.push(record.iter().map(Cell::from_text).collect());
            }
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "dropped malformed rows");
    }

    Some(NormalizedTable::new(headers, rows))
}

/// Spreadsheets skip dialect detection: one attempt on the first sheet
fn read_spreadsheet(bytes: &[u8]) -> Option<NormalizedTable> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).ok()?;
    let range = workbook.worksheet_range_at(0)?.ok()?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows.next()?.iter().map(|c| c.to_string()).collect();
    let body: Vec<Vec<Cell>> = rows
        .map(|row| row.iter().map(Cell::from_spreadsheet).collect())
        .collect();

    Some(NormalizedTable::new(headers, body))
}

// ============================================================================
// TESTS
// ============================================================================
