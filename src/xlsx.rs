//! Minimal XLSX worksheet reader.
//!
//! Reads the first worksheet of a workbook into a grid of typed cells using
//! `zip` and `quick-xml`. Shared strings, inline strings, booleans, and
//! numbers are supported; styles are not interpreted, so date cells come
//! back as numeric serials and are converted by the table loader.

use quick_xml::events::{BytesStart, Event};
use std::io::Read;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells read from one sheet.
const MAX_CELLS: usize = 1_000_000;
/// Zero-based index of the last worksheet column, `XFD`.
const MAX_COLUMN: usize = 16_383;

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("not a valid xlsx archive: {0}")]
    Archive(String),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("malformed worksheet XML: {0}")]
    Xml(String),
    #[error("cell {0} is beyond the last worksheet column (XFD)")]
    ColumnOutOfRange(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Read the first worksheet as rows of cells, padded so that every cell
/// sits at its column position.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, XlsxError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| XlsxError::Archive(e.to_string()))?;
    let shared = read_shared_strings(&mut archive)?;
    let first = worksheet_names(&archive)
        .into_iter()
        .next()
        .ok_or(XlsxError::NoWorksheet)?;
    let xml = read_entry_bounded(&mut archive, &first)?;
    parse_sheet(&xml, &shared)
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, XlsxError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| XlsxError::Archive(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| XlsxError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(XlsxError::Archive(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Shared string table; rich-text runs inside one `<si>` are concatenated.
/// Workbooks without any text cells have no table at all.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, XlsxError> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = current.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| XlsxError::Xml(e.to_string()))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: Option<String>,
    raw: String,
}

fn parse_sheet(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<Cell>>, XlsxError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut row: Option<Vec<Cell>> = None;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;
    let mut cells_read = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row = Some(Vec::new()),
                b"c" => {
                    let next_col = row.as_ref().map_or(0, Vec::len);
                    cell = Some(start_cell(&e, next_col)?);
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.raw
                        .push_str(&te.unescape().map_err(|e| XlsxError::Xml(e.to_string()))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(pending), Some(r)) = (cell.take(), row.as_mut()) {
                        let column = pending.column;
                        if r.len() <= column {
                            r.resize(column + 1, Cell::Empty);
                        }
                        r[column] = finish_cell(pending, shared);
                        cells_read += 1;
                    }
                }
                b"row" => rows.extend(row.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
        if cells_read >= MAX_CELLS {
            tracing::warn!(limit = MAX_CELLS, "xlsx sheet truncated at cell limit");
            break;
        }
    }
    Ok(rows)
}

fn start_cell(e: &BytesStart<'_>, next_col: usize) -> Result<PendingCell, XlsxError> {
    let mut pending = PendingCell {
        column: next_col,
        ..Default::default()
    };
    let mut reference = None;
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"r" => {
                if let Some(col) = column_index(&value)? {
                    pending.column = col;
                }
                reference = Some(value);
            }
            b"t" => pending.kind = Some(value),
            _ => {}
        }
    }
    if pending.column > MAX_COLUMN {
        let at = reference.unwrap_or_else(|| format!("at column {}", pending.column + 1));
        return Err(XlsxError::ColumnOutOfRange(at));
    }
    Ok(pending)
}

fn finish_cell(pending: PendingCell, shared: &[String]) -> Cell {
    let raw = pending.raw;
    match pending.kind.as_deref() {
        Some("s") => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map(|s| Cell::Text(s.clone()))
            .unwrap_or(Cell::Empty),
        Some("b") => Cell::Bool(raw.trim() == "1"),
        Some("inlineStr") | Some("str") | Some("e") => Cell::Text(raw),
        _ if raw.trim().is_empty() => Cell::Empty,
        _ => raw
            .trim()
            .parse::<f64>()
            .map(Cell::Number)
            .unwrap_or(Cell::Text(raw)),
    }
}

/// Zero-based column index from a cell reference such as `"AB12"`.
/// `None` when the reference has no column letters.
fn column_index(reference: &str) -> Result<Option<usize>, XlsxError> {
    let mut n = 0usize;
    let mut any = false;
    for c in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = (c.to_ascii_uppercase() as u8 - b'A' + 1) as usize;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .filter(|n| *n <= MAX_COLUMN + 1)
            .ok_or_else(|| XlsxError::ColumnOutOfRange(reference.to_string()))?;
        any = true;
    }
    Ok(any.then(|| n - 1))
}
