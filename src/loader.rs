//! Tabular loader for CSV and spreadsheet files.
//!
//! Dispatches on the file extension:
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.csv` | `csv` crate, first record is the header |
//! | `.xlsx`, `.xls` | OOXML workbook (ZIP + SpreadsheetML), first worksheet |
//!
//! Legacy binary (BIFF/OLE2) `.xls` workbooks are rejected with a
//! [`RagError::ParseError`] asking for an `.xlsx` re-save; `.xls` files that
//! are really OOXML containers load normally.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use walkdir::WalkDir;

use crate::error::{RagError, Result};
use crate::models::{Cell, Table};

/// Extensions accepted by the loader.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Columns in a worksheet (`A` through `XFD`).
const MAX_COLUMNS: usize = 16_384;

const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv,
    Workbook,
}

fn detect_format(file_name: &str) -> Result<Format> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => Ok(Format::Csv),
        "xlsx" | "xls" => Ok(Format::Workbook),
        _ => Err(RagError::UnsupportedFormat(file_name.to_string())),
    }
}

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| detect_format(n).is_ok())
        .unwrap_or(false)
}

/// Load a table from a file on disk.
pub fn load_table(path: &Path) -> Result<Table> {
    let bytes = read_source(path)?;
    load_table_from_bytes(&path.display().to_string(), &bytes)
}

/// Raw bytes of a supported data file. The extension is checked before the
/// file is opened.
pub fn read_source(path: &Path) -> Result<Vec<u8>> {
    let name = path.display().to_string();
    detect_format(&name)?;
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RagError::NotFound(name),
        _ => RagError::parse(&name, e),
    })
}

/// Load a table from uploaded bytes; `file_name` decides the format.
pub fn load_table_from_bytes(file_name: &str, bytes: &[u8]) -> Result<Table> {
    let format = detect_format(file_name)?;
    parse(file_name, format, bytes)
}

fn parse(name: &str, format: Format, bytes: &[u8]) -> Result<Table> {
    let table = match format {
        Format::Csv => read_csv(name, bytes)?,
        Format::Workbook => read_workbook(name, bytes)?,
    };
    tracing::debug!(
        file = name,
        rows = table.row_count(),
        columns = table.column_count(),
        "loaded table"
    );
    Ok(table)
}

/// List the supported files directly inside `dir`, sorted by name.
///
/// The directory is created when it does not exist yet.
pub fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        tracing::info!(dir = %dir.display(), "created data directory");
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| RagError::PersistenceError(e.to_string()))?;
        if entry.file_type().is_file() && is_supported(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

// ============ CSV ============

fn read_csv(name: &str, bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| RagError::parse(name, e))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| RagError::parse(name, e))?;
        if record.len() > columns.len() {
            return Err(RagError::parse(
                name,
                format!(
                    "row {} has {} fields, header has {}",
                    i + 2,
                    record.len(),
                    columns.len()
                ),
            ));
        }
        let mut row: Vec<Cell> = record
            .iter()
            .map(|v| {
                if v.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(v.to_string())
                }
            })
            .collect();
        row.resize(columns.len(), Cell::Empty);
        rows.push(row);
    }

    Ok(Table { columns, rows })
}

// ============ OOXML workbook ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_workbook(name: &str, bytes: &[u8]) -> Result<Table> {
    if bytes.starts_with(OLE2_MAGIC) {
        return Err(RagError::parse(
            name,
            "legacy binary .xls workbooks are not supported; re-save the file as .xlsx",
        ));
    }

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| RagError::parse(name, e))?;

    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")
            .map_err(|e| RagError::parse(name, e))?;
        read_shared_strings(&xml).map_err(|e| RagError::parse(name, e))?
    } else {
        Vec::new()
    };

    let sheet = first_worksheet(&mut archive)
        .ok_or_else(|| RagError::parse(name, "workbook contains no worksheets"))?;
    let sheet_xml =
        read_zip_entry_bounded(&mut archive, &sheet).map_err(|e| RagError::parse(name, e))?;
    let grid = read_sheet_rows(&sheet_xml, &shared_strings).map_err(|e| RagError::parse(name, e))?;

    Ok(grid_to_table(grid))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> std::result::Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        ));
    }
    Ok(out)
}

/// Resolve the first sheet in workbook order through `workbook.xml` and its
/// relationships, falling back to the lowest-numbered `sheetN.xml`.
fn first_worksheet(archive: &mut Archive<'_>) -> Option<String> {
    if let Some(path) = first_sheet_from_workbook(archive) {
        if archive.by_name(&path).is_ok() {
            return Some(path);
        }
    }

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
    names.into_iter().next()
}

fn first_sheet_from_workbook(archive: &mut Archive<'_>) -> Option<String> {
    let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml").ok()?;
    let rels = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels").ok()?;

    let mut rel_id = None;
    let mut reader = quick_xml::Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                rel_id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"id")
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                break;
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    let rel_id = rel_id?;

    let mut reader = quick_xml::Reader::from_reader(rels.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let attrs: HashMap<Vec<u8>, String> = e
                    .attributes()
                    .flatten()
                    .filter_map(|a| {
                        let value = a.unescape_value().ok()?.into_owned();
                        Some((a.key.local_name().as_ref().to_vec(), value))
                    })
                    .collect();
                if attrs.get(b"Id".as_slice()) == Some(&rel_id) {
                    let target = attrs.get(b"Target".as_slice())?;
                    return Some(match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    });
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn read_shared_strings(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Column index from an A1-style reference (`"C7"` → 2). `Ok(None)` when
/// the reference carries no column letters.
fn column_index(reference: &str) -> std::result::Result<Option<usize>, String> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return Ok(None);
    }
    let mut idx = 0usize;
    for b in letters {
        idx = idx
            .checked_mul(26)
            .and_then(|i| i.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|&i| i <= MAX_COLUMNS)
            .ok_or_else(|| format!("cell reference '{}' is past the last column XFD", reference))?;
    }
    Ok(Some(idx - 1))
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: Option<String>,
    value: String,
}

impl PendingCell {
    fn finish(self, shared_strings: &[String]) -> Cell {
        let raw = self.value;
        match self.kind.as_deref() {
            Some("s") => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i))
                .map(|s| text_cell(s))
                .unwrap_or(Cell::Empty),
            Some("b") => Cell::Bool(raw.trim() == "1"),
            Some("inlineStr") | Some("str") | Some("e") => text_cell(&raw),
            _ => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Cell::Empty
                } else {
                    trimmed
                        .parse::<f64>()
                        .map(Cell::Number)
                        .unwrap_or_else(|_| Cell::Text(trimmed.to_string()))
                }
            }
        }
    }
}

fn text_cell(s: &str) -> Cell {
    if s.is_empty() {
        Cell::Empty
    } else {
        Cell::Text(s.to_string())
    }
}

fn read_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
) -> std::result::Result<Vec<BTreeMap<usize, Cell>>, String> {
    let mut rows = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Option<BTreeMap<usize, Cell>> = None;
    let mut next_column = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = Some(BTreeMap::new());
                    next_column = 0;
                }
                b"c" => {
                    let mut pending = PendingCell {
                        column: next_column,
                        ..Default::default()
                    };
                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().map_err(|e| e.to_string())?;
                        match attr.key.local_name().as_ref() {
                            b"r" => {
                                if let Some(col) = column_index(&value)? {
                                    pending.column = col;
                                }
                            }
                            b"t" => pending.kind = Some(value.into_owned()),
                            _ => {}
                        }
                    }
                    next_column = pending.column + 1;
                    cell = Some(pending);
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(BTreeMap::new()),
                b"c" => {
                    let mut column = next_column;
                    if let Some(attr) = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"r")
                    {
                        let value = attr.unescape_value().map_err(|e| e.to_string())?;
                        if let Some(col) = column_index(&value)? {
                            column = col;
                        }
                    }
                    next_column = column + 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                if let Some(pending) = cell.as_mut() {
                    pending
                        .value
                        .push_str(&te.unescape().map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(pending), Some(r)) = (cell.take(), row.as_mut()) {
                        let column = pending.column;
                        let value = pending.finish(shared_strings);
                        if value != Cell::Empty {
                            r.insert(column, value);
                        }
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// First non-empty row becomes the header; fully empty rows are dropped.
fn grid_to_table(grid: Vec<BTreeMap<usize, Cell>>) -> Table {
    let mut rows = grid.into_iter().filter(|r| !r.is_empty());
    let header = match rows.next() {
        Some(h) => h,
        None => return Table::default(),
    };
    let data: Vec<BTreeMap<usize, Cell>> = rows.collect();

    let width = header
        .keys()
        .chain(data.iter().flat_map(|r| r.keys()))
        .max()
        .map(|m| m + 1)
        .unwrap_or(0);

    let columns = (0..width)
        .map(|i| match header.get(&i) {
            Some(cell) => cell.to_string(),
            None => format!("Unnamed: {}", i),
        })
        .collect();

    let rows = data
        .into_iter()
        .map(|mut r| {
            (0..width)
                .map(|i| r.remove(&i).unwrap_or(Cell::Empty))
                .collect()
        })
        .collect();

    Table { columns, rows }
}
