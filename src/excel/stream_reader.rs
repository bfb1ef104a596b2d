//! Pull-based .xlsx reader for the streaming path
//!
//! Reads the small workbook parts up front (shared strings, styles, sheet
//! list) and then hands out one row at a time from each sheet part. Nothing
//! beyond the current row is buffered, so memory stays flat however many
//! rows a sheet holds.

use crate::core::address::{CellAddress, MAX_COL};
use crate::core::dates;
use crate::error::{SheetcheckError, SheetcheckResult};
use crate::types::{Cell, CellValue};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::io::{BufReader, Read, Seek};
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const STYLES_PART: &str = "xl/styles.xml";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// A worksheet listed in workbook.xml
#[derive(Debug, Clone, PartialEq)]
pub struct SheetEntry {
    pub name: String,
    /// Part path inside the container, e.g. "xl/worksheets/sheet1.xml"
    pub path: String,
}

/// One row of a sheet, in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamRow {
    /// 1-based row number
    pub index: u32,
    pub cells: Vec<Cell>,
}

/// Per-style number format, indexed by the `s` attribute of a cell
#[derive(Debug, Clone, Default)]
struct CellFormat {
    code: Option<String>,
    is_date: bool,
}

#[derive(Debug, Default)]
struct WorkbookParts {
    shared_strings: Vec<String>,
    formats: Vec<CellFormat>,
    sheets: Vec<SheetEntry>,
}

/// Streaming reader over an .xlsx container
pub struct StreamReader<R: Read + Seek> {
    archive: ZipArchive<R>,
    parts: WorkbookParts,
}

impl<R: Read + Seek> StreamReader<R> {
    /// Open the container and read the workbook-level parts
    pub fn open(reader: R) -> SheetcheckResult<Self> {
        let mut archive = ZipArchive::new(reader)?;
        if archive.by_name(CONTENT_TYPES_PART).is_err() {
            return Err(SheetcheckError::Container(format!(
                "missing {CONTENT_TYPES_PART}; not an .xlsx workbook"
            )));
        }

        let shared_strings = read_shared_strings(&mut archive)?;
        let formats = read_styles(&mut archive)?;
        let listed = read_workbook_xml(&mut archive)?;
        let paths = read_workbook_rels(&mut archive)?;

        let sheets = listed
            .into_iter()
            .filter_map(|(name, r_id)| {
                paths.get(&r_id).map(|path| SheetEntry {
                    name,
                    path: path.clone(),
                })
            })
            .collect();

        Ok(Self {
            archive,
            parts: WorkbookParts {
                shared_strings,
                formats,
                sheets,
            },
        })
    }

    pub fn sheets(&self) -> &[SheetEntry] {
        &self.parts.sheets
    }

    /// Start reading the rows of one sheet
    pub fn rows(&mut self, sheet: usize) -> SheetcheckResult<RowReader<'_>> {
        let entry = self
            .parts
            .sheets
            .get(sheet)
            .ok_or_else(|| SheetcheckError::Container(format!("no sheet at index {sheet}")))?;
        let file = self.archive.by_name(&entry.path).map_err(|e| SheetcheckError::Stream {
            part: entry.path.clone(),
            message: e.to_string(),
        })?;
        let file: Box<dyn Read + '_> = Box::new(file);
        Ok(RowReader {
            xml: Reader::from_reader(BufReader::new(file)),
            part: entry.path.clone(),
            parts: &self.parts,
            buf: Vec::new(),
            last_row: 0,
            finished: false,
        })
    }
}

/// Rows of one sheet, pulled one at a time
pub struct RowReader<'a> {
    xml: Reader<BufReader<Box<dyn Read + 'a>>>,
    part: String,
    parts: &'a WorkbookParts,
    buf: Vec<u8>,
    last_row: u32,
    finished: bool,
}

/// What the cell parser is collecting text for
#[derive(Clone, Copy, PartialEq)]
enum Capture {
    None,
    Formula,
    Value,
    InlineText,
}

/// A `<c>` element while it is being read
struct PendingCell {
    address: CellAddress,
    cell_type: String,
    style: usize,
    formula: String,
    value: Option<String>,
}

impl<'a> RowReader<'a> {
    /// The next row holding at least one cell, or None at the end of the sheet.
    ///
    /// Malformed XML surfaces as `SheetcheckError::Xml`; an unreadable
    /// compressed stream as `SheetcheckError::Stream`.
    pub fn next_row(&mut self) -> SheetcheckResult<Option<StreamRow>> {
        while !self.finished {
            if let Some(row) = self.read_row()? {
                if !row.cells.is_empty() {
                    return Ok(Some(row));
                }
            }
        }
        Ok(None)
    }

    /// Read up to the next `</row>`; None when the sheet ends first
    fn read_row(&mut self) -> SheetcheckResult<Option<StreamRow>> {
        let parts = self.parts;
        let mut row: Option<StreamRow> = None;
        let mut pending: Option<PendingCell> = None;
        let mut capture = Capture::None;
        let mut last_col = 0u32;

        loop {
            self.buf.clear();
            let event = self
                .xml
                .read_event_into(&mut self.buf)
                .map_err(|e| xml_error(&self.part, e))?;
            match event {
                // <row/> has no cells and no end tag
                Event::Empty(e) if e.name().as_ref() == b"row" => {
                    self.last_row = row_index(&e, self.last_row);
                    return Ok(Some(StreamRow {
                        index: self.last_row,
                        cells: Vec::new(),
                    }));
                }
                Event::Start(e) if e.name().as_ref() == b"row" => {
                    self.last_row = row_index(&e, self.last_row);
                    last_col = 0;
                    row = Some(StreamRow {
                        index: self.last_row,
                        cells: Vec::new(),
                    });
                }
                Event::Start(e) if e.name().as_ref() == b"c" => {
                    pending = Some(start_cell(&e, self.last_row, &mut last_col));
                }
                // A self-closing <c/> carries style only
                Event::Empty(e) if e.name().as_ref() == b"c" => {
                    start_cell(&e, self.last_row, &mut last_col);
                }
                Event::Start(e) => match e.name().as_ref() {
                    b"f" if pending.is_some() => capture = Capture::Formula,
                    b"v" if pending.is_some() => capture = Capture::Value,
                    b"t" if pending.is_some() => capture = Capture::InlineText,
                    _ => {}
                },
                Event::Text(e) if capture != Capture::None => {
                    let text = e.unescape().map_err(|e| xml_error(&self.part, e))?;
                    if let Some(cell) = pending.as_mut() {
                        match capture {
                            Capture::Formula => cell.formula.push_str(&text),
                            Capture::Value | Capture::InlineText => {
                                cell.value.get_or_insert_with(String::new).push_str(&text)
                            }
                            Capture::None => {}
                        }
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"f" | b"v" | b"t" => capture = Capture::None,
                    b"c" => {
                        if let (Some(cell), Some(row)) = (pending.take(), row.as_mut()) {
                            if let Some(cell) = finish_cell(parts, cell) {
                                row.cells.push(cell);
                            }
                        }
                    }
                    b"row" => return Ok(row.take()),
                    b"sheetData" => {
                        self.finished = true;
                        return Ok(row.take());
                    }
                    _ => {}
                },
                Event::Eof => {
                    self.finished = true;
                    return Ok(row.take());
                }
                _ => {}
            }
        }
    }
}

fn row_index(e: &BytesStart<'_>, last_row: u32) -> u32 {
    attribute(e, b"r")
        .and_then(|r| r.parse().ok())
        .unwrap_or(last_row + 1)
}

/// Cells without an `r` attribute follow the previous cell in the row
fn start_cell(e: &BytesStart<'_>, row: u32, last_col: &mut u32) -> PendingCell {
    let address = attribute(e, b"r")
        .and_then(|r| CellAddress::parse(&r))
        .unwrap_or_else(|| CellAddress::new(row.max(1), (*last_col + 1).min(MAX_COL)));
    *last_col = address.col;
    PendingCell {
        address,
        cell_type: attribute(e, b"t").unwrap_or_else(|| "n".to_string()),
        style: attribute(e, b"s").and_then(|s| s.parse().ok()).unwrap_or(0),
        formula: String::new(),
        value: None,
    }
}

/// Turn a finished `<c>` into a cell; None when it holds nothing
fn finish_cell(parts: &WorkbookParts, pending: PendingCell) -> Option<Cell> {
    let format = parts.formats.get(pending.style);
    let value = pending
        .value
        .map(|raw| typed_value(parts, &pending.cell_type, raw, format));

    let formula = pending.formula.trim();
    let mut cell = if !formula.is_empty() {
        let text = if formula.starts_with('=') {
            formula.to_string()
        } else {
            format!("={formula}")
        };
        Cell::new(
            pending.address,
            CellValue::Formula {
                text,
                cached: value.map(Box::new),
            },
        )
    } else {
        Cell::new(pending.address, value?)
    };

    if let Some(code) = format.and_then(|f| f.code.as_ref()) {
        cell = cell.with_format(code.clone());
    }
    Some(cell)
}

fn typed_value(
    parts: &WorkbookParts,
    cell_type: &str,
    raw: String,
    format: Option<&CellFormat>,
) -> CellValue {
    match cell_type {
        "s" => {
            let text = raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| parts.shared_strings.get(i))
                .cloned()
                .unwrap_or_default();
            CellValue::Text(text)
        }
        "str" | "inlineStr" | "e" => CellValue::Text(raw),
        "b" => CellValue::Boolean(raw.trim() == "1"),
        "d" => CellValue::Date(dates::parse_iso_serial(&raw).unwrap_or(f64::NAN)),
        _ => {
            let number = raw.trim().parse::<f64>().unwrap_or(f64::NAN);
            if format.is_some_and(|f| f.is_date) {
                CellValue::Date(number)
            } else {
                CellValue::Number(number)
            }
        }
    }
}

fn xml_error(part: &str, err: quick_xml::Error) -> SheetcheckError {
    match err {
        // Deflate failures surface as IO errors from the zip entry
        quick_xml::Error::Io(e) => SheetcheckError::Stream {
            part: part.to_string(),
            message: e.to_string(),
        },
        other => SheetcheckError::Xml {
            part: part.to_string(),
            message: other.to_string(),
        },
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

//==============================================================================
// Workbook-level parts
//==============================================================================

fn part_reader<'a, R: Read + Seek>(
    archive: &'a mut ZipArchive<R>,
    part: &str,
) -> Option<Reader<BufReader<Box<dyn Read + 'a>>>> {
    let file = archive.by_name(part).ok()?;
    let boxed: Box<dyn Read + 'a> = Box::new(file);
    Some(Reader::from_reader(BufReader::new(boxed)))
}

fn read_shared_strings<R: Read + Seek>(archive: &mut ZipArchive<R>) -> SheetcheckResult<Vec<String>> {
    let mut strings = Vec::new();
    // No shared strings is valid
    let Some(mut xml) = part_reader(archive, SHARED_STRINGS_PART) else {
        return Ok(strings);
    };

    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the text in another script
    let mut in_phonetic = false;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" if in_si && !in_phonetic => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"si" => {
                    strings.push(std::mem::take(&mut current));
                    in_si = false;
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_t => {
                let text = e.unescape().map_err(|e| xml_error(SHARED_STRINGS_PART, e))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(SHARED_STRINGS_PART, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Number format per cell style (`cellXfs` entry)
fn read_styles<R: Read + Seek>(archive: &mut ZipArchive<R>) -> SheetcheckResult<Vec<CellFormat>> {
    let Some(mut xml) = part_reader(archive, STYLES_PART) else {
        return Ok(Vec::new());
    };

    let mut buf = Vec::new();
    let mut custom: HashMap<u32, String> = HashMap::new();
    let mut format_ids: Vec<u32> = Vec::new();
    let mut in_cell_xfs = false;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"numFmt" => {
                    let id = attribute(&e, b"numFmtId").and_then(|v| v.parse().ok());
                    if let (Some(id), Some(code)) = (id, attribute(&e, b"formatCode")) {
                        custom.insert(id, code);
                    }
                }
                b"xf" if in_cell_xfs => {
                    let id = attribute(&e, b"numFmtId")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    format_ids.push(id);
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(STYLES_PART, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(format_ids
        .into_iter()
        .map(|id| match custom.get(&id) {
            Some(code) => CellFormat {
                is_date: is_date_format(code),
                code: Some(code.clone()),
            },
            None => CellFormat {
                is_date: is_builtin_date_format(id),
                code: builtin_format_code(id).map(str::to_string),
            },
        })
        .collect())
}

/// Sheet names and relationship ids, in workbook order
fn read_workbook_xml<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> SheetcheckResult<Vec<(String, String)>> {
    let mut xml = part_reader(archive, WORKBOOK_PART)
        .ok_or_else(|| SheetcheckError::Container(format!("missing {WORKBOOK_PART}")))?;

    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"sheet" => {
                if let (Some(name), Some(r_id)) = (attribute(&e, b"name"), attribute(&e, b"r:id")) {
                    sheets.push((name, r_id));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(WORKBOOK_PART, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Relationship id → worksheet part path
fn read_workbook_rels<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> SheetcheckResult<HashMap<String, String>> {
    let mut xml = part_reader(archive, WORKBOOK_RELS_PART)
        .ok_or_else(|| SheetcheckError::Container(format!("missing {WORKBOOK_RELS_PART}")))?;

    let mut buf = Vec::new();
    let mut rels = HashMap::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"Relationship" => {
                let id = attribute(&e, b"Id");
                let target = attribute(&e, b"Target");
                let rel_type = attribute(&e, b"Type");
                if let (Some(id), Some(target), Some(rel_type)) = (id, target, rel_type) {
                    if rel_type.ends_with("/worksheet") {
                        // Targets are relative to xl/ unless absolute
                        let path = match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("xl/{target}"),
                        };
                        rels.insert(id, path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(WORKBOOK_RELS_PART, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

//==============================================================================
// Number formats
//==============================================================================

/// Built-in format ids that display dates or times
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 45..=47)
}

fn builtin_format_code(id: u32) -> Option<&'static str> {
    let code = match id {
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        14 => "mm-dd-yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        49 => "@",
        _ => return None,
    };
    Some(code)
}

/// True when a custom format code renders a date or time.
///
/// Follows calamine's `detect_custom_number_format` (calamine `src/formats.rs`)
/// so both readers classify the same cells as dates.
/// Quoted literals, escapes and bracketed sections ([Red], [$-409]) are
/// skipped; elapsed-time codes such as "[h]:mm" count as durations, not dates.
pub fn is_date_format(code: &str) -> bool {
    let mut escaped = false;
    let mut quoted = false;
    let mut brackets = 0u8;
    let mut prev = ' ';
    let mut elapsed = false;
    let mut am_pm = false;

    for c in code.chars() {
        match (c, escaped, quoted, am_pm, brackets) {
            (_, true, ..) => escaped = false,
            ('_' | '\\', ..) => escaped = true,
            ('"', _, true, _, _) => quoted = false,
            (_, _, true, _, _) => {}
            ('"', ..) => quoted = true,
            // Only the first section decides
            (';', ..) => return false,
            ('[', ..) => brackets += 1,
            (']', .., 1) if elapsed => return false,
            (']', ..) => brackets = brackets.saturating_sub(1),
            ('a' | 'A', _, _, false, 0) => am_pm = true,
            ('p' | 'm' | '/' | 'P' | 'M', _, _, true, 0) => return true,
            ('d' | 'm' | 'h' | 'y' | 's' | 'D' | 'M' | 'H' | 'Y' | 'S', _, _, false, 0) => {
                return true
            }
            _ => {
                if !(elapsed && c.eq_ignore_ascii_case(&prev)) {
                    elapsed = prev == '[' && matches!(c, 'm' | 'h' | 's' | 'M' | 'H' | 'S');
                }
            }
        }
        prev = c;
    }
    false
}
