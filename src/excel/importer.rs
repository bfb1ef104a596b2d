//! Full-load reader: .xlsx bytes → SpreadsheetDocument

use crate::core::address::CellAddress;
use crate::core::dates;
use crate::error::SheetcheckResult;
use crate::types::{Cell, CellValue, Sheet, SpreadsheetDocument};
use calamine::{Data, Range, Reader, Xlsx};
use std::io::Cursor;
use tracing::{debug, warn};

/// Format recorded on cells calamine reports as dates
const DATE_FORMAT: &str = "yyyy-mm-dd";

/// A loaded workbook plus the sheets calamine could not read
#[derive(Debug, Default)]
pub struct ImportedWorkbook {
    pub document: SpreadsheetDocument,
    /// (sheet name, reason)
    pub unreadable_sheets: Vec<(String, String)>,
}

/// Loads every sheet of a workbook into memory
pub struct ExcelImporter<'a> {
    bytes: &'a [u8],
}

impl<'a> ExcelImporter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Read values and formula text for every sheet.
    ///
    /// Fails only when the container itself cannot be opened; a sheet that
    /// fails to parse is skipped and listed in `unreadable_sheets`.
    pub fn import(&self) -> SheetcheckResult<ImportedWorkbook> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(self.bytes))?;
        let mut imported = ImportedWorkbook::default();

        for sheet_name in workbook.sheet_names() {
            let range = match workbook.worksheet_range(&sheet_name) {
                Ok(range) => range,
                Err(e) => {
                    warn!(sheet = %sheet_name, error = %e, "skipping unreadable sheet");
                    imported.unreadable_sheets.push((sheet_name, e.to_string()));
                    continue;
                }
            };
            let formulas = workbook.worksheet_formula(&sheet_name).ok();
            let sheet = Self::process_sheet(&sheet_name, &range, formulas.as_ref());
            debug!(sheet = %sheet_name, cells = sheet.cells.len(), "sheet loaded");
            imported.document.add_sheet(sheet);
        }

        Ok(imported)
    }

    fn process_sheet(name: &str, range: &Range<Data>, formulas: Option<&Range<String>>) -> Sheet {
        let mut sheet = Sheet::new(name);

        // Range coordinates are relative to its start, which is 0-based absolute
        if let Some((row0, col0)) = range.start() {
            for (r, c, data) in range.used_cells() {
                let Some(address) = absolute(row0, col0, r, c) else {
                    continue;
                };
                if let Some(cell) = convert(address, data) {
                    sheet.set(cell);
                }
            }
        }

        if let Some(formulas) = formulas {
            if let Some((row0, col0)) = formulas.start() {
                for (r, c, text) in formulas.used_cells() {
                    if text.trim().is_empty() {
                        continue;
                    }
                    let Some(address) = absolute(row0, col0, r, c) else {
                        continue;
                    };
                    let cached = sheet
                        .cells
                        .remove(&address)
                        .map(|cell| Box::new(cell.value));
                    let text = if text.starts_with('=') {
                        text.clone()
                    } else {
                        format!("={text}")
                    };
                    sheet.set(Cell::new(address, CellValue::Formula { text, cached }));
                }
            }
        }

        sheet
    }
}

fn absolute(row0: u32, col0: u32, r: usize, c: usize) -> Option<CellAddress> {
    let row = u32::try_from(r).ok()?.checked_add(row0)?.checked_add(1)?;
    let col = u32::try_from(c).ok()?.checked_add(col0)?.checked_add(1)?;
    Some(CellAddress::new(row, col))
}

/// Map one calamine value onto the document model
fn convert(address: CellAddress, data: &Data) -> Option<Cell> {
    let cell = match data {
        Data::Int(i) => Cell::new(address, CellValue::Number(*i as f64)),
        Data::Float(f) => Cell::new(address, CellValue::Number(*f)),
        Data::String(s) => Cell::new(address, CellValue::Text(s.clone())),
        Data::Bool(b) => Cell::new(address, CellValue::Boolean(*b)),
        Data::DateTime(dt) => {
            Cell::new(address, CellValue::Date(dt.as_f64())).with_format(DATE_FORMAT)
        }
        Data::DateTimeIso(text) => {
            let serial = dates::parse_iso_serial(text).unwrap_or(f64::NAN);
            Cell::new(address, CellValue::Date(serial)).with_format(DATE_FORMAT)
        }
        Data::DurationIso(text) => Cell::new(address, CellValue::Text(text.clone())),
        // Error cells keep their marker text; the engine reads it back as an error
        Data::Error(e) => Cell::new(address, CellValue::Text(e.to_string())),
        Data::Empty => return None,
    };
    Some(cell)
}
