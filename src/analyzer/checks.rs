//! Data and format checks shared by the full-load and streaming paths
//!
//! Everything here sees cells one row at a time, in row order, and keeps at
//! most per-column state. Duplicate detection is the exception: it needs the
//! whole sheet and only runs on the full-load path.

use crate::core::address::CellAddress;
use crate::types::{Cell, CellValue, Finding, IssueCode, Location, Severity, Sheet};
use std::collections::{BTreeMap, HashMap};

/// 2^53 - 1
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// True when text would read as a finite number
pub fn looks_numeric(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Number, date and text sanity for one non-formula cell
pub fn check_value(sheet: &str, cell: &Cell, findings: &mut Vec<Finding>) {
    let location = || Location::cell(sheet, cell.address);
    match &cell.value {
        CellValue::Number(n) if !n.is_finite() => findings.push(
            Finding::new(
                IssueCode::InvalidNumber,
                Severity::Medium,
                location(),
                "Invalid number (infinite or not a number)",
                "Check the numeric value and its number format",
            )
            .with_value(n.to_string()),
        ),
        CellValue::Number(n) if n.abs() > MAX_SAFE_INTEGER => findings.push(
            Finding::new(
                IssueCode::InvalidNumber,
                Severity::Medium,
                location(),
                "Number exceeds the exactly representable integer range",
                "Store identifiers this long as text, or round the value",
            )
            .with_value(n.to_string()),
        ),
        CellValue::Date(serial) if !crate::core::dates::is_valid_serial(*serial) => findings.push(
            Finding::new(
                IssueCode::InvalidDate,
                Severity::Medium,
                location(),
                "Invalid date value",
                "Use a valid date between 1900-01-01 and 9999-12-31",
            )
            .with_value(serial.to_string()),
        ),
        CellValue::Text(s) if s.trim().is_empty() => findings.push(Finding::new(
            IssueCode::EmptyCell,
            Severity::Low,
            location(),
            "Empty text cell",
            "Fill the cell with a value or clear it",
        )),
        CellValue::Text(s) if looks_numeric(s) => findings.push(
            Finding::new(
                IssueCode::TextNumber,
                Severity::Medium,
                location(),
                "Number stored as text",
                "Convert the cell to a number",
            )
            .with_value(s.clone())
            .auto_fixable(true),
        ),
        _ => {}
    }
}

/// Populated for the purpose of gap and type checks
fn is_populated(value: &CellValue) -> bool {
    match value {
        CellValue::Empty => false,
        CellValue::Text(s) => !s.is_empty(),
        _ => true,
    }
}

//==============================================================================
// Missing values
//==============================================================================

/// Flags data rows that fill some header columns but not all.
///
/// The header is row 1; a sheet whose first row is not row 1 has no header
/// and is never flagged.
#[derive(Debug)]
pub struct MissingValueTracker {
    sheet: String,
    header_columns: Vec<u32>,
    seen_first_row: bool,
}

impl MissingValueTracker {
    pub fn new(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            header_columns: Vec::new(),
            seen_first_row: false,
        }
    }

    /// Feed one row's cells (any order); returns the gap finding, if any
    pub fn observe_row<'c>(
        &mut self,
        row: u32,
        cells: impl IntoIterator<Item = &'c Cell>,
    ) -> Option<Finding> {
        let mut populated: Vec<u32> = cells
            .into_iter()
            .filter(|c| is_populated(&c.value))
            .map(|c| c.address.col)
            .collect();
        populated.sort_unstable();
        populated.dedup();

        if !self.seen_first_row {
            self.seen_first_row = true;
            if row == 1 {
                self.header_columns = populated;
                return None;
            }
        }
        if self.header_columns.is_empty() {
            return None;
        }

        let filled_count = self
            .header_columns
            .iter()
            .filter(|col| populated.binary_search(*col).is_ok())
            .count();
        if filled_count == 0 || filled_count == self.header_columns.len() {
            return None;
        }

        let first_gap = self
            .header_columns
            .iter()
            .copied()
            .find(|col| populated.binary_search(col).is_err())?;
        Some(Finding::new(
            IssueCode::MissingValue,
            Severity::Medium,
            Location::cell(&self.sheet, CellAddress::new(row, first_gap)),
            format!(
                "Missing value: row {row} fills {filled_count} of {} header columns",
                self.header_columns.len()
            ),
            "Enter a value in the empty cell",
        ))
    }

    pub fn header_width(&self) -> usize {
        self.header_columns.len()
    }
}

//==============================================================================
// Column type census
//==============================================================================

#[derive(Debug, Clone, Copy)]
struct ColumnTally {
    first: CellAddress,
    last: CellAddress,
    populated: usize,
    numbers: bool,
    strings: bool,
    booleans: bool,
    /// Dates and formulas take the column out of the check
    excluded: bool,
}

impl ColumnTally {
    fn kinds(&self) -> usize {
        [self.numbers, self.strings, self.booleans]
            .iter()
            .filter(|&&seen| seen)
            .count()
    }
}

/// Per-column count of primitive value kinds; one finding per mixed column
#[derive(Debug)]
pub struct ColumnCensus {
    sheet: String,
    min_cells: usize,
    columns: BTreeMap<u32, ColumnTally>,
}

impl ColumnCensus {
    pub fn new(sheet: impl Into<String>, min_cells: usize) -> Self {
        Self {
            sheet: sheet.into(),
            min_cells,
            columns: BTreeMap::new(),
        }
    }

    pub fn observe(&mut self, cell: &Cell) {
        if !is_populated(&cell.value) {
            return;
        }
        // A text cell in row 1 is the column's header
        if cell.address.row == 1 && matches!(cell.value, CellValue::Text(_)) {
            return;
        }
        let tally = self.columns.entry(cell.address.col).or_insert(ColumnTally {
            first: cell.address,
            last: cell.address,
            populated: 0,
            numbers: false,
            strings: false,
            booleans: false,
            excluded: false,
        });
        tally.last = cell.address;
        tally.populated += 1;
        match cell.value {
            CellValue::Number(_) => tally.numbers = true,
            CellValue::Text(_) => tally.strings = true,
            CellValue::Boolean(_) => tally.booleans = true,
            CellValue::Date(_) | CellValue::Formula { .. } | CellValue::Empty => {
                tally.excluded = true
            }
        }
    }

    /// Number of columns currently tracked
    pub fn tracked_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn finish(self) -> Vec<Finding> {
        self.columns
            .values()
            .filter(|t| !t.excluded && t.populated >= self.min_cells && t.kinds() > 1)
            .map(|t| {
                Finding::new(
                    IssueCode::MixedColumnTypes,
                    Severity::Low,
                    Location::range(&self.sheet, t.first, t.last),
                    format!(
                        "Column {} mixes data types across {} cells",
                        t.first.column_letters(),
                        t.populated
                    ),
                    "Use one data type per column",
                )
            })
            .collect()
    }
}

//==============================================================================
// Duplicates
//==============================================================================

/// Values longer than `min_length` characters that appear in two or more
/// non-formula cells of a sheet, ordered by their first location
pub fn duplicate_findings(sheet: &Sheet, min_length: usize) -> Vec<Finding> {
    let mut locations: HashMap<String, Vec<CellAddress>> = HashMap::new();
    for cell in sheet.cells.values() {
        if cell.is_formula() || !is_populated(&cell.value) {
            continue;
        }
        let raw = cell.value.raw();
        if raw.chars().count() <= min_length {
            continue;
        }
        locations.entry(raw).or_default().push(cell.address);
    }

    let mut duplicates: Vec<(String, Vec<CellAddress>)> = locations
        .into_iter()
        .filter(|(_, addresses)| addresses.len() > 1)
        .collect();
    duplicates.sort_by_key(|(_, addresses)| addresses[0]);

    duplicates
        .into_iter()
        .map(|(value, addresses)| {
            let count = addresses.len();
            Finding::new(
                IssueCode::Duplicate,
                Severity::Low,
                Location::cells(&sheet.name, addresses.iter().map(ToString::to_string).collect()),
                format!("Value appears {count} times"),
                "Check whether the duplicates are intended and remove them if not",
            )
            .with_value(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FindingKind;

    fn cell(address: &str, value: CellValue) -> Cell {
        Cell::new(CellAddress::parse(address).unwrap(), value)
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_value_sanity() {
        let mut findings = Vec::new();
        check_value("S", &cell("A1", CellValue::Number(f64::INFINITY)), &mut findings);
        check_value("S", &cell("A2", CellValue::Number(1e16)), &mut findings);
        check_value("S", &cell("A3", CellValue::Date(f64::NAN)), &mut findings);
        check_value("S", &cell("A4", text("  ")), &mut findings);
        check_value("S", &cell("A5", text(" 42 ")), &mut findings);
        check_value("S", &cell("A6", text("forty-two")), &mut findings);
        check_value("S", &cell("A7", CellValue::Number(12.5)), &mut findings);
        check_value("S", &cell("A8", CellValue::Date(45306.0)), &mut findings);

        let codes: Vec<_> = findings.iter().map(|f| f.code).collect();
        assert_eq!(
            codes,
            vec![
                IssueCode::InvalidNumber,
                IssueCode::InvalidNumber,
                IssueCode::InvalidDate,
                IssueCode::EmptyCell,
                IssueCode::TextNumber,
            ]
        );
        assert_eq!(findings[2].kind, FindingKind::FormatError);
        assert_eq!(findings[3].severity, Severity::Low);
        assert!(findings[4].auto_fixable);
    }

    #[test]
    fn test_looks_numeric() {
        assert!(looks_numeric("3.5"));
        assert!(looks_numeric("-1e3"));
        assert!(!looks_numeric(""));
        assert!(!looks_numeric("inf"));
        assert!(!looks_numeric("12abc"));
    }

    #[test]
    fn test_missing_value_flags_first_gap() {
        let mut tracker = MissingValueTracker::new("S");
        let header = [cell("A1", text("Name")), cell("B1", text("Qty")), cell("C1", text("Price"))];
        assert!(tracker.observe_row(1, &header).is_none());
        assert_eq!(tracker.header_width(), 3);

        let full = [
            cell("A2", text("Bolt")),
            cell("B2", CellValue::Number(4.0)),
            cell("C2", CellValue::Number(0.5)),
        ];
        assert!(tracker.observe_row(2, &full).is_none());

        let gap = [cell("A3", text("Nut")), cell("C3", CellValue::Number(0.2))];
        let finding = tracker.observe_row(3, &gap).unwrap();
        assert_eq!(finding.code, IssueCode::MissingValue);
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.location.contains(CellAddress::parse("B3").unwrap()));

        // Cells outside the header columns do not count as data
        let outside = [cell("E4", text("note"))];
        assert!(tracker.observe_row(4, &outside).is_none());
    }

    #[test]
    fn test_missing_value_needs_row_one() {
        let mut tracker = MissingValueTracker::new("S");
        assert!(tracker.observe_row(3, &[cell("A3", text("x"))]).is_none());
        assert!(tracker
            .observe_row(4, &[cell("A4", text("x")), cell("B4", text("y"))])
            .is_none());
    }

    #[test]
    fn test_mixed_column_reported_once() {
        let mut census = ColumnCensus::new("S", 5);
        let values = [
            CellValue::Number(1.0),
            text("2"),
            CellValue::Number(3.0),
            text("four"),
            CellValue::Number(5.0),
            CellValue::Number(6.0),
        ];
        for (i, value) in values.into_iter().enumerate() {
            census.observe(&Cell::new(CellAddress::new(i as u32 + 1, 1), value));
        }
        let findings = census.finish();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Low);
        assert_eq!(findings[0].kind, FindingKind::DataError);
        assert_eq!(findings[0].location.cells, vec!["A1:A6".to_string()]);
    }

    #[test]
    fn test_census_skips_headers_dates_and_short_columns() {
        let mut census = ColumnCensus::new("S", 5);
        // Text header over numbers
        census.observe(&cell("A1", text("Amount")));
        for row in 2..=7 {
            census.observe(&Cell::new(CellAddress::new(row, 1), CellValue::Number(row as f64)));
        }
        // Dates exclude the column
        for row in 1..=6 {
            let value = if row == 3 { CellValue::Date(45000.0) } else { text("x") };
            census.observe(&Cell::new(CellAddress::new(row, 2), value));
        }
        // Too few cells
        census.observe(&cell("C2", CellValue::Number(1.0)));
        census.observe(&cell("C3", text("a")));
        assert_eq!(census.tracked_columns(), 3);
        assert!(census.finish().is_empty());
    }

    #[test]
    fn test_duplicates() {
        let mut sheet = Sheet::new("S");
        sheet.set(cell("A1", text("Widget")));
        sheet.set(cell("B2", text("Widget")));
        sheet.set(cell("C3", text("abc")));
        sheet.set(cell("C4", text("abc")));
        sheet.set(cell("D1", CellValue::Number(12345.0)));
        sheet.set(cell("D2", CellValue::Number(12345.0)));
        sheet.set(cell("E1", CellValue::Formula { text: "=SUM(A1:A2)".into(), cached: None }));
        sheet.set(cell("E2", CellValue::Formula { text: "=SUM(A1:A2)".into(), cached: None }));

        let findings = duplicate_findings(&sheet, 3);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].value.as_deref(), Some("Widget"));
        assert_eq!(findings[0].location.cells, vec!["A1".to_string(), "B2".to_string()]);
        assert_eq!(findings[1].value.as_deref(), Some("12345"));
    }
}
