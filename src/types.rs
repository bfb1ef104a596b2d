use crate::core::address::CellAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

//==============================================================================
// Document model
//==============================================================================

/// A whole workbook, built for one analysis call and dropped at its end
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpreadsheetDocument {
    pub sheets: Vec<Sheet>,
}

impl SpreadsheetDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Total populated cells across all sheets
    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(|s| s.cells.len()).sum()
    }

    /// Total rows holding at least one cell
    pub fn row_count(&self) -> usize {
        self.sheets.iter().map(Sheet::row_count).sum()
    }

    pub fn formula_count(&self) -> usize {
        self.sheets
            .iter()
            .flat_map(|s| s.cells.values())
            .filter(|c| c.is_formula())
            .count()
    }
}

/// One worksheet: a sparse map of cells ordered by row, then column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub cells: BTreeMap<CellAddress, Cell>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, cell: Cell) {
        self.cells.insert(cell.address, cell);
    }

    pub fn get(&self, address: CellAddress) -> Option<&Cell> {
        self.cells.get(&address)
    }

    /// Value of the cell at (row, col), or Empty
    pub fn value_at(&self, row: u32, col: u32) -> &CellValue {
        self.cells
            .get(&CellAddress::new(row, col))
            .map(|c| &c.value)
            .unwrap_or(&CellValue::Empty)
    }

    pub fn row_count(&self) -> usize {
        let mut rows = 0;
        let mut last = 0;
        for address in self.cells.keys() {
            if address.row != last {
                rows += 1;
                last = address.row;
            }
        }
        rows
    }

    /// Largest (row, col) seen, or (0, 0) for an empty sheet
    pub fn extent(&self) -> (u32, u32) {
        let max_row = self.cells.keys().map(|a| a.row).max().unwrap_or(0);
        let max_col = self.cells.keys().map(|a| a.col).max().unwrap_or(0);
        (max_row, max_col)
    }
}

/// Raw cell content
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    /// Date serial (see `core::dates`); NaN when the stored value could not be parsed
    Date(f64),
    Boolean(bool),
    /// Formula text (leading '=' included) and the cached result, when the file carried one
    Formula {
        text: String,
        cached: Option<Box<CellValue>>,
    },
    Empty,
}

impl CellValue {
    /// The value kind, as the validators see it
    pub fn kind(&self) -> ValueKind {
        match self {
            CellValue::Number(_) => ValueKind::Number,
            CellValue::Text(_) => ValueKind::String,
            CellValue::Date(_) => ValueKind::Date,
            CellValue::Boolean(_) => ValueKind::Boolean,
            CellValue::Formula { .. } => ValueKind::Formula,
            CellValue::Empty => ValueKind::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Render the raw value the way duplicate detection compares values
    pub fn raw(&self) -> String {
        match self {
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Date(serial) => format_number(*serial),
            CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Formula { text, .. } => text.clone(),
            CellValue::Empty => String::new(),
        }
    }
}

/// Format a number for display, removing unnecessary decimal places
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Cell value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    String,
    Date,
    Boolean,
    Formula,
    Empty,
}

/// One populated cell
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub address: CellAddress,
    pub value: CellValue,
    /// Number-format code ("yyyy-mm-dd", "0.00", ...) when the reader knows it
    pub number_format: Option<String>,
}

impl Cell {
    pub fn new(address: CellAddress, value: CellValue) -> Self {
        Self {
            address,
            value,
            number_format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.number_format = Some(format.into());
        self
    }

    pub fn is_formula(&self) -> bool {
        matches!(self.value, CellValue::Formula { .. })
    }

    /// Formula text when the cell holds one
    pub fn formula(&self) -> Option<&str> {
        match &self.value {
            CellValue::Formula { text, .. } => Some(text),
            _ => None,
        }
    }
}

//==============================================================================
// Findings
//==============================================================================

/// Finding category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingKind {
    FormulaError,
    DataError,
    FormatError,
    ProcessingError,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FindingKind::FormulaError => "FormulaError",
            FindingKind::DataError => "DataError",
            FindingKind::FormatError => "FormatError",
            FindingKind::ProcessingError => "ProcessingError",
        };
        f.write_str(name)
    }
}

/// Finding severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(name)
    }
}

/// Machine-readable refinement of a finding kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    DivByZero,
    InvalidReference,
    ValueError,
    NameError,
    NumError,
    NotAvailable,
    NullError,
    ParseError,
    CircularReference,
    ExcessiveDependencies,
    Optimization,
    TextNumber,
    MixedColumnTypes,
    Duplicate,
    MissingValue,
    EmptyCell,
    InvalidDate,
    InvalidNumber,
    Processing,
}

impl IssueCode {
    pub fn kind(&self) -> FindingKind {
        match self {
            IssueCode::DivByZero
            | IssueCode::InvalidReference
            | IssueCode::ValueError
            | IssueCode::NameError
            | IssueCode::NumError
            | IssueCode::NotAvailable
            | IssueCode::NullError
            | IssueCode::ParseError
            | IssueCode::CircularReference
            | IssueCode::ExcessiveDependencies
            | IssueCode::Optimization => FindingKind::FormulaError,
            IssueCode::TextNumber
            | IssueCode::MixedColumnTypes
            | IssueCode::Duplicate
            | IssueCode::MissingValue
            | IssueCode::EmptyCell => FindingKind::DataError,
            IssueCode::InvalidDate | IssueCode::InvalidNumber => FindingKind::FormatError,
            IssueCode::Processing => FindingKind::ProcessingError,
        }
    }
}

/// Where a finding applies: a sheet plus one or more cells or ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub sheet: String,
    /// Sheet-relative references ("B2", "A1:A6"); entries on another sheet are qualified
    pub cells: Vec<String>,
}

impl Location {
    pub fn cell(sheet: impl Into<String>, address: CellAddress) -> Self {
        Self {
            sheet: sheet.into(),
            cells: vec![address.to_string()],
        }
    }

    pub fn range(sheet: impl Into<String>, start: CellAddress, end: CellAddress) -> Self {
        Self {
            sheet: sheet.into(),
            cells: vec![format!("{start}:{end}")],
        }
    }

    pub fn cells(sheet: impl Into<String>, cells: Vec<String>) -> Self {
        Self {
            sheet: sheet.into(),
            cells,
        }
    }

    /// True when any listed reference names the given address
    pub fn contains(&self, address: CellAddress) -> bool {
        let needle = address.to_string();
        self.cells.iter().any(|c| *c == needle)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .cells
            .iter()
            .map(|c| {
                if c.contains('!') {
                    c.clone()
                } else {
                    format!("{}!{}", self.sheet, c)
                }
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// One reported issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub kind: FindingKind,
    pub code: IssueCode,
    pub severity: Severity,
    pub location: Location,
    pub description: String,
    pub suggestion: String,
    pub auto_fixable: bool,
    /// The offending value or formula, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Finding {
    pub fn new(
        code: IssueCode,
        severity: Severity,
        location: Location,
        description: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            kind: code.kind(),
            code,
            severity,
            location,
            description: description.into(),
            suggestion: suggestion.into(),
            auto_fixable: false,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn auto_fixable(mut self, fixable: bool) -> Self {
        self.auto_fixable = fixable;
        self
    }
}

//==============================================================================
// Analysis result
//==============================================================================

/// Which execution path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMethod {
    Streaming,
    FullLoad,
    /// The streaming path failed and the dispatcher re-ran the input through full-load
    StreamingFallbackToFullLoad,
}

impl AnalysisMethod {
    /// The path whose findings ended up in the result
    pub fn executed_path(&self) -> AnalysisMethod {
        match self {
            AnalysisMethod::StreamingFallbackToFullLoad => AnalysisMethod::FullLoad,
            other => *other,
        }
    }
}

impl fmt::Display for AnalysisMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisMethod::Streaming => "streaming",
            AnalysisMethod::FullLoad => "full-load",
            AnalysisMethod::StreamingFallbackToFullLoad => "streaming-fallback-to-full-load",
        };
        f.write_str(name)
    }
}

/// Timing and memory report for one analysis call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub method: AnalysisMethod,
    /// Wall-clock time in milliseconds
    pub elapsed_time: f64,
    /// Highest resident memory sampled during the call, in bytes
    pub peak_memory: u64,
}

/// Finding counts plus a one-line message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub by_kind: BTreeMap<FindingKind, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub message: String,
}

impl Summary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut by_kind = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for finding in findings {
            *by_kind.entry(finding.kind).or_insert(0) += 1;
            *by_severity.entry(finding.severity).or_insert(0) += 1;
        }

        let message = if by_kind.is_empty() {
            "no issues found".to_string()
        } else {
            by_kind
                .iter()
                .map(|(kind, count)| format!("{kind}: {count}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        Self {
            by_kind,
            by_severity,
            message,
        }
    }

    pub fn failed() -> Self {
        Self {
            message: "analysis failed".to_string(),
            ..Self::default()
        }
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Sizes of what the executed path visited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub total_sheets: usize,
    pub total_rows: u64,
    pub total_cells: u64,
}

/// The outcome of one `analyze()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub findings: Vec<Finding>,
    pub summary: Summary,
    pub performance: Performance,
    pub metadata: Metadata,
}

impl AnalysisResult {
    pub fn completed(findings: Vec<Finding>, metadata: Metadata, performance: Performance) -> Self {
        Self {
            success: true,
            summary: Summary::from_findings(&findings),
            findings,
            performance,
            metadata,
        }
    }

    pub fn failed(performance: Performance) -> Self {
        Self {
            success: false,
            findings: Vec::new(),
            summary: Summary::failed(),
            performance,
            metadata: Metadata::default(),
        }
    }

    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    pub fn findings_with(&self, code: IssueCode) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_and_message() {
        let location = Location::cell("Sheet1", CellAddress::new(1, 1));
        let findings = vec![
            Finding::new(IssueCode::DivByZero, Severity::High, location.clone(), "d", "s"),
            Finding::new(IssueCode::Duplicate, Severity::Low, location.clone(), "d", "s"),
            Finding::new(IssueCode::MissingValue, Severity::Medium, location, "d", "s"),
        ];
        let summary = Summary::from_findings(&findings);
        assert_eq!(summary.count(FindingKind::FormulaError), 1);
        assert_eq!(summary.count(FindingKind::DataError), 2);
        assert_eq!(summary.count(FindingKind::FormatError), 0);
        assert_eq!(summary.message, "FormulaError: 1, DataError: 2");
    }

    #[test]
    fn test_empty_summary_message() {
        assert_eq!(Summary::from_findings(&[]).message, "no issues found");
    }

    #[test]
    fn test_location_display_qualifies_every_cell() {
        let location = Location::cells("Data", vec!["A2".into(), "Other!B5".into()]);
        assert_eq!(location.to_string(), "Data!A2, Other!B5");
    }

    #[test]
    fn test_method_serializes_kebab_case() {
        let json = serde_json::to_string(&AnalysisMethod::StreamingFallbackToFullLoad).unwrap();
        assert_eq!(json, "\"streaming-fallback-to-full-load\"");
        assert_eq!(
            AnalysisMethod::StreamingFallbackToFullLoad.executed_path(),
            AnalysisMethod::FullLoad
        );
    }

    #[test]
    fn test_sheet_row_count_and_extent() {
        let mut sheet = Sheet::new("S");
        sheet.set(Cell::new(CellAddress::new(1, 1), CellValue::Number(1.0)));
        sheet.set(Cell::new(CellAddress::new(1, 3), CellValue::Number(2.0)));
        sheet.set(Cell::new(CellAddress::new(4, 2), CellValue::Number(3.0)));
        assert_eq!(sheet.row_count(), 2);
        assert_eq!(sheet.extent(), (4, 3));
    }
}
