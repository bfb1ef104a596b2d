//! Streaming analysis
//!
//! Walks the workbook one row at a time without building a document. Only
//! counters, per-column tallies for the current sheet and the findings list
//! are kept, so memory does not grow with the number of rows.
//!
//! States: Idle → ReadingSheet → RowProcessing → SheetComplete → (next sheet
//! | Done). A stream-level failure moves to Error and keeps the findings
//! gathered so far; a failure inside one sheet becomes a ProcessingError
//! finding and the next sheet is read.

use super::checks::{check_value, ColumnCensus, MissingValueTracker};
use super::cycles::{cycle_finding, CycleDetector, SubstringCycleDetector};
use super::full_load::issue_code;
use super::memory::MemoryProbe;
use super::{AnalysisStrategy, PathReport};
use crate::config::AnalyzerConfig;
use crate::core::formula_engine::{suggestion_for, ErrorValue};
use crate::error::{SheetcheckError, SheetcheckResult};
use crate::excel::StreamReader;
use crate::types::{AnalysisMethod, Cell, CellValue, Finding, IssueCode, Location, Metadata, Severity};
use regex::RegexSet;
use serde::Serialize;
use std::io::{Cursor, Read, Seek};
use tracing::{debug, warn};

/// Error classes matched by text in formulas and cached values
const MARKED_ERRORS: [ErrorValue; 7] = [
    ErrorValue::DivZero,
    ErrorValue::Value,
    ErrorValue::Ref,
    ErrorValue::Name,
    ErrorValue::Num,
    ErrorValue::NotAvailable,
    ErrorValue::Null,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamState {
    Idle,
    ReadingSheet,
    RowProcessing,
    SheetComplete,
    Done,
    Error,
}

/// Snapshot of a run in progress (or of the last run)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProgress {
    pub state: StreamState,
    pub processed_sheets: usize,
    pub total_rows: u64,
    pub total_cells: u64,
    pub findings: usize,
    pub memory_bytes: u64,
}

/// Sizes of the state the analyzer held, for checking that it stays bounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Widest row buffered at once
    pub max_row_cells: usize,
    /// Most columns tallied at once by the type census
    pub max_tracked_columns: usize,
    pub watchdog_samples: u64,
    pub ceiling_breaches: u64,
    pub peak_memory: u64,
}

/// Literal error-marker search
struct ErrorMarkers {
    set: RegexSet,
}

impl ErrorMarkers {
    fn new() -> SheetcheckResult<Self> {
        let patterns = MARKED_ERRORS.iter().map(|e| regex::escape(e.marker()));
        let set = RegexSet::new(patterns)
            .map_err(|e| SheetcheckError::Config(format!("Regex error: {e}")))?;
        Ok(Self { set })
    }

    /// Error classes whose marker appears in any of the texts, in a fixed order
    fn find(&self, texts: &[&str]) -> Vec<ErrorValue> {
        let mut hit = [false; MARKED_ERRORS.len()];
        for text in texts {
            for idx in self.set.matches(text).into_iter() {
                hit[idx] = true;
            }
        }
        MARKED_ERRORS
            .iter()
            .zip(hit)
            .filter(|(_, hit)| *hit)
            .map(|(error, _)| *error)
            .collect()
    }
}

pub struct StreamingAnalyzer {
    config: AnalyzerConfig,
    markers: ErrorMarkers,
    detector: SubstringCycleDetector,
    probe: MemoryProbe,
    state: StreamState,
    findings: Vec<Finding>,
    processed_sheets: usize,
    total_rows: u64,
    total_cells: u64,
    memory_bytes: u64,
    stats: StreamStats,
}

impl StreamingAnalyzer {
    pub fn new(config: AnalyzerConfig) -> SheetcheckResult<Self> {
        Ok(Self {
            config,
            markers: ErrorMarkers::new()?,
            detector: SubstringCycleDetector::new(),
            probe: MemoryProbe::new(),
            state: StreamState::Idle,
            findings: Vec::new(),
            processed_sheets: 0,
            total_rows: 0,
            total_cells: 0,
            memory_bytes: 0,
            stats: StreamStats::default(),
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn progress(&self) -> StreamProgress {
        StreamProgress {
            state: self.state,
            processed_sheets: self.processed_sheets,
            total_rows: self.total_rows,
            total_cells: self.total_cells,
            findings: self.findings.len(),
            memory_bytes: self.memory_bytes,
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Findings gathered so far; after an error, the partial results
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Stream one workbook. Fails only when the container cannot be read as a
    /// whole; the analyzer is then left in `StreamState::Error`.
    pub fn analyze_bytes(&mut self, bytes: &[u8]) -> SheetcheckResult<PathReport> {
        self.reset();
        self.sample_memory();

        let mut reader = match StreamReader::open(Cursor::new(bytes)) {
            Ok(reader) => reader,
            Err(e) => return Err(self.fail(e)),
        };

        let names: Vec<String> = reader.sheets().iter().map(|s| s.name.clone()).collect();
        for (idx, name) in names.iter().enumerate() {
            self.transition(StreamState::ReadingSheet);
            match self.process_sheet(&mut reader, idx, name) {
                Ok(()) => {
                    self.processed_sheets += 1;
                    self.transition(StreamState::SheetComplete);
                    debug!(sheet = %name, rows = self.total_rows, "sheet streamed");
                }
                Err(e) if e.is_stream_level() => return Err(self.fail(e)),
                Err(e) => {
                    warn!(sheet = %name, error = %e, "sheet failed; continuing with the next one");
                    self.findings.push(Finding::new(
                        IssueCode::Processing,
                        Severity::High,
                        Location::cells(name.clone(), vec!["A1".to_string()]),
                        format!("Sheet processing error: {e}"),
                        "Review the sheet content and formatting",
                    ));
                }
            }
        }

        self.sample_memory();
        self.transition(StreamState::Done);

        Ok(PathReport {
            findings: std::mem::take(&mut self.findings),
            metadata: Metadata {
                total_sheets: self.processed_sheets,
                total_rows: self.total_rows,
                total_cells: self.total_cells,
            },
            peak_memory: self.stats.peak_memory,
        })
    }

    fn reset(&mut self) {
        self.state = StreamState::Idle;
        self.findings.clear();
        self.processed_sheets = 0;
        self.total_rows = 0;
        self.total_cells = 0;
        self.memory_bytes = 0;
        self.stats = StreamStats::default();
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "stream state");
            self.state = next;
        }
    }

    fn fail(&mut self, error: SheetcheckError) -> SheetcheckError {
        warn!(error = %error, findings = self.findings.len(), "streaming stopped");
        self.transition(StreamState::Error);
        error
    }

    fn process_sheet<R: Read + Seek>(
        &mut self,
        reader: &mut StreamReader<R>,
        idx: usize,
        sheet: &str,
    ) -> SheetcheckResult<()> {
        let mut rows = reader.rows(idx)?;
        let mut missing = MissingValueTracker::new(sheet);
        let mut census = ColumnCensus::new(sheet, self.config.mixed_type_min_cells);

        while let Some(row) = rows.next_row()? {
            self.transition(StreamState::RowProcessing);
            self.total_rows += 1;
            self.stats.max_row_cells = self.stats.max_row_cells.max(row.cells.len());

            for cell in &row.cells {
                self.total_cells += 1;
                self.check_cell(sheet, cell);
                census.observe(cell);
            }
            if let Some(finding) = missing.observe_row(row.index, &row.cells) {
                self.findings.push(finding);
            }
            self.stats.max_tracked_columns =
                self.stats.max_tracked_columns.max(census.tracked_columns());

            if self.total_rows % self.config.watchdog_interval_rows.max(1) == 0 {
                self.watchdog();
            }
        }

        self.findings.extend(census.finish());
        Ok(())
    }

    fn check_cell(&mut self, sheet: &str, cell: &Cell) {
        let CellValue::Formula { text, cached } = &cell.value else {
            check_value(sheet, cell, &mut self.findings);
            return;
        };

        let cached = cached.as_deref().map(CellValue::raw).unwrap_or_default();
        for error in self.markers.find(&[text.as_str(), cached.as_str()]) {
            let shown = if cached.is_empty() { text.as_str() } else { cached.as_str() };
            self.findings.push(
                Finding::new(
                    issue_code(error),
                    Severity::High,
                    Location::cell(sheet, cell.address),
                    format!("Formula error detected: {}", error.marker()),
                    suggestion_for(error),
                )
                .with_value(shown),
            );
        }

        if let Some(cycle) = self.detector.observe(sheet, cell.address, text) {
            self.findings.push(cycle_finding(cycle, self.detector.coverage()));
        }
    }

    fn sample_memory(&mut self) -> u64 {
        self.memory_bytes = self.probe.sample();
        self.stats.watchdog_samples += 1;
        self.stats.peak_memory = self.stats.peak_memory.max(self.memory_bytes);
        self.memory_bytes
    }

    /// Sample memory; above the ceiling, hand spare buffer capacity back
    fn watchdog(&mut self) {
        let bytes = self.sample_memory();
        if bytes > self.config.memory_ceiling_bytes {
            self.stats.ceiling_breaches += 1;
            warn!(
                memory_mb = bytes / (1024 * 1024),
                ceiling_mb = self.config.memory_ceiling_bytes / (1024 * 1024),
                "memory above ceiling; releasing spare capacity"
            );
            self.findings.shrink_to_fit();
        }
    }
}

impl AnalysisStrategy for StreamingAnalyzer {
    fn method(&self) -> AnalysisMethod {
        AnalysisMethod::Streaming
    }

    fn run(&mut self, bytes: &[u8]) -> SheetcheckResult<PathReport> {
        self.analyze_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FindingKind;
    use rust_xlsxwriter::Workbook;

    fn analyzer() -> StreamingAnalyzer {
        StreamingAnalyzer::new(AnalyzerConfig::default()).unwrap()
    }

    #[test]
    fn test_markers_in_formula_and_cached_value() {
        let markers = ErrorMarkers::new().unwrap();
        assert_eq!(
            markers.find(&["=IF(A1=0,\"#N/A\",B1)", "#DIV/0!"]),
            vec![ErrorValue::DivZero, ErrorValue::NotAvailable]
        );
        assert!(markers.find(&["=SUM(A1:A3)", "6"]).is_empty());
    }

    #[test]
    fn test_streams_rows_and_counts() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Item").unwrap();
        sheet.write_string(0, 1, "Qty").unwrap();
        sheet.write_string(1, 0, "Bolt").unwrap();
        sheet.write_number(1, 1, 4).unwrap();
        sheet.write_string(2, 0, "Nut").unwrap();
        sheet.write_formula(3, 2, "=C4+1").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let mut analyzer = analyzer();
        let report = analyzer.analyze_bytes(&bytes).unwrap();
        assert_eq!(analyzer.state(), StreamState::Done);
        assert_eq!(report.metadata.total_sheets, 1);
        assert_eq!(report.metadata.total_rows, 4);
        assert_eq!(report.metadata.total_cells, 6);

        let codes: Vec<_> = report.findings.iter().map(|f| f.code).collect();
        assert!(codes.contains(&IssueCode::MissingValue));
        assert!(codes.contains(&IssueCode::CircularReference));
        let progress = analyzer.progress();
        assert_eq!(progress.processed_sheets, 1);
        assert_eq!(progress.total_rows, 4);
    }

    #[test]
    fn test_corrupt_container_moves_to_error_state() {
        let mut analyzer = analyzer();
        let result = analyzer.analyze_bytes(b"PK\x03\x04 truncated");
        assert!(result.is_err());
        assert_eq!(analyzer.state(), StreamState::Error);
    }

    #[test]
    fn test_error_value_in_cached_result() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet
            .write_formula(0, 0, rust_xlsxwriter::Formula::new("=1/0").set_result("#DIV/0!"))
            .unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let report = analyzer().analyze_bytes(&bytes).unwrap();
        let errors: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.kind == FindingKind::FormulaError)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, IssueCode::DivByZero);
        assert_eq!(errors[0].value.as_deref(), Some("#DIV/0!"));
    }
}
