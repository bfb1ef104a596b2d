//! Full-load analysis
//!
//! Loads the whole workbook, drives the formula engine over every formula
//! cell and runs the data checks on everything else. The engine lives for one
//! call and is released on every exit path.

use super::checks::{check_value, duplicate_findings, ColumnCensus, MissingValueTracker};
use super::cycles::{cycle_finding, CycleDetector, GraphCycleDetector};
use super::memory::MemoryProbe;
use super::{AnalysisStrategy, PathReport};
use crate::config::AnalyzerConfig;
use crate::core::formula_engine::{ErrorValue, FormulaEngine, ValidationError};
use crate::error::SheetcheckResult;
use crate::excel::ExcelImporter;
use crate::types::{
    AnalysisMethod, Cell, Finding, IssueCode, Location, Metadata, Severity, Sheet,
    SpreadsheetDocument,
};
use tracing::debug;

pub struct FullLoadAnalyzer {
    config: AnalyzerConfig,
}

impl FullLoadAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze an already loaded document
    pub fn analyze_document(&self, document: &SpreadsheetDocument) -> SheetcheckResult<Vec<Finding>> {
        FormulaEngine::scoped(document, |engine| self.run_validators(document, engine))?
    }

    fn run_validators(
        &self,
        document: &SpreadsheetDocument,
        engine: &FormulaEngine,
    ) -> SheetcheckResult<Vec<Finding>> {
        let mut findings = Vec::new();

        for sheet in &document.sheets {
            self.analyze_sheet(sheet, engine, &mut findings)?;
            debug!(sheet = %sheet.name, cells = sheet.cells.len(), "sheet analyzed");
        }

        let mut detector = GraphCycleDetector::new(engine);
        let coverage = detector.coverage();
        for cycle in detector.finish()? {
            findings.push(cycle_finding(cycle, coverage));
        }

        Ok(findings)
    }

    fn analyze_sheet(
        &self,
        sheet: &Sheet,
        engine: &FormulaEngine,
        findings: &mut Vec<Finding>,
    ) -> SheetcheckResult<()> {
        let mut missing = MissingValueTracker::new(&sheet.name);
        let mut census = ColumnCensus::new(&sheet.name, self.config.mixed_type_min_cells);

        let cells: Vec<&Cell> = sheet.cells.values().collect();
        for row in cells.chunk_by(|a, b| a.address.row == b.address.row) {
            for cell in row {
                match cell.formula() {
                    Some(text) => self.check_formula(&sheet.name, cell, text, engine, findings)?,
                    None => check_value(&sheet.name, cell, findings),
                }
                census.observe(cell);
            }
            if let Some(first) = row.first() {
                findings.extend(missing.observe_row(first.address.row, row.iter().copied()));
            }
        }

        findings.extend(census.finish());
        findings.extend(duplicate_findings(sheet, self.config.duplicate_min_length));
        Ok(())
    }

    fn check_formula(
        &self,
        sheet: &str,
        cell: &Cell,
        formula: &str,
        engine: &FormulaEngine,
        findings: &mut Vec<Finding>,
    ) -> SheetcheckResult<()> {
        let location = || Location::cell(sheet, cell.address);
        let validation = engine.validate_formula(formula, sheet)?;

        if let Some(error) = validation.error {
            let code = match &error {
                ValidationError::Parse(_) => IssueCode::ParseError,
                // Reported once per cycle by the cycle detector
                ValidationError::Evaluation(ErrorValue::Cycle) => return Ok(()),
                ValidationError::Evaluation(e) => issue_code(*e),
            };
            findings.push(
                Finding::new(
                    code,
                    Severity::High,
                    location(),
                    format!("Formula error: {}", error.message()),
                    validation.suggestion.unwrap_or("Review and correct the formula"),
                )
                .with_value(formula)
                .auto_fixable(code == IssueCode::DivByZero),
            );
            return Ok(());
        }

        let optimization = engine.optimize_formula(formula);
        if optimization.has_suggestions() {
            let mut advice: Vec<String> = Vec::new();
            if optimization.is_rewritten() {
                advice.push(format!("Simplify to {}", optimization.optimized));
            }
            advice.extend(optimization.advice.iter().map(|a| match &a.replacement {
                Some(replacement) => format!("{} ({replacement})", a.message),
                None => a.message.clone(),
            }));
            findings.push(
                Finding::new(
                    IssueCode::Optimization,
                    Severity::Low,
                    location(),
                    "Formula can be optimized",
                    advice.join("; "),
                )
                .with_value(formula)
                .auto_fixable(optimization.is_rewritten()),
            );
        }

        let dependencies = engine.get_dependencies(sheet, cell.address)?;
        let count = dependencies.precedents.len();
        if count > self.config.max_precedents {
            findings.push(
                Finding::new(
                    IssueCode::ExcessiveDependencies,
                    Severity::Medium,
                    location(),
                    format!("Formula references {count} cells or ranges"),
                    "Simplify the formula or move parts of it into helper cells",
                )
                .with_value(formula),
            );
        }
        Ok(())
    }
}

/// Finding code for an evaluation error
pub fn issue_code(error: ErrorValue) -> IssueCode {
    match error {
        ErrorValue::DivZero => IssueCode::DivByZero,
        ErrorValue::Ref => IssueCode::InvalidReference,
        ErrorValue::Value => IssueCode::ValueError,
        ErrorValue::Name => IssueCode::NameError,
        ErrorValue::Num => IssueCode::NumError,
        ErrorValue::NotAvailable => IssueCode::NotAvailable,
        ErrorValue::Null => IssueCode::NullError,
        ErrorValue::Cycle => IssueCode::CircularReference,
    }
}

impl AnalysisStrategy for FullLoadAnalyzer {
    fn method(&self) -> AnalysisMethod {
        AnalysisMethod::FullLoad
    }

    fn run(&mut self, bytes: &[u8]) -> SheetcheckResult<PathReport> {
        let mut probe = MemoryProbe::new();
        probe.sample();

        let imported = ExcelImporter::new(bytes).import()?;
        let document = imported.document;
        let mut findings = self.analyze_document(&document)?;

        for (sheet, reason) in imported.unreadable_sheets {
            findings.push(Finding::new(
                IssueCode::Processing,
                Severity::High,
                Location::cells(sheet, vec!["A1".to_string()]),
                format!("Sheet could not be read: {reason}"),
                "Check the sheet for corrupt or unsupported content",
            ));
        }

        let metadata = Metadata {
            total_sheets: document.sheets.len(),
            total_rows: document.row_count() as u64,
            total_cells: document.cell_count() as u64,
        };
        probe.sample();

        Ok(PathReport {
            findings,
            metadata,
            peak_memory: probe.peak(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::CellAddress;
    use crate::types::{CellValue, FindingKind};

    fn document(cells: &[(&str, CellValue)]) -> SpreadsheetDocument {
        let mut sheet = Sheet::new("Sheet1");
        for (address, value) in cells {
            sheet.set(Cell::new(CellAddress::parse(address).unwrap(), value.clone()));
        }
        let mut document = SpreadsheetDocument::new();
        document.add_sheet(sheet);
        document
    }

    fn formula(text: &str) -> CellValue {
        CellValue::Formula {
            text: text.to_string(),
            cached: None,
        }
    }

    fn analyze(document: &SpreadsheetDocument) -> Vec<Finding> {
        FullLoadAnalyzer::new(AnalyzerConfig::default())
            .analyze_document(document)
            .unwrap()
    }

    #[test]
    fn test_division_by_zero_is_one_high_finding() {
        let findings = analyze(&document(&[("B1", formula("=1/0"))]));
        let errors: Vec<_> = findings
            .iter()
            .filter(|f| f.kind == FindingKind::FormulaError)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, IssueCode::DivByZero);
        assert_eq!(errors[0].severity, Severity::High);
        assert_eq!(errors[0].location.cells, vec!["B1".to_string()]);
        assert!(errors[0].suggestion.contains("IFERROR"));
        assert!(errors[0].auto_fixable);
    }

    #[test]
    fn test_self_reference_reported_as_cycle_only() {
        let findings = analyze(&document(&[("A1", formula("=A1+1"))]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, IssueCode::CircularReference);
        assert_eq!(findings[0].value.as_deref(), Some("A1 → A1"));
    }

    #[test]
    fn test_excessive_dependencies() {
        let refs: Vec<String> = (1..=11).map(|r| format!("A{r}")).collect();
        let mut cells: Vec<(&str, CellValue)> = Vec::new();
        let text = format!("={}", refs.join("+"));
        cells.push(("B1", formula(&text)));
        let findings = analyze(&document(&cells));
        assert!(findings
            .iter()
            .any(|f| f.code == IssueCode::ExcessiveDependencies && f.severity == Severity::Medium));
    }

    #[test]
    fn test_optimizable_formula_is_low_and_fixable() {
        let findings = analyze(&document(&[
            ("A1", CellValue::Number(2.0)),
            ("B1", formula("=(A1+0)*1")),
        ]));
        let finding = findings
            .iter()
            .find(|f| f.code == IssueCode::Optimization)
            .unwrap();
        assert_eq!(finding.severity, Severity::Low);
        assert!(finding.auto_fixable);
        assert!(finding.suggestion.contains("=A1"));
    }

    #[test]
    fn test_unparseable_formula_is_a_parse_error() {
        let findings = analyze(&document(&[("A1", formula("=SUM(1,"))]));
        assert_eq!(findings[0].code, IssueCode::ParseError);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_deep_nesting_is_a_parse_error() {
        let text = format!("={}1{}", "(".repeat(1000), ")".repeat(1000));
        let findings = analyze(&document(&[("A1", formula(&text))]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, IssueCode::ParseError);
        assert!(findings[0].description.contains("nests deeper"));
    }

    #[test]
    fn test_hundred_thousand_cell_cycle() {
        // A1 = A100000 + 1, A(i) = A(i-1) + 1
        let size = 100_000u32;
        let mut sheet = Sheet::new("Sheet1");
        sheet.set(Cell::new(CellAddress::new(1, 1), formula(&format!("=A{size}+1"))));
        for row in 2..=size {
            sheet.set(Cell::new(
                CellAddress::new(row, 1),
                formula(&format!("=A{}+1", row - 1)),
            ));
        }
        let mut document = SpreadsheetDocument::new();
        document.add_sheet(sheet);

        let findings = analyze(&document);
        let cycles: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.code == IssueCode::CircularReference)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].location.cells.len(), size as usize);
        let chain = cycles[0].value.as_deref().unwrap();
        assert!(chain.starts_with(&format!("A1 → A{size} → ")));
        assert!(chain.ends_with("A2 → A1"));
    }
}
