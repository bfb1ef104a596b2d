//! Formula evaluation engine
//!
//! Holds one workbook's cells plus a dependency graph over its formulas, and
//! answers validation, evaluation, cycle and dependency queries against it.
//!
//! The engine is created per analysis and must be released at the end of it:
//! `destroy()` drops the graph and all cell state, and `Drop` calls it on every
//! other exit path. `FormulaEngine::scoped` wraps the whole cycle.

pub mod evaluator;
pub mod graph;
pub mod optimizer;
pub mod parser;
pub mod tokenizer;

pub use evaluator::{ErrorValue, Value};
pub use optimizer::{optimize_formula, Advice, AdviceKind, Optimization};

use crate::core::address::{CellAddress, MAX_COL, MAX_ROW};
use crate::error::{SheetcheckError, SheetcheckResult};
use crate::types::{CellValue, SpreadsheetDocument};
use evaluator::{CellLookup, Evaluator};
use graph::{CellKey, DependencyGraph, Step};
use parser::{parse_formula, Expr, RefTarget, Reference};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Where `validate_formula` and `evaluate_formula` place a formula: XFD1048576,
/// the last cell of the context sheet
pub const SCRATCH_CELL: CellAddress = CellAddress {
    row: MAX_ROW,
    col: MAX_COL,
};

//==============================================================================
// Results
//==============================================================================

/// Why a formula failed validation
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The text is not a formula the parser understands
    Parse(String),
    /// The formula evaluates to an error value
    Evaluation(ErrorValue),
}

impl ValidationError {
    pub fn message(&self) -> String {
        match self {
            ValidationError::Parse(message) => format!("Formula syntax error: {message}"),
            ValidationError::Evaluation(error) => format!("{} ({})", error.message(), error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaValidation {
    pub is_valid: bool,
    pub error: Option<ValidationError>,
    pub suggestion: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: Value,
    pub elapsed: Duration,
}

impl Evaluation {
    pub fn error(&self) -> Option<ErrorValue> {
        self.value.error()
    }
}

/// A cell named together with its sheet
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct QualifiedCell {
    pub sheet: String,
    pub address: CellAddress,
}

impl QualifiedCell {
    pub fn qualified(&self) -> String {
        format!("{}!{}", self.sheet, self.address)
    }
}

/// One cycle in the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircularReference {
    /// Every cell in the cycle, sorted
    pub cells: Vec<QualifiedCell>,
    /// Human-readable path, e.g. "A1 → B1 → A1"
    pub chain: String,
}

/// What one cell reads and what reads it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dependencies {
    /// References in the formula; a range counts once
    pub precedents: Vec<String>,
    /// Formula cells whose references cover this cell
    pub dependents: Vec<String>,
}

/// Fix suggestion for an error class
pub fn suggestion_for(error: ErrorValue) -> &'static str {
    match error {
        ErrorValue::Ref => {
            "The reference is invalid; check whether the formula points at deleted cells or sheets"
        }
        ErrorValue::Value => {
            "The formula uses the wrong data type; check for text where a number is expected"
        }
        ErrorValue::DivZero => "Division by zero; guard the divisor with IF or wrap the formula in IFERROR",
        ErrorValue::Name => "Unknown function or range name; check the spelling",
        ErrorValue::Null => "The ranges do not intersect; check the range references",
        ErrorValue::Num => "The number is too large, too small or invalid for this calculation",
        ErrorValue::NotAvailable => {
            "A value is not available; check lookup values used by VLOOKUP or MATCH"
        }
        ErrorValue::Cycle => "Remove the circular reference by restructuring the formulas",
    }
}

const PARSE_SUGGESTION: &str = "Check the formula syntax: parentheses, quotes and separators";

//==============================================================================
// Workbook state
//==============================================================================

/// A formula with its parse tree and resolved references
#[derive(Debug, Clone)]
struct CompiledFormula {
    ast: Result<Expr, String>,
    references: Vec<Reference>,
    /// Resolved areas (sheet index, start, end); unknown sheets are left out
    areas: Vec<(usize, CellAddress, CellAddress)>,
}

impl CompiledFormula {
    fn reads(&self, sheet: usize, address: CellAddress) -> bool {
        self.areas.iter().any(|(s, start, end)| {
            *s == sheet
                && (start.row..=end.row).contains(&address.row)
                && (start.col..=end.col).contains(&address.col)
        })
    }
}

#[derive(Debug, Clone)]
struct EngineCell {
    formula: Option<CompiledFormula>,
    value: Value,
}

#[derive(Debug, Default)]
struct EngineSheet {
    name: String,
    cells: BTreeMap<CellAddress, EngineCell>,
    formulas: BTreeSet<CellAddress>,
}

impl EngineSheet {
    /// Formula cells inside a rectangle
    fn formulas_in(&self, start: CellAddress, end: CellAddress) -> impl Iterator<Item = CellAddress> + '_ {
        self.formulas
            .range(CellAddress::new(start.row, 1)..=CellAddress::new(end.row, MAX_COL))
            .copied()
            .filter(move |a| (start.col..=end.col).contains(&a.col))
    }
}

#[derive(Debug, Default)]
struct Book {
    sheets: Vec<EngineSheet>,
    /// Lower-cased sheet name → index
    index: HashMap<String, usize>,
}

impl CellLookup for Book {
    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_lowercase()).copied()
    }

    fn value(&self, sheet: usize, address: CellAddress) -> Value {
        self.sheets
            .get(sheet)
            .and_then(|s| s.cells.get(&address))
            .map(|c| c.value.clone())
            .unwrap_or(Value::Empty)
    }

    fn values_in(
        &self,
        sheet: usize,
        start: CellAddress,
        end: CellAddress,
    ) -> Vec<(CellAddress, Value)> {
        let Some(sheet) = self.sheets.get(sheet) else {
            return Vec::new();
        };
        sheet
            .cells
            .range(CellAddress::new(start.row, 1)..=CellAddress::new(end.row, MAX_COL))
            .filter(|(a, _)| (start.col..=end.col).contains(&a.col))
            .map(|(a, c)| (*a, c.value.clone()))
            .collect()
    }
}

impl Book {
    fn compile(&self, text: &str, sheet: usize) -> CompiledFormula {
        let ast = parse_formula(text).map_err(|e| e.message);
        let mut references = Vec::new();
        if let Ok(expr) = &ast {
            expr.for_each_reference(&mut |r| {
                if !references.contains(r) {
                    references.push(r.clone());
                }
            });
        }
        let areas = references
            .iter()
            .filter_map(|r| {
                let target_sheet = match &r.sheet {
                    Some(name) => self.sheet_index(name)?,
                    None => sheet,
                };
                let (start, end) = r.target.bounds();
                Some((target_sheet, start, end))
            })
            .collect();
        CompiledFormula {
            ast,
            references,
            areas,
        }
    }

    fn sheet_name(&self, sheet: usize) -> &str {
        self.sheets.get(sheet).map(|s| s.name.as_str()).unwrap_or("")
    }
}

/// Input value of a non-formula cell as the engine sees it
fn literal(value: &CellValue) -> Option<Value> {
    match value {
        CellValue::Number(n) => Some(Value::Number(*n)),
        CellValue::Text(s) => Some(match ErrorValue::from_marker(s) {
            Some(error) => Value::Error(error),
            None => Value::Text(s.clone()),
        }),
        CellValue::Date(serial) if serial.is_finite() => Some(Value::Number(*serial)),
        CellValue::Date(_) => Some(Value::Error(ErrorValue::Value)),
        CellValue::Boolean(b) => Some(Value::Boolean(*b)),
        CellValue::Formula { .. } | CellValue::Empty => None,
    }
}

fn reference_text(reference: &Reference, context_sheet: &str) -> String {
    let target = match reference.target {
        RefTarget::Cell(a) => a.to_string(),
        RefTarget::Range { start, end } if reference.target.is_whole_column() => {
            format!("{}:{}", start.column_letters(), end.column_letters())
        }
        RefTarget::Range { start, end } => format!("{start}:{end}"),
    };
    match &reference.sheet {
        Some(sheet) if !sheet.eq_ignore_ascii_case(context_sheet) => format!("{sheet}!{target}"),
        _ => target,
    }
}

//==============================================================================
// Engine
//==============================================================================

/// Formula engine over one loaded workbook
#[derive(Debug)]
pub struct FormulaEngine {
    book: Book,
    graph: DependencyGraph,
    /// Cycle memberships found by the last recalculation
    cycles: Vec<Vec<CellKey>>,
    released: bool,
}

impl FormulaEngine {
    /// Translate a document into engine cells, build the graph and calculate
    pub fn load_workbook(document: &SpreadsheetDocument) -> SheetcheckResult<Self> {
        let mut book = Book::default();
        for (idx, sheet) in document.sheets.iter().enumerate() {
            if book.index.insert(sheet.name.to_lowercase(), idx).is_some() {
                return Err(SheetcheckError::Engine(format!(
                    "duplicate sheet name: {}",
                    sheet.name
                )));
            }
            book.sheets.push(EngineSheet {
                name: sheet.name.clone(),
                ..EngineSheet::default()
            });
        }

        let mut formula_count = 0;
        for (idx, sheet) in document.sheets.iter().enumerate() {
            for cell in sheet.cells.values() {
                let engine_cell = match &cell.value {
                    CellValue::Formula { text, .. } => {
                        formula_count += 1;
                        EngineCell {
                            formula: Some(book.compile(text, idx)),
                            value: Value::Empty,
                        }
                    }
                    other => match literal(other) {
                        Some(value) => EngineCell {
                            formula: None,
                            value,
                        },
                        None => continue,
                    },
                };
                let target = &mut book.sheets[idx];
                if engine_cell.formula.is_some() {
                    target.formulas.insert(cell.address);
                }
                target.cells.insert(cell.address, engine_cell);
            }
        }

        trace!(
            sheets = book.sheets.len(),
            cells = document.cell_count(),
            formulas = formula_count,
            "formula engine loaded"
        );

        let mut engine = Self {
            book,
            graph: DependencyGraph::new(),
            cycles: Vec::new(),
            released: false,
        };
        engine.recalculate()?;
        Ok(engine)
    }

    /// Load, run `f`, and release the engine whatever `f` does
    pub fn scoped<T>(
        document: &SpreadsheetDocument,
        f: impl FnOnce(&mut FormulaEngine) -> T,
    ) -> SheetcheckResult<T> {
        let mut engine = Self::load_workbook(document)?;
        let result = f(&mut engine);
        engine.destroy();
        Ok(result)
    }

    fn ensure_live(&self) -> SheetcheckResult<()> {
        if self.released {
            Err(SheetcheckError::Engine(
                "formula engine used after destroy()".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn sheet_index(&self, name: &str) -> SheetcheckResult<usize> {
        self.book
            .sheet_index(name)
            .ok_or_else(|| SheetcheckError::Engine(format!("unknown sheet: {name}")))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn formula_count(&self) -> usize {
        self.book.sheets.iter().map(|s| s.formulas.len()).sum()
    }

    pub fn graph_size(&self) -> (usize, usize) {
        (self.graph.node_count(), self.graph.edge_count())
    }

    /// Rebuild the dependency graph and recompute every formula
    pub fn recalculate(&mut self) -> SheetcheckResult<()> {
        self.ensure_live()?;
        self.rebuild_graph();
        self.cycles.clear();

        for step in self.graph.plan() {
            match step {
                Step::Evaluate((sheet, address)) => {
                    let value = self.evaluate_in_place(sheet, address);
                    if let Some(cell) = self.book.sheets[sheet].cells.get_mut(&address) {
                        cell.value = value;
                    }
                }
                Step::Cycle(members) => {
                    for (sheet, address) in &members {
                        if let Some(cell) = self.book.sheets[*sheet].cells.get_mut(address) {
                            cell.value = Value::Error(ErrorValue::Cycle);
                        }
                    }
                    self.cycles.push(members);
                }
            }
        }

        trace!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            cycles = self.cycles.len(),
            "recalculated"
        );
        Ok(())
    }

    fn rebuild_graph(&mut self) {
        self.graph.clear();
        for (sheet_idx, sheet) in self.book.sheets.iter().enumerate() {
            for address in &sheet.formulas {
                let dependent = (sheet_idx, *address);
                self.graph.add_cell(dependent);
                let Some(formula) = sheet.cells.get(address).and_then(|c| c.formula.as_ref())
                else {
                    continue;
                };
                for (target, start, end) in &formula.areas {
                    let Some(target_sheet) = self.book.sheets.get(*target) else {
                        continue;
                    };
                    for precedent in target_sheet.formulas_in(*start, *end) {
                        self.graph.add_dependency((*target, precedent), dependent);
                    }
                }
            }
        }
    }

    fn evaluate_in_place(&self, sheet: usize, address: CellAddress) -> Value {
        let Some(formula) = self.book.sheets[sheet]
            .cells
            .get(&address)
            .and_then(|c| c.formula.as_ref())
        else {
            return Value::Empty;
        };
        match &formula.ast {
            Ok(expr) => Evaluator::new(&self.book, sheet).evaluate(expr),
            Err(_) => Value::Error(ErrorValue::Name),
        }
    }

    /// Evaluate formula text as if it sat in the scratch cell of `sheet`.
    /// Nothing reads the scratch cell, so the workbook needs no recalculation.
    fn evaluate_at_scratch(&self, formula: &str, sheet: usize) -> Result<Value, String> {
        let compiled = self.book.compile(formula, sheet);
        let expr = compiled.ast.as_ref().map_err(Clone::clone)?;
        if compiled.reads(sheet, SCRATCH_CELL) {
            return Ok(Value::Error(ErrorValue::Cycle));
        }
        Ok(Evaluator::new(&self.book, sheet).evaluate(expr))
    }

    /// Check whether a formula evaluates cleanly in the context of `sheet`
    pub fn validate_formula(
        &self,
        formula: &str,
        sheet: &str,
    ) -> SheetcheckResult<FormulaValidation> {
        self.ensure_live()?;
        let sheet = self.sheet_index(sheet)?;
        let validation = match self.evaluate_at_scratch(formula, sheet) {
            Err(message) => FormulaValidation {
                is_valid: false,
                error: Some(ValidationError::Parse(message)),
                suggestion: Some(PARSE_SUGGESTION),
            },
            Ok(Value::Error(error)) => FormulaValidation {
                is_valid: false,
                error: Some(ValidationError::Evaluation(error)),
                suggestion: Some(suggestion_for(error)),
            },
            Ok(_) => FormulaValidation {
                is_valid: true,
                error: None,
                suggestion: None,
            },
        };
        Ok(validation)
    }

    /// Compute a formula's value in the context of `sheet`; errors come back as values
    pub fn evaluate_formula(&self, formula: &str, sheet: &str) -> SheetcheckResult<Evaluation> {
        self.ensure_live()?;
        let sheet = self.sheet_index(sheet)?;
        let started = Instant::now();
        let value = self
            .evaluate_at_scratch(formula, sheet)
            .unwrap_or(Value::Error(ErrorValue::Name));
        Ok(Evaluation {
            value,
            elapsed: started.elapsed(),
        })
    }

    /// Current value of a cell
    pub fn evaluate_cell(&self, sheet: &str, address: CellAddress) -> SheetcheckResult<Value> {
        self.ensure_live()?;
        let sheet = self.sheet_index(sheet)?;
        Ok(self.book.value(sheet, address))
    }

    /// Every cycle in the workbook, each reported once
    pub fn detect_circular_references(&self) -> SheetcheckResult<Vec<CircularReference>> {
        self.ensure_live()?;
        let mut found = Vec::with_capacity(self.cycles.len());

        for members in &self.cycles {
            let single_sheet = members.iter().all(|(s, _)| *s == members[0].0);
            let name = |(sheet, address): &CellKey| {
                if single_sheet {
                    address.to_string()
                } else {
                    format!("{}!{}", self.book.sheet_name(*sheet), address)
                }
            };
            let chain = self
                .graph
                .cycle_chain(members)
                .iter()
                .map(name)
                .collect::<Vec<_>>()
                .join(" → ");
            let cells = members
                .iter()
                .map(|(sheet, address)| QualifiedCell {
                    sheet: self.book.sheet_name(*sheet).to_string(),
                    address: *address,
                })
                .collect();
            found.push(CircularReference { cells, chain });
        }

        found.sort_by(|a, b| a.cells.cmp(&b.cells));
        Ok(found)
    }

    /// Precedents of a formula cell and the formula cells that read it
    pub fn get_dependencies(
        &self,
        sheet: &str,
        address: CellAddress,
    ) -> SheetcheckResult<Dependencies> {
        self.ensure_live()?;
        let sheet_idx = self.sheet_index(sheet)?;
        let context = self.book.sheet_name(sheet_idx).to_string();

        let precedents = self.book.sheets[sheet_idx]
            .cells
            .get(&address)
            .and_then(|c| c.formula.as_ref())
            .map(|f| {
                f.references
                    .iter()
                    .map(|r| reference_text(r, &context))
                    .collect()
            })
            .unwrap_or_default();

        // Formula cells are graph nodes; anything else is found by scanning
        let readers = if self.book.sheets[sheet_idx].formulas.contains(&address) {
            self.graph.dependents((sheet_idx, address))
        } else {
            self.readers_of(sheet_idx, address)
        };
        let dependents = readers
            .into_iter()
            .map(|(idx, reader)| {
                if idx == sheet_idx {
                    reader.to_string()
                } else {
                    format!("{}!{}", self.book.sheet_name(idx), reader)
                }
            })
            .collect();

        Ok(Dependencies {
            precedents,
            dependents,
        })
    }

    /// Formula cells whose references cover a cell that holds no formula
    fn readers_of(&self, sheet: usize, address: CellAddress) -> Vec<CellKey> {
        let mut readers = Vec::new();
        for (idx, other) in self.book.sheets.iter().enumerate() {
            for formula_address in &other.formulas {
                let reads = other
                    .cells
                    .get(formula_address)
                    .and_then(|c| c.formula.as_ref())
                    .is_some_and(|f| f.reads(sheet, address));
                if reads {
                    readers.push((idx, *formula_address));
                }
            }
        }
        readers
    }

    /// Syntactic simplification plus performance advice for one formula
    pub fn optimize_formula(&self, formula: &str) -> Optimization {
        optimize_formula(formula)
    }

    /// Release the graph and all cell state. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.released {
            return;
        }
        self.graph.clear();
        self.cycles = Vec::new();
        self.book = Book::default();
        self.released = true;
        debug!("formula engine released");
    }
}

impl Drop for FormulaEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, Sheet};

    fn document(cells: &[(&str, CellValue)]) -> SpreadsheetDocument {
        let mut sheet = Sheet::new("Sheet1");
        for (address, value) in cells {
            sheet.set(Cell::new(CellAddress::parse(address).unwrap(), value.clone()));
        }
        let mut doc = SpreadsheetDocument::new();
        doc.add_sheet(sheet);
        doc
    }

    fn formula(text: &str) -> CellValue {
        CellValue::Formula {
            text: text.to_string(),
            cached: None,
        }
    }

    fn addr(text: &str) -> CellAddress {
        CellAddress::parse(text).unwrap()
    }

    #[test]
    fn test_load_calculates_in_dependency_order() {
        let doc = document(&[
            ("C1", formula("=B1*2")),
            ("B1", formula("=A1+1")),
            ("A1", CellValue::Number(4.0)),
        ]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();
        assert_eq!(engine.evaluate_cell("Sheet1", addr("C1")).unwrap(), Value::Number(10.0));
    }

    #[test]
    fn test_self_reference_cycle() {
        let doc = document(&[("A1", formula("=A1+1"))]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();
        let cycles = engine.detect_circular_references().unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cells[0].address, addr("A1"));
        assert_eq!(cycles[0].chain, "A1 → A1");
        assert_eq!(
            engine.evaluate_cell("Sheet1", addr("A1")).unwrap(),
            Value::Error(ErrorValue::Cycle)
        );
    }

    #[test]
    fn test_cycle_through_range_reference() {
        let doc = document(&[
            ("A1", formula("=SUM(B1:B3)")),
            ("B2", formula("=A1*2")),
            ("C1", formula("=B2+1")),
        ]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();
        let cycles = engine.detect_circular_references().unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].chain, "A1 → B2 → A1");
        assert_eq!(
            engine.evaluate_cell("Sheet1", addr("C1")).unwrap(),
            Value::Error(ErrorValue::Cycle)
        );
    }

    #[test]
    fn test_validate_reports_error_class_and_suggestion() {
        let doc = document(&[("A1", CellValue::Number(0.0))]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();

        let bad = engine.validate_formula("=10/A1", "Sheet1").unwrap();
        assert!(!bad.is_valid);
        assert_eq!(bad.error, Some(ValidationError::Evaluation(ErrorValue::DivZero)));
        assert!(bad.suggestion.unwrap().contains("IFERROR"));

        let parse = engine.validate_formula("=SUM(A1", "Sheet1").unwrap();
        assert!(matches!(parse.error, Some(ValidationError::Parse(_))));

        assert!(engine.validate_formula("=A1+1", "Sheet1").unwrap().is_valid);
    }

    #[test]
    fn test_scratch_evaluation_leaves_workbook_untouched() {
        let doc = document(&[("A1", CellValue::Number(2.0)), ("B1", formula("=A1*3"))]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();
        let evaluation = engine.evaluate_formula("=B1+A1", "Sheet1").unwrap();
        assert_eq!(evaluation.value, Value::Number(8.0));
        assert_eq!(
            engine.evaluate_cell("Sheet1", SCRATCH_CELL).unwrap(),
            Value::Empty
        );
        let self_read = engine.evaluate_formula("=XFD1048576+1", "Sheet1").unwrap();
        assert_eq!(self_read.error(), Some(ErrorValue::Cycle));
    }

    #[test]
    fn test_dependencies_count_ranges_once() {
        let doc = document(&[
            ("A1", formula("=SUM(B1:B10)+C1+Other!A1")),
            ("D1", formula("=A1")),
            ("E1", formula("=SUM(A:A)")),
        ]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();
        let deps = engine.get_dependencies("Sheet1", addr("A1")).unwrap();
        assert_eq!(deps.precedents, vec!["B1:B10", "C1", "Other!A1"]);
        assert_eq!(deps.dependents, vec!["D1", "E1"]);

        let data = engine.get_dependencies("Sheet1", addr("B5")).unwrap();
        assert!(data.precedents.is_empty());
        assert_eq!(data.dependents, vec!["A1"]);
    }

    #[test]
    fn test_dependents_of_cycle_member_include_itself() {
        let doc = document(&[("A1", formula("=A1+B1")), ("B1", formula("=A1"))]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();
        let deps = engine.get_dependencies("Sheet1", addr("A1")).unwrap();
        assert_eq!(deps.dependents, vec!["A1", "B1"]);
    }

    #[test]
    fn test_error_literal_cells_load_as_errors() {
        let doc = document(&[
            ("A1", CellValue::Text("#N/A".into())),
            ("B1", formula("=A1")),
        ]);
        let engine = FormulaEngine::load_workbook(&doc).unwrap();
        assert_eq!(
            engine.evaluate_cell("Sheet1", addr("B1")).unwrap(),
            Value::Error(ErrorValue::NotAvailable)
        );
    }

    #[test]
    fn test_destroy_is_idempotent_and_blocks_use() {
        let doc = document(&[("A1", formula("=1+1"))]);
        let mut engine = FormulaEngine::load_workbook(&doc).unwrap();
        engine.destroy();
        engine.destroy();
        assert!(engine.is_released());
        assert_eq!(engine.graph_size(), (0, 0));
        assert!(matches!(
            engine.detect_circular_references(),
            Err(SheetcheckError::Engine(_))
        ));
    }

    #[test]
    fn test_scoped_releases_after_use() {
        let doc = document(&[("A1", formula("=2*3"))]);
        let value = FormulaEngine::scoped(&doc, |engine| {
            engine.evaluate_cell("Sheet1", addr("A1")).unwrap()
        })
        .unwrap();
        assert_eq!(value, Value::Number(6.0));
    }

    #[test]
    fn test_duplicate_sheet_names_rejected() {
        let mut doc = SpreadsheetDocument::new();
        doc.add_sheet(Sheet::new("Data"));
        doc.add_sheet(Sheet::new("data"));
        assert!(FormulaEngine::load_workbook(&doc).is_err());
    }
}
