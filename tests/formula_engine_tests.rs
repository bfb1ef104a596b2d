//! Formula engine over workbooks read from real .xlsx bytes

use pretty_assertions::assert_eq;
use royalbit_sheetcheck::core::formula_engine::{ErrorValue, ValidationError, Value};
use royalbit_sheetcheck::core::{CellAddress, FormulaEngine};
use royalbit_sheetcheck::excel::ExcelImporter;
use royalbit_sheetcheck::SpreadsheetDocument;
use rust_xlsxwriter::{ExcelDateTime, Format, Formula, Workbook};

fn addr(text: &str) -> CellAddress {
    CellAddress::parse(text).unwrap()
}

fn import(workbook: &mut Workbook) -> SpreadsheetDocument {
    let bytes = workbook.save_to_buffer().unwrap();
    ExcelImporter::new(&bytes).import().unwrap().document
}

/// Inputs on one sheet, calculations on another
fn two_sheet_document() -> SpreadsheetDocument {
    let mut workbook = Workbook::new();
    let inputs = workbook.add_worksheet().set_name("Inputs").unwrap();
    inputs.write_number(0, 0, 120).unwrap();
    inputs.write_number(1, 0, 0.25).unwrap();
    let date = ExcelDateTime::from_ymd(2024, 1, 15).unwrap();
    inputs
        .write_datetime_with_format(2, 0, &date, &Format::new().set_num_format("yyyy-mm-dd"))
        .unwrap();

    let calc = workbook.add_worksheet().set_name("Calc").unwrap();
    calc.write_formula(0, 0, Formula::new("=Inputs!A1*Inputs!A2"))
        .unwrap();
    calc.write_formula(1, 0, Formula::new("=A1+SUM(Inputs!A1:A2)"))
        .unwrap();
    calc.write_formula(2, 0, Formula::new("=DATE(2024,1,15)-Inputs!A3"))
        .unwrap();
    import(&mut workbook)
}

#[test]
fn test_cross_sheet_calculation() {
    let document = two_sheet_document();
    let engine = FormulaEngine::load_workbook(&document).unwrap();

    assert_eq!(engine.formula_count(), 3);
    assert_eq!(engine.evaluate_cell("Calc", addr("A1")).unwrap(), Value::Number(30.0));
    assert_eq!(engine.evaluate_cell("Calc", addr("A2")).unwrap(), Value::Number(150.25));
    assert_eq!(engine.evaluate_cell("Calc", addr("A3")).unwrap(), Value::Number(0.0));
}

#[test]
fn test_dates_load_as_serials() {
    let document = two_sheet_document();
    let engine = FormulaEngine::load_workbook(&document).unwrap();
    assert_eq!(
        engine.evaluate_cell("Inputs", addr("A3")).unwrap(),
        Value::Number(45306.0)
    );
}

#[test]
fn test_cross_sheet_dependencies() {
    let document = two_sheet_document();
    let engine = FormulaEngine::load_workbook(&document).unwrap();

    let deps = engine.get_dependencies("Calc", addr("A2")).unwrap();
    assert_eq!(deps.precedents, vec!["A1", "Inputs!A1:A2"]);

    let inputs = engine.get_dependencies("Inputs", addr("A1")).unwrap();
    assert!(inputs.precedents.is_empty());
    assert_eq!(inputs.dependents, vec!["Calc!A1", "Calc!A2"]);

    let calc = engine.get_dependencies("Calc", addr("A1")).unwrap();
    assert_eq!(calc.dependents, vec!["A2"]);
}

#[test]
fn test_evaluate_in_sheet_context() {
    let document = two_sheet_document();
    let engine = FormulaEngine::load_workbook(&document).unwrap();

    let evaluation = engine.evaluate_formula("=A1*2", "Inputs").unwrap();
    assert_eq!(evaluation.value, Value::Number(240.0));

    let evaluation = engine.evaluate_formula("=A1/0", "Calc").unwrap();
    assert_eq!(evaluation.error(), Some(ErrorValue::DivZero));

    assert!(engine.evaluate_formula("=A1", "Missing").is_err());
}

#[test]
fn test_validation_suggestions_by_error_class() {
    let document = two_sheet_document();
    let engine = FormulaEngine::load_workbook(&document).unwrap();

    let cases = [
        ("=1/0", ErrorValue::DivZero, "IFERROR"),
        ("=NOPE(1)", ErrorValue::Name, "spelling"),
        ("=SQRT(-4)", ErrorValue::Num, "invalid"),
        ("=NA()", ErrorValue::NotAvailable, "lookup"),
    ];
    for (formula, error, hint) in cases {
        let validation = engine.validate_formula(formula, "Calc").unwrap();
        assert!(!validation.is_valid, "{formula}");
        assert_eq!(validation.error, Some(ValidationError::Evaluation(error)));
        assert!(validation.suggestion.unwrap().contains(hint), "{formula}");
    }
}

#[test]
fn test_cycle_across_sheets() {
    let mut workbook = Workbook::new();
    let first = workbook.add_worksheet().set_name("One").unwrap();
    first.write_formula(0, 0, Formula::new("=Two!A1+1")).unwrap();
    let second = workbook.add_worksheet().set_name("Two").unwrap();
    second.write_formula(0, 0, Formula::new("=One!A1*2")).unwrap();
    let document = import(&mut workbook);

    let engine = FormulaEngine::load_workbook(&document).unwrap();
    let cycles = engine.detect_circular_references().unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].cells.len(), 2);
    assert!(cycles[0].chain.contains("One!A1"));
    assert!(cycles[0].chain.contains("Two!A1"));
}

#[test]
fn test_optimizer_canonical_rewrites() {
    let document = SpreadsheetDocument::new();
    let engine = FormulaEngine::load_workbook(&document).unwrap();

    assert_eq!(engine.optimize_formula("((A1+0)*1)").optimized, "A1");
    assert_eq!(engine.optimize_formula("=A1--B1").optimized, "=A1+B1");
    assert_eq!(engine.optimize_formula("=A1+-B1").optimized, "=A1-B1");

    // String literals are left alone
    let literal = engine.optimize_formula("=\"(x+0)*1\"&A1");
    assert!(!literal.is_rewritten());
}

#[test]
fn test_scoped_engine_released_on_error_path() {
    let document = two_sheet_document();
    let outcome = FormulaEngine::scoped(&document, |engine| {
        engine.evaluate_formula("=1", "NoSuchSheet").map(|e| e.value)
    })
    .unwrap();
    assert!(outcome.is_err());
}

// =============================================================================
// Inputs at the edge of what the engine accepts
// =============================================================================

fn one_cell_engine() -> FormulaEngine {
    let mut workbook = Workbook::new();
    workbook.add_worksheet().write_number(0, 0, 5).unwrap();
    FormulaEngine::load_workbook(&import(&mut workbook)).unwrap()
}

#[test]
fn test_huge_date_arguments_are_num_errors() {
    let engine = one_cell_engine();
    for formula in ["=DATE(2024,1E300,1)", "=DATE(2024,1,-1E300)"] {
        let evaluation = engine.evaluate_formula(formula, "Sheet1").unwrap();
        assert_eq!(evaluation.error(), Some(ErrorValue::Num), "{formula}");
    }
}

#[test]
fn test_large_bounded_range_on_sparse_sheet() {
    let engine = one_cell_engine();
    let evaluation = engine
        .evaluate_formula("=COUNTIF(A1:Z1000000,\">0\")", "Sheet1")
        .unwrap();
    assert_eq!(evaluation.value, Value::Number(1.0));
    let evaluation = engine
        .evaluate_formula("=SUMIF(A1:Z1000000,\">0\")+MATCH(5,A1:A1000000,0)", "Sheet1")
        .unwrap();
    assert_eq!(evaluation.value, Value::Number(6.0));
}

#[test]
fn test_deeply_nested_formula_is_a_syntax_error() {
    let engine = one_cell_engine();
    let formula = format!("={}1{}", "(".repeat(1000), ")".repeat(1000));
    let validation = engine.validate_formula(&formula, "Sheet1").unwrap();
    assert!(!validation.is_valid);
    assert!(matches!(validation.error, Some(ValidationError::Parse(_))));
}
