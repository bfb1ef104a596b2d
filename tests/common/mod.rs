//! Shared fixtures: workbooks synthesized in memory with rust_xlsxwriter

#![allow(dead_code)]

use royalbit_sheetcheck::types::Finding;
use royalbit_sheetcheck::AnalyzerConfig;
use rust_xlsxwriter::{Formula, Workbook, Worksheet};

/// Build a one-sheet workbook and return its bytes
pub fn workbook(build: impl FnOnce(&mut Worksheet)) -> Vec<u8> {
    let mut workbook = Workbook::new();
    build(workbook.add_worksheet());
    workbook.save_to_buffer().unwrap()
}

/// A formula whose cached result is already stored in the file
pub fn formula_with_result(text: &str, result: &str) -> Formula {
    Formula::new(text).set_result(result)
}

/// Config forcing every input down the streaming path
pub fn streaming_config() -> AnalyzerConfig {
    AnalyzerConfig {
        streaming_threshold_bytes: 0,
        ..AnalyzerConfig::default()
    }
}

/// Config keeping every input on the full-load path
pub fn full_load_config() -> AnalyzerConfig {
    AnalyzerConfig {
        streaming_threshold_bytes: u64::MAX,
        ..AnalyzerConfig::default()
    }
}

/// Header row plus `rows` data rows; every value in the sheet is distinct
pub fn tabular_workbook(rows: u32) -> Vec<u8> {
    workbook(|sheet| {
        sheet.write_string(0, 0, "id").unwrap();
        sheet.write_string(0, 1, "amount").unwrap();
        sheet.write_string(0, 2, "delta").unwrap();
        for row in 1..=rows {
            sheet.write_number(row, 0, row as f64).unwrap();
            sheet.write_number(row, 1, row as f64 * 0.5 + 0.25).unwrap();
            sheet.write_number(row, 2, -(row as f64)).unwrap();
        }
    })
}

/// Findings in a stable order, for comparing two runs
pub fn canonical(findings: &[Finding]) -> Vec<String> {
    let mut keys: Vec<String> = findings
        .iter()
        .map(|f| serde_json::to_string(f).unwrap())
        .collect();
    keys.sort();
    keys
}
