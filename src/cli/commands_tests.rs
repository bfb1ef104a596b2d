use super::*;
use std::io::Write;
use tempfile::TempDir;

fn workbook_file(dir: &TempDir) -> PathBuf {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_number(0, 0, 10).unwrap();
    sheet
        .write_formula(0, 1, rust_xlsxwriter::Formula::new("=A1/0"))
        .unwrap();
    let path = dir.path().join("book.xlsx");
    workbook.save(&path).unwrap();
    path
}

// =========================================================================
// resolve_config Tests
// =========================================================================

#[test]
fn test_resolve_config_defaults() {
    let config = resolve_config(&AnalyzeOptions::default()).unwrap();
    assert_eq!(config, AnalyzerConfig::default());
}

#[test]
fn test_resolve_config_flags_override_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sheetcheck.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "streaming_threshold_bytes: 1024").unwrap();
    writeln!(file, "memory_ceiling_bytes: 2048").unwrap();

    let options = AnalyzeOptions {
        config: Some(path),
        memory_ceiling: Some(4096),
        ..AnalyzeOptions::default()
    };
    let config = resolve_config(&options).unwrap();
    assert_eq!(config.streaming_threshold_bytes, 1024);
    assert_eq!(config.memory_ceiling_bytes, 4096);
}

#[test]
fn test_resolve_config_missing_file() {
    let options = AnalyzeOptions {
        config: Some(PathBuf::from("/nonexistent/sheetcheck.yaml")),
        ..AnalyzeOptions::default()
    };
    assert!(resolve_config(&options).is_err());
}

// =========================================================================
// analyze Tests
// =========================================================================

#[test]
fn test_analyze_reports_success() {
    let dir = TempDir::new().unwrap();
    let path = workbook_file(&dir);
    assert!(analyze(path, AnalyzeOptions::default()).unwrap());
}

#[test]
fn test_analyze_unreadable_workbook_is_unsuccessful() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.xlsx");
    std::fs::write(&path, b"definitely not a zip").unwrap();
    assert!(!analyze(path, AnalyzeOptions::default()).unwrap());
}

#[test]
fn test_analyze_missing_file_is_an_error() {
    let result = analyze(PathBuf::from("/nonexistent/book.xlsx"), AnalyzeOptions::default());
    assert!(result.is_err());
}

#[test]
fn test_analyze_stores_result() {
    let dir = TempDir::new().unwrap();
    let path = workbook_file(&dir);
    let store = dir.path().join("results");
    let options = AnalyzeOptions {
        json: true,
        store: Some(store.clone()),
        ..AnalyzeOptions::default()
    };
    assert!(analyze(path, options).unwrap());
    let stored: Vec<_> = std::fs::read_dir(&store).unwrap().collect();
    assert_eq!(stored.len(), 1);
}

// =========================================================================
// optimize Tests
// =========================================================================

#[test]
fn test_optimize_command() {
    assert!(optimize("=VLOOKUP(A1,B:C,2,FALSE)".to_string(), false).is_ok());
    assert!(optimize("=A1+1".to_string(), true).is_ok());
}

#[test]
fn test_severity_heading_includes_count() {
    colored::control::set_override(false);
    assert_eq!(severity_heading(Severity::High, 3), "HIGH (3)");
}
