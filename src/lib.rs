//! Sheetcheck - spreadsheet correctness analysis
//!
//! Finds formula errors, circular references, data inconsistencies and
//! format problems in `.xlsx` workbooks. Small workbooks are loaded whole and
//! every formula is evaluated; large ones are streamed row by row in bounded
//! memory.
//!
//! # Features
//!
//! - Formula engine with dependency graph, cycle detection and optimizer
//! - Size-based dispatch with automatic fallback to full-load
//! - Structured findings with kind, severity, location and suggestion
//! - YAML configuration and JSON reports
//!
//! # Example
//!
//! ```no_run
//! use royalbit_sheetcheck::{Analyzer, AnalyzerConfig};
//!
//! let bytes = std::fs::read("book.xlsx")?;
//! let result = Analyzer::new(AnalyzerConfig::default()).analyze(&bytes);
//!
//! println!("{} ({})", result.summary.message, result.performance.method);
//! for finding in &result.findings {
//!     println!("{} {}: {}", finding.severity, finding.location, finding.description);
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod excel;
pub mod repository;
pub mod types;

// Re-export commonly used types
pub use analyzer::{analyze, AnalysisStrategy, Analyzer, PathReport, StoredAnalysis};
pub use config::AnalyzerConfig;
pub use core::FormulaEngine;
pub use error::{SheetcheckError, SheetcheckResult};
pub use repository::{AnalysisRepository, InMemoryRepository, JsonDirRepository};
pub use types::{
    AnalysisMethod, AnalysisResult, Finding, FindingKind, IssueCode, Location, Severity,
    SpreadsheetDocument,
};
