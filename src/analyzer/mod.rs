//! Analysis dispatcher
//!
//! Picks the execution path by input size: inputs at or above the streaming
//! threshold are streamed, smaller ones are fully loaded. A streaming run that
//! fails as a whole is retried once through full-load, and the result says so
//! in `performance.method`.

pub mod checks;
pub mod cycles;
pub mod full_load;
pub mod memory;
pub mod streaming;

pub use cycles::{CycleCoverage, CycleDetector, GraphCycleDetector, SubstringCycleDetector};
pub use full_load::FullLoadAnalyzer;
pub use streaming::{StreamProgress, StreamState, StreamStats, StreamingAnalyzer};

use crate::config::AnalyzerConfig;
use crate::error::SheetcheckResult;
use crate::repository::AnalysisRepository;
use crate::types::{AnalysisMethod, AnalysisResult, Finding, Metadata, Performance};
use std::time::Instant;
use tracing::{error, info, warn};

/// What one execution path hands back to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct PathReport {
    pub findings: Vec<Finding>,
    pub metadata: Metadata,
    /// Highest resident memory sampled during the run, in bytes
    pub peak_memory: u64,
}

/// One way of turning workbook bytes into findings.
///
/// `Err` means the run failed as a whole (the input could not be read),
/// never that the workbook has problems.
pub trait AnalysisStrategy {
    /// Reported in `performance.method` when the run succeeds
    fn method(&self) -> AnalysisMethod;
    fn run(&mut self, bytes: &[u8]) -> SheetcheckResult<PathReport>;
}

/// A stored analysis
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnalysis {
    pub id: String,
    pub result: AnalysisResult,
}

/// Size-based dispatcher over the full-load and streaming paths
pub struct Analyzer {
    config: AnalyzerConfig,
    /// Replaces the built-in streaming path when set
    streaming: Option<Box<dyn AnalysisStrategy>>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            streaming: None,
        }
    }

    /// Use another strategy for large inputs
    pub fn with_streaming_strategy(mut self, strategy: Box<dyn AnalysisStrategy>) -> Self {
        self.streaming = Some(strategy);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze one workbook. Never fails: a terminal failure comes back as
    /// `success = false` with no findings.
    pub fn analyze(&mut self, bytes: &[u8]) -> AnalysisResult {
        let started = Instant::now();
        let size = bytes.len() as u64;

        if size < self.config.streaming_threshold_bytes {
            info!(bytes = size, "analyzing with full-load");
            return self.full_load(bytes, None, started);
        }

        info!(
            bytes = size,
            threshold = self.config.streaming_threshold_bytes,
            "analyzing with streaming"
        );
        match self.stream(bytes) {
            Ok((method, report)) => finish(method, report, started),
            Err(e) => {
                warn!(error = %e, "streaming analysis failed; falling back to full-load");
                self.full_load(
                    bytes,
                    Some(AnalysisMethod::StreamingFallbackToFullLoad),
                    started,
                )
            }
        }
    }

    /// Analyze and hand the result to a repository
    pub fn analyze_and_store(
        &mut self,
        bytes: &[u8],
        repository: &mut dyn AnalysisRepository,
    ) -> SheetcheckResult<StoredAnalysis> {
        let result = self.analyze(bytes);
        let id = repository.save(&result)?;
        info!(id = %id, success = result.success, "analysis stored");
        Ok(StoredAnalysis { id, result })
    }

    fn stream(&mut self, bytes: &[u8]) -> SheetcheckResult<(AnalysisMethod, PathReport)> {
        match self.streaming.as_mut() {
            Some(strategy) => {
                let report = strategy.run(bytes)?;
                Ok((strategy.method(), report))
            }
            None => {
                let mut strategy = StreamingAnalyzer::new(self.config.clone())?;
                let report = strategy.run(bytes)?;
                Ok((strategy.method(), report))
            }
        }
    }

    /// Run full-load; `method_override` replaces the strategy's own method
    /// when this run is a fallback
    fn full_load(
        &self,
        bytes: &[u8],
        method_override: Option<AnalysisMethod>,
        started: Instant,
    ) -> AnalysisResult {
        let mut strategy = FullLoadAnalyzer::new(self.config.clone());
        let method = method_override.unwrap_or_else(|| strategy.method());
        match strategy.run(bytes) {
            Ok(report) => finish(method, report, started),
            Err(e) => {
                error!(error = %e, method = %method, "analysis failed");
                AnalysisResult::failed(Performance {
                    method,
                    elapsed_time: elapsed_ms(started),
                    peak_memory: 0,
                })
            }
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn finish(method: AnalysisMethod, report: PathReport, started: Instant) -> AnalysisResult {
    let performance = Performance {
        method,
        elapsed_time: elapsed_ms(started),
        peak_memory: report.peak_memory,
    };
    let result = AnalysisResult::completed(report.findings, report.metadata, performance);
    info!(
        method = %method,
        findings = result.findings.len(),
        elapsed_ms = result.performance.elapsed_time,
        "analysis complete"
    );
    result
}

/// Analyze with the default configuration
pub fn analyze(bytes: &[u8]) -> AnalysisResult {
    Analyzer::default().analyze(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SheetcheckError;
    use crate::repository::InMemoryRepository;

    struct Failing;

    impl AnalysisStrategy for Failing {
        fn method(&self) -> AnalysisMethod {
            AnalysisMethod::Streaming
        }

        fn run(&mut self, _bytes: &[u8]) -> SheetcheckResult<PathReport> {
            Err(SheetcheckError::Stream {
                part: "xl/worksheets/sheet1.xml".into(),
                message: "forced".into(),
            })
        }
    }

    fn tiny_workbook() -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet().write_number(0, 0, 1).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_small_input_takes_full_load() {
        let result = analyze(&tiny_workbook());
        assert!(result.success);
        assert_eq!(result.performance.method, AnalysisMethod::FullLoad);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let bytes = tiny_workbook();
        let config = AnalyzerConfig {
            streaming_threshold_bytes: bytes.len() as u64,
            ..AnalyzerConfig::default()
        };
        let result = Analyzer::new(config).analyze(&bytes);
        assert_eq!(result.performance.method, AnalysisMethod::Streaming);
    }

    #[test]
    fn test_failed_streaming_falls_back_once() {
        let config = AnalyzerConfig {
            streaming_threshold_bytes: 0,
            ..AnalyzerConfig::default()
        };
        let result = Analyzer::new(config)
            .with_streaming_strategy(Box::new(Failing))
            .analyze(&tiny_workbook());
        assert!(result.success);
        assert_eq!(
            result.performance.method,
            AnalysisMethod::StreamingFallbackToFullLoad
        );
        assert_eq!(result.performance.method.executed_path(), AnalysisMethod::FullLoad);
    }

    /// Streams by reading the whole input through full-load
    struct Delegating;

    impl AnalysisStrategy for Delegating {
        fn method(&self) -> AnalysisMethod {
            AnalysisMethod::Streaming
        }

        fn run(&mut self, bytes: &[u8]) -> SheetcheckResult<PathReport> {
            FullLoadAnalyzer::new(AnalyzerConfig::default()).run(bytes)
        }
    }

    #[test]
    fn test_replacement_strategy_reports_its_method() {
        let config = AnalyzerConfig {
            streaming_threshold_bytes: 0,
            ..AnalyzerConfig::default()
        };
        let result = Analyzer::new(config)
            .with_streaming_strategy(Box::new(Delegating))
            .analyze(&tiny_workbook());
        assert!(result.success);
        assert_eq!(result.performance.method, AnalysisMethod::Streaming);
        assert_eq!(FullLoadAnalyzer::new(AnalyzerConfig::default()).method(), AnalysisMethod::FullLoad);
    }

    #[test]
    fn test_unreadable_input_is_terminal() {
        let result = analyze(b"not a workbook");
        assert!(!result.success);
        assert!(result.findings.is_empty());
        assert_eq!(result.summary.message, "analysis failed");
    }

    #[test]
    fn test_analyze_and_store() {
        let mut repository = InMemoryRepository::new();
        let stored = Analyzer::default()
            .analyze_and_store(&tiny_workbook(), &mut repository)
            .unwrap();
        assert_eq!(repository.load(&stored.id).unwrap(), Some(stored.result));
    }
}
