//! Storage boundary for analysis results
//!
//! The analyzer never keeps results itself; callers pass a repository to
//! `Analyzer::analyze_and_store` when they want one kept.

use crate::error::{SheetcheckError, SheetcheckResult};
use crate::types::AnalysisResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub trait AnalysisRepository {
    /// Store a result and return its new id
    fn save(&mut self, result: &AnalysisResult) -> SheetcheckResult<String>;

    fn load(&self, id: &str) -> SheetcheckResult<Option<AnalysisResult>>;
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Results kept in a map owned by the caller
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    results: HashMap<String, AnalysisResult>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl AnalysisRepository for InMemoryRepository {
    fn save(&mut self, result: &AnalysisResult) -> SheetcheckResult<String> {
        let id = new_id();
        self.results.insert(id.clone(), result.clone());
        Ok(id)
    }

    fn load(&self, id: &str) -> SheetcheckResult<Option<AnalysisResult>> {
        Ok(self.results.get(id).cloned())
    }
}

/// One pretty-printed JSON file per result: `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct JsonDirRepository {
    dir: PathBuf,
}

impl JsonDirRepository {
    /// Use `dir`, creating it if needed
    pub fn open(dir: impl AsRef<Path>) -> SheetcheckResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> SheetcheckResult<PathBuf> {
        if Uuid::parse_str(id).is_err() {
            return Err(SheetcheckError::Config(format!("not an analysis id: {id}")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl AnalysisRepository for JsonDirRepository {
    fn save(&mut self, result: &AnalysisResult) -> SheetcheckResult<String> {
        let id = new_id();
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(self.path_for(&id)?, json)?;
        Ok(id)
    }

    fn load(&self, id: &str) -> SheetcheckResult<Option<AnalysisResult>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::CellAddress;
    use crate::types::{
        AnalysisMethod, Finding, IssueCode, Location, Metadata, Performance, Severity,
    };

    fn sample() -> AnalysisResult {
        let finding = Finding::new(
            IssueCode::DivByZero,
            Severity::High,
            Location::cell("Sheet1", CellAddress::new(1, 2)),
            "Formula error: Division by zero (#DIV/0!)",
            "Wrap the formula in IFERROR",
        )
        .with_value("=1/0");
        AnalysisResult::completed(
            vec![finding],
            Metadata {
                total_sheets: 1,
                total_rows: 1,
                total_cells: 1,
            },
            Performance {
                method: AnalysisMethod::FullLoad,
                elapsed_time: 1.5,
                peak_memory: 1024,
            },
        )
    }

    #[test]
    fn test_in_memory_round_trip() {
        let mut repository = InMemoryRepository::new();
        let id = repository.save(&sample()).unwrap();
        assert_eq!(repository.len(), 1);
        assert_eq!(repository.load(&id).unwrap(), Some(sample()));
        assert_eq!(repository.load("missing").unwrap(), None);
    }

    #[test]
    fn test_json_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut repository = JsonDirRepository::open(dir.path().join("results")).unwrap();
        let id = repository.save(&sample()).unwrap();
        assert!(dir.path().join("results").join(format!("{id}.json")).exists());
        assert_eq!(repository.load(&id).unwrap(), Some(sample()));
    }

    #[test]
    fn test_json_dir_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let repository = JsonDirRepository::open(dir.path()).unwrap();
        assert!(repository.load("../etc/passwd").is_err());
    }
}
