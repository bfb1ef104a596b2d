//! Circular-reference detection strategies
//!
//! Both strategies see the same stream of formula cells. The graph strategy
//! defers to the formula engine's dependency graph and finds every cycle; the
//! substring strategy only notices a formula that names its own address, so
//! indirect cycles (A1 → B1 → A1) pass unseen. That gap is what lets the
//! streaming path run without a graph.

use crate::core::address::CellAddress;
use crate::core::formula_engine::tokenizer::{tokenize, Token};
use crate::core::formula_engine::FormulaEngine;
use crate::error::SheetcheckResult;
use crate::types::{Finding, IssueCode, Location, Severity};

/// How much of the cycle space a detector can see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleCoverage {
    /// Direct and indirect cycles, across sheets
    Complete,
    /// Only formulas that mention their own address
    SelfReferenceOnly,
}

/// One detected (or suspected) cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCycle {
    /// Sheet of the first member
    pub sheet: String,
    /// Members; entries on another sheet are qualified
    pub cells: Vec<String>,
    /// "A1 → B1 → A1"
    pub chain: String,
}

pub trait CycleDetector {
    fn coverage(&self) -> CycleCoverage;

    /// Called for every formula cell, in row order
    fn observe(&mut self, sheet: &str, address: CellAddress, formula: &str) -> Option<DetectedCycle>;

    /// Cycles only known once every cell has been seen
    fn finish(&mut self) -> SheetcheckResult<Vec<DetectedCycle>>;
}

/// Graph-based detection over a loaded engine
pub struct GraphCycleDetector<'e> {
    engine: &'e FormulaEngine,
}

impl<'e> GraphCycleDetector<'e> {
    pub fn new(engine: &'e FormulaEngine) -> Self {
        Self { engine }
    }
}

impl CycleDetector for GraphCycleDetector<'_> {
    fn coverage(&self) -> CycleCoverage {
        CycleCoverage::Complete
    }

    // The engine already holds the graph
    fn observe(&mut self, _sheet: &str, _address: CellAddress, _formula: &str) -> Option<DetectedCycle> {
        None
    }

    fn finish(&mut self) -> SheetcheckResult<Vec<DetectedCycle>> {
        let cycles = self.engine.detect_circular_references()?;
        Ok(cycles
            .into_iter()
            .filter_map(|cycle| {
                let sheet = cycle.cells.first()?.sheet.clone();
                let cells = cycle
                    .cells
                    .iter()
                    .map(|c| {
                        if c.sheet == sheet {
                            c.address.to_string()
                        } else {
                            c.qualified()
                        }
                    })
                    .collect();
                Some(DetectedCycle {
                    sheet,
                    cells,
                    chain: cycle.chain,
                })
            })
            .collect())
    }
}

/// Text heuristic: the formula names its own address.
///
/// Matches whole reference tokens, so `A10`, `AA1` and `"A1"` in A1 are not
/// self-references while `$A$1` and `Sheet1!A1` on Sheet1 are.
#[derive(Debug, Default)]
pub struct SubstringCycleDetector;

impl SubstringCycleDetector {
    pub fn new() -> Self {
        Self
    }
}

impl CycleDetector for SubstringCycleDetector {
    fn coverage(&self) -> CycleCoverage {
        CycleCoverage::SelfReferenceOnly
    }

    fn observe(&mut self, sheet: &str, address: CellAddress, formula: &str) -> Option<DetectedCycle> {
        if !names_cell(formula, sheet, address) {
            return None;
        }
        let own = address.to_string();
        Some(DetectedCycle {
            sheet: sheet.to_string(),
            cells: vec![own.clone()],
            chain: format!("{own} → {own}"),
        })
    }

    fn finish(&mut self) -> SheetcheckResult<Vec<DetectedCycle>> {
        Ok(Vec::new())
    }
}

/// Whether a reference token in the formula is `address` on `sheet`.
/// Formulas the tokenizer rejects name nothing.
fn names_cell(formula: &str, sheet: &str, address: CellAddress) -> bool {
    let Ok(tokens) = tokenize(formula) else {
        return false;
    };
    tokens.iter().enumerate().any(|(i, token)| {
        let Token::Identifier(text) = token else {
            return false;
        };
        let is_call = matches!(tokens.get(i + 1), Some(Token::OpenParen));
        let on_sheet = match i.checked_sub(1).and_then(|p| tokens.get(p)) {
            Some(Token::SheetPrefix(name)) => name.eq_ignore_ascii_case(sheet),
            _ => true,
        };
        !is_call && on_sheet && CellAddress::parse(text) == Some(address)
    })
}

/// The finding reported for a cycle; suspected cycles say so
pub fn cycle_finding(cycle: DetectedCycle, coverage: CycleCoverage) -> Finding {
    let description = match coverage {
        CycleCoverage::Complete => format!("Circular reference: {}", cycle.chain),
        CycleCoverage::SelfReferenceOnly => format!(
            "Potential circular reference: formula mentions its own cell ({})",
            cycle.chain
        ),
    };
    Finding::new(
        IssueCode::CircularReference,
        Severity::High,
        Location::cells(cycle.sheet, cycle.cells),
        description,
        "Remove the circular reference by restructuring the formulas",
    )
    .with_value(cycle.chain)
}
