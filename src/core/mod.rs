//! Core building blocks: cell addresses, date serials and the formula engine

pub mod address;
pub mod dates;
pub mod formula_engine;

pub use address::CellAddress;
pub use formula_engine::FormulaEngine;
