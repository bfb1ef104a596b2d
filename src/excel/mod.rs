//! Workbook readers
//!
//! - `ExcelImporter`: loads a whole .xlsx into a `SpreadsheetDocument` (calamine)
//! - `StreamReader`: pulls one row at a time from each sheet part (zip + quick-xml)

mod importer;
mod stream_reader;

pub use importer::{ExcelImporter, ImportedWorkbook};
pub use stream_reader::{is_date_format, RowReader, SheetEntry, StreamReader, StreamRow};
