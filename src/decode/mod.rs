//! Response decoder module
//!
//! Supports: XML (Bulk API batch and result listings), CSV (Bulk API results)
//!
//! JSON bodies go straight through serde and need nothing here.

mod records;
mod xml;

pub use records::{strip_nul, CsvRecords, NO_RECORDS_HEADER};
pub use xml::{as_list, xml_to_json};
