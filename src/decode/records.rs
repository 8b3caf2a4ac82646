//! Bulk result CSV reading
//!
//! Result files are read record by record so a partition of any size never
//! has to fit in memory.

use crate::error::{Error, Result};
use crate::types::JsonObject;
use serde_json::Value;
use std::borrow::Cow;
use std::io::Read;

/// Header line the platform writes instead of data when a batch matched nothing
pub const NO_RECORDS_HEADER: &str = "Records not found for this query";

/// Streaming iterator over the rows of one result CSV
pub struct CsvRecords<R: Read> {
    reader: csv::Reader<R>,
    headers: csv::StringRecord,
    row: csv::StringRecord,
    no_records: bool,
}

impl<R: Read> CsvRecords<R> {
    /// Read the header row and prepare to stream records
    pub fn new(input: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(input);

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(Error::decode("result CSV is empty"));
        }
        let no_records = headers.len() == 1 && headers[0].trim() == NO_RECORDS_HEADER;

        Ok(Self {
            reader,
            headers,
            row: csv::StringRecord::new(),
            no_records,
        })
    }

    /// Column names
    pub fn headers(&self) -> Vec<&str> {
        if self.no_records {
            return Vec::new();
        }
        self.headers.iter().collect()
    }
}

impl<R: Read> Iterator for CsvRecords<R> {
    type Item = Result<JsonObject>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.no_records {
            return None;
        }
        match self.reader.read_record(&mut self.row) {
            Ok(true) => Some(Ok(row_to_object(&self.headers, &self.row))),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Empty cells become `null`, everything else stays a string
fn row_to_object(headers: &csv::StringRecord, row: &csv::StringRecord) -> JsonObject {
    headers
        .iter()
        .zip(row.iter())
        .map(|(name, cell)| {
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            (name.to_string(), value)
        })
        .collect()
}

/// Remove NUL bytes, which the platform occasionally emits inside result files
pub fn strip_nul(chunk: &[u8]) -> Cow<'_, [u8]> {
    if chunk.contains(&0) {
        Cow::Owned(chunk.iter().copied().filter(|b| *b != 0).collect())
    } else {
        Cow::Borrowed(chunk)
    }
}
