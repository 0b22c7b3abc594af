//! I/O-facing `Source` adapters (spec §4.10): these own a reader and a
//! `csv`/line cursor, and delegate per-row quarantine and OBSERVED-mode
//! contract locking to `elspeth_core::sources`, which is the only place
//! that logic lives.

use elspeth_core::contract::{SchemaContract, SchemaMode};
use elspeth_core::plugin::Source;
use elspeth_core::row::Tier3Row;
use elspeth_core::sources::{CsvSource as CoreCsvSource, JsonLinesSource as CoreJsonLinesSource, LoadOutcome, QuarantineDetail};
use async_trait::async_trait;
use std::io::BufRead;
use std::sync::Arc;

/// A CSV file: the header row fixes the contract up front, so it locks
/// immediately rather than waiting on the first accepted row.
pub struct CsvFileSource<R> {
    reader: csv::Reader<R>,
    inner: CoreCsvSource,
    quarantine: Vec<QuarantineDetail>,
}

impl<R: std::io::Read> CsvFileSource<R> {
    /// Build a source from `reader`, inferring a FLEXIBLE-mode contract
    /// from the header row.
    pub fn new(reader: R) -> std::result::Result<Self, csv::Error> {
        Self::with_mode(reader, SchemaMode::Flexible)
    }

    /// Build a source with an explicit schema mode (FIXED rejects any
    /// field beyond the header; FLEXIBLE never does).
    pub fn with_mode(reader: R, mode: SchemaMode) -> std::result::Result<Self, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let header: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self {
            reader: csv_reader,
            inner: CoreCsvSource::from_header(&header, mode),
            quarantine: Vec::new(),
        })
    }

    /// Drain quarantined rows accumulated since the last call.
    pub fn take_quarantine(&mut self) -> Vec<QuarantineDetail> {
        std::mem::take(&mut self.quarantine)
    }
}

#[async_trait]
impl<R: std::io::Read + Send> Source for CsvFileSource<R> {
    async fn next_raw(&mut self) -> Option<Tier3Row> {
        loop {
            let mut record = csv::StringRecord::new();
            match self.reader.read_record(&mut record) {
                Ok(false) => return None,
                Err(err) => {
                    self.quarantine.push(QuarantineDetail {
                        row_data: serde_json::Value::Null,
                        error: err.to_string(),
                        schema_mode: "parse".to_string(),
                        destination: "discard".to_string(),
                    });
                    continue;
                }
                Ok(true) => {
                    let cells: Vec<String> = record.iter().map(str::to_string).collect();
                    match self.inner.load_record(&cells) {
                        LoadOutcome::Row(row) => return Some(Tier3Row::new(row.to_dict())),
                        LoadOutcome::Quarantined(detail) => {
                            self.quarantine.push(detail);
                            continue;
                        }
                    }
                }
            }
        }
    }

    fn schema_contract(&self) -> Option<Arc<SchemaContract>> {
        Some(self.inner.schema_contract())
    }
}

/// A JSONL file: one JSON object per line, OBSERVED schema that locks
/// against the first successfully parsed line.
pub struct JsonLinesFileSource<R> {
    lines: std::io::Lines<std::io::BufReader<R>>,
    inner: CoreJsonLinesSource,
    quarantine: Vec<QuarantineDetail>,
}

impl<R: std::io::Read> JsonLinesFileSource<R> {
    /// Build a source reading one JSON object per non-blank line of
    /// `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            lines: std::io::BufReader::new(reader).lines(),
            inner: CoreJsonLinesSource::new(),
            quarantine: Vec::new(),
        }
    }

    /// Drain quarantined rows accumulated since the last call.
    pub fn take_quarantine(&mut self) -> Vec<QuarantineDetail> {
        std::mem::take(&mut self.quarantine)
    }
}

#[async_trait]
impl<R: std::io::Read + Send> Source for JsonLinesFileSource<R> {
    async fn next_raw(&mut self) -> Option<Tier3Row> {
        loop {
            let line = self.lines.next()?;
            let Ok(line) = line else {
                self.quarantine.push(QuarantineDetail {
                    row_data: serde_json::Value::Null,
                    error: "I/O error reading line".to_string(),
                    schema_mode: "parse".to_string(),
                    destination: "discard".to_string(),
                });
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            match self.inner.load_line(&line) {
                LoadOutcome::Row(row) => return Some(Tier3Row::new(row.to_dict())),
                LoadOutcome::Quarantined(detail) => {
                    self.quarantine.push(detail);
                    continue;
                }
            }
        }
    }

    fn schema_contract(&self) -> Option<Arc<SchemaContract>> {
        self.inner.schema_contract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn csv_file_source_locks_contract_from_header() {
        let data = "id,name\n1,alice\n2,bob\n";
        let mut source = CsvFileSource::new(std::io::Cursor::new(data)).unwrap();
        assert!(source.schema_contract().unwrap().is_locked());

        let first = source.next_raw().await.unwrap();
        assert_eq!(first.get("id"), Some(&serde_json::json!("1")));
        let second = source.next_raw().await.unwrap();
        assert_eq!(second.get("name"), Some(&serde_json::json!("bob")));
        assert!(source.next_raw().await.is_none());
    }

    #[tokio::test]
    async fn csv_file_source_quarantines_ragged_rows() {
        let data = "id,name\n1,alice\n2\n3,charlie\n";
        let mut source = CsvFileSource::new(std::io::Cursor::new(data)).unwrap();
        let mut accepted = 0;
        while source.next_raw().await.is_some() {
            accepted += 1;
        }
        assert_eq!(accepted, 2);
        assert_eq!(source.take_quarantine().len(), 1);
    }

    #[tokio::test]
    async fn jsonl_file_source_locks_on_first_valid_line() {
        let data = "not json\n{\"id\": 1, \"score\": 1.5}\n{\"id\": 2, \"score\": 2.5}\n";
        let mut source = JsonLinesFileSource::new(std::io::Cursor::new(data));
        assert!(source.schema_contract().is_none());

        let first = source.next_raw().await.unwrap();
        assert_eq!(first.get("id"), Some(&serde_json::json!(1)));
        assert_eq!(source.take_quarantine().len(), 1);

        let contract = source.schema_contract().unwrap();
        assert!(contract.is_locked());
        assert_eq!(contract.mode(), SchemaMode::Observed);
    }
}
