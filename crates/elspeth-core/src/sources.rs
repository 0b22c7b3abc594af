//! Source-boundary quarantine and coercion plumbing (spec §4.10, §4.7).
//!
//! This is the only place a `Tier3Row` is produced from truly external
//! bytes, and the only place `coerce_row` is called from within this
//! crate's own built-in sources — everything downstream only ever sees a
//! `PipelineRow`.

use crate::contract::{normalize_field_name, FieldContract, FieldSource, FieldType, SchemaContract, SchemaMode};
use crate::model::ValidationError;
use crate::row::{coerce_row, PipelineRow, Tier3Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single line's outcome from a source's `load`.
pub enum LoadOutcome {
    /// A row that coerced and validated successfully.
    Row(PipelineRow),
    /// A row rejected at the boundary; never enters the pipeline.
    Quarantined(QuarantineDetail),
}

/// Detail recorded for a quarantined row (feeds
/// `ctx.record_validation_error`).
pub struct QuarantineDetail {
    /// The offending raw payload, serialized for the audit record.
    pub row_data: Value,
    /// Human-readable explanation.
    pub error: String,
    /// `"parse"` for malformed input, or the contract's mode name for a
    /// structural rejection.
    pub schema_mode: String,
    /// `"discard"` or a configured quarantine sink's name.
    pub destination: String,
}

impl QuarantineDetail {
    /// Turn this detail into a persistable `ValidationError`, given the
    /// identifiers the recorder needs.
    pub fn into_validation_error(
        self,
        error_id: crate::ids::ValidationErrorId,
        run_id: crate::ids::RunId,
        node_id: crate::ids::NodeId,
    ) -> ValidationError {
        ValidationError {
            error_id,
            run_id,
            node_id,
            row_data: self.row_data,
            error: self.error,
            schema_mode: self.schema_mode,
            destination: self.destination,
            contract_violation: None,
        }
    }
}

fn infer_field_type(value: &Value) -> FieldType {
    match value {
        Value::String(_) => FieldType::String,
        Value::Bool(_) => FieldType::Bool,
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Int,
        Value::Number(_) => FieldType::Float,
        _ => FieldType::Json,
    }
}

fn object_to_tier3(object: &serde_json::Map<String, Value>) -> Tier3Row {
    Tier3Row::new(object.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// A JSON-Lines source: one JSON object per line, OBSERVED schema, first
/// accepted row locks the contract.
///
/// Resolves the "dynamic source's first row is structurally invalid" open
/// question: a line that fails to even parse is quarantined with no
/// contract produced yet; the contract is built and locked from whichever
/// line is the *first successfully parsed* one.
pub struct JsonLinesSource {
    contract: Option<Arc<SchemaContract>>,
    row_index: u64,
}

impl JsonLinesSource {
    /// A fresh source with no contract yet observed.
    pub fn new() -> Self {
        Self {
            contract: None,
            row_index: 0,
        }
    }

    /// The locked contract, if the first valid row has been observed.
    pub fn schema_contract(&self) -> Option<Arc<SchemaContract>> {
        self.contract.clone()
    }

    /// Process one line of input.
    ///
    /// `serde_json`'s parser already rejects the bare `NaN`/`Infinity`/
    /// `-Infinity` tokens a line might contain (they are not valid JSON),
    /// so a malformed-number line surfaces here as an ordinary parse
    /// error and is quarantined exactly like any other malformed line.
    /// The quarantine message is rewritten to name the offending literal
    /// token explicitly, since `serde_json`'s own message ("expected
    /// value") does not mention it.
    pub fn load_line(&mut self, line: &str) -> LoadOutcome {
        self.row_index += 1;

        let parsed: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                let error = match non_finite_token(line) {
                    Some(token) => format!("JSON parse error: literal `{token}` is not a valid JSON number ({err})"),
                    None => format!("JSON parse error: {err}"),
                };
                return LoadOutcome::Quarantined(QuarantineDetail {
                    row_data: Value::String(line.to_string()),
                    error,
                    schema_mode: "parse".to_string(),
                    destination: "discard".to_string(),
                });
            }
        };

        let Value::Object(object) = &parsed else {
            return LoadOutcome::Quarantined(QuarantineDetail {
                row_data: parsed,
                error: "top-level JSON value must be an object".to_string(),
                schema_mode: "parse".to_string(),
                destination: "discard".to_string(),
            });
        };

        let contract = match &self.contract {
            Some(existing) => Arc::clone(existing),
            None => {
                let fields = object
                    .iter()
                    .map(|(name, value)| FieldContract {
                        normalized_name: normalize_field_name(name),
                        original_name: name.clone(),
                        field_type: infer_field_type(value),
                        required: true,
                        source: FieldSource::Inferred,
                    })
                    .collect();
                let mut contract = SchemaContract::new(SchemaMode::Observed, fields);
                contract
                    .lock()
                    .expect("a freshly-built contract is never already locked");
                let contract = Arc::new(contract);
                self.contract = Some(Arc::clone(&contract));
                contract
            }
        };

        let raw = object_to_tier3(object);
        match coerce_row(&raw, &contract) {
            Ok(row) => LoadOutcome::Row(row),
            Err(err) => LoadOutcome::Quarantined(QuarantineDetail {
                row_data: parsed,
                error: err.to_string(),
                schema_mode: "observed".to_string(),
                destination: "discard".to_string(),
            }),
        }
    }
}

impl Default for JsonLinesSource {
    fn default() -> Self {
        Self::new()
    }
}

/// If `line` contains one of the literal non-finite number tokens JSON
/// forbids (`NaN`, `Infinity`, `-Infinity`), return it. Checked as a
/// bare substring, not a proper tokenizer, so a quoted string value that
/// happens to contain the text would also match.
fn non_finite_token(line: &str) -> Option<&'static str> {
    if line.contains("-Infinity") {
        Some("-Infinity")
    } else if line.contains("Infinity") {
        Some("Infinity")
    } else if line.contains("NaN") {
        Some("NaN")
    } else {
        None
    }
}

/// A CSV source: parses rows against a FIXED or FLEXIBLE header-derived
/// contract, quarantining rows whose column count does not match the
/// header.
pub struct CsvSource {
    contract: Arc<SchemaContract>,
    row_index: u64,
}

impl CsvSource {
    /// Build a source from an already-parsed header row (field names in
    /// column order).
    pub fn from_header(header: &[String], mode: SchemaMode) -> Self {
        let fields = header
            .iter()
            .map(|name| FieldContract {
                normalized_name: normalize_field_name(name),
                original_name: name.clone(),
                field_type: FieldType::String,
                required: true,
                source: FieldSource::Declared,
            })
            .collect();
        Self {
            contract: Arc::new(SchemaContract::new(mode, fields)),
            row_index: 0,
        }
    }

    /// The (never-absent, header-derived) contract this source uses.
    pub fn schema_contract(&self) -> Arc<SchemaContract> {
        Arc::clone(&self.contract)
    }

    /// Process one parsed CSV record (already split into cells, in header
    /// order).
    pub fn load_record(&mut self, cells: &[String]) -> LoadOutcome {
        self.row_index += 1;
        let header_len = self.contract.fields().len();

        if cells.len() != header_len {
            return LoadOutcome::Quarantined(QuarantineDetail {
                row_data: Value::Array(cells.iter().cloned().map(Value::String).collect()),
                error: format!("expected {header_len} columns, found {}", cells.len()),
                schema_mode: "parse".to_string(),
                destination: "discard".to_string(),
            });
        }

        let raw = Tier3Row::new(
            self.contract
                .fields()
                .iter()
                .zip(cells.iter())
                .map(|(field, cell)| (field.original_name.clone(), Value::String(cell.clone())))
                .collect::<BTreeMap<_, _>>(),
        );

        match coerce_row(&raw, &self.contract) {
            Ok(row) => LoadOutcome::Row(row),
            Err(err) => LoadOutcome::Quarantined(QuarantineDetail {
                row_data: Value::Array(cells.iter().cloned().map(Value::String).collect()),
                error: err.to_string(),
                schema_mode: "fixed".to_string(),
                destination: "discard".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_valid_line_locks_the_contract() {
        let mut source = JsonLinesSource::new();
        assert!(source.schema_contract().is_none());
        match source.load_line(r#"{"id": 1, "name": "a"}"#) {
            LoadOutcome::Row(_) => {}
            LoadOutcome::Quarantined(_) => panic!("expected a valid row"),
        }
        let contract = source.schema_contract().expect("contract should now be locked");
        assert!(contract.is_locked());
    }

    #[test]
    fn malformed_first_line_quarantines_without_locking_a_contract() {
        let mut source = JsonLinesSource::new();
        match source.load_line("{not valid json") {
            LoadOutcome::Quarantined(detail) => assert_eq!(detail.schema_mode, "parse"),
            LoadOutcome::Row(_) => panic!("expected quarantine"),
        }
        assert!(
            source.schema_contract().is_none(),
            "no contract should be locked until the first row actually parses"
        );

        match source.load_line(r#"{"id": 2}"#) {
            LoadOutcome::Row(_) => {}
            LoadOutcome::Quarantined(_) => panic!("second, valid row should lock the contract"),
        }
        assert!(source.schema_contract().is_some());
    }

    #[test]
    fn literal_non_finite_token_is_rejected_as_a_parse_error() {
        let mut source = JsonLinesSource::new();
        match source.load_line(r#"{"id":1,"value":NaN}"#) {
            LoadOutcome::Quarantined(detail) => {
                assert_eq!(detail.schema_mode, "parse");
                assert!(detail.error.contains("NaN"), "error should name the offending token: {}", detail.error);
            }
            LoadOutcome::Row(_) => panic!("NaN must never enter the pipeline"),
        }
    }

    #[test]
    fn csv_source_quarantines_wrong_column_count() {
        let mut source = CsvSource::from_header(&["id".to_string(), "name".to_string()], SchemaMode::Fixed);
        match source.load_record(&["1".to_string()]) {
            LoadOutcome::Quarantined(detail) => assert_eq!(detail.schema_mode, "parse"),
            LoadOutcome::Row(_) => panic!("expected a column-count quarantine"),
        }
    }

    #[test]
    fn csv_source_accepts_matching_rows() {
        let mut source = CsvSource::from_header(&["id".to_string(), "name".to_string()], SchemaMode::Fixed);
        match source.load_record(&["1".to_string(), "alice".to_string()]) {
            LoadOutcome::Row(row) => assert_eq!(row.get("name"), Some(&Value::String("alice".to_string()))),
            LoadOutcome::Quarantined(_) => panic!("expected a valid row"),
        }
    }
}
