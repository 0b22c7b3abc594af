//! The three-tier trust boundary's row types.
//!
//! `Tier3Row` is raw, untrusted data as it arrives from a source. The only
//! function able to turn one into a `PipelineRow` is [`coerce_row`], which
//! lives in this module precisely so that no other crate, and no transform
//! or sink, has a code path that accepts a `Tier3Row` at all. Coercion
//! happening "only at sources" is therefore a compile-time property, not a
//! convention a reviewer has to police.

use crate::contract::{FieldType, SchemaContract};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Raw, untrusted data as read from a source: CSV cells, a parsed JSON
/// object, an LLM response fragment. Field names are whatever the source
/// handed back, not yet normalized.
#[derive(Debug, Clone, Default)]
pub struct Tier3Row {
    fields: BTreeMap<String, Value>,
}

impl Tier3Row {
    /// Build a raw row from a field map.
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    /// Read a raw field by its original (non-normalized) name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Iterate over the raw fields.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

/// A Tier 2, fully coerced row paired with the `SchemaContract` every row
/// from this source shares. Trusted: no further coercion is ever applied
/// to a `PipelineRow`.
#[derive(Debug, Clone)]
pub struct PipelineRow {
    fields: BTreeMap<String, Value>,
    contract: Arc<SchemaContract>,
}

impl PipelineRow {
    /// The contract instance every row produced by the same invocation
    /// must share (checked as an invariant by callers that emit multiple
    /// rows from one transform call).
    pub fn contract(&self) -> &Arc<SchemaContract> {
        &self.contract
    }

    /// A defensive copy of this row's fields.
    pub fn to_dict(&self) -> BTreeMap<String, Value> {
        self.fields.clone()
    }

    /// Read a single field by its normalized name.
    pub fn get(&self, normalized_name: &str) -> Option<&Value> {
        self.fields.get(normalized_name)
    }

    /// The set of normalized field names actually present on this row.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

/// Coerce a raw Tier 3 row into a Tier 2 `PipelineRow` against `contract`.
///
/// Permitted conversions: string → int/float/bool (`"true"`/`"false"`,
/// case-insensitive). Empty strings never become numeric types. Any other
/// failure to coerce, or a missing required field, returns an error the
/// caller is expected to turn into a quarantine.
pub fn coerce_row(raw: &Tier3Row, contract: &Arc<SchemaContract>) -> Result<PipelineRow> {
    let mut fields = BTreeMap::new();

    for field in contract.fields() {
        let raw_value = raw.get(&field.original_name).or_else(|| raw.get(&field.normalized_name));
        match raw_value {
            Some(value) => {
                let coerced = coerce_scalar(value, field.field_type)?;
                fields.insert(field.normalized_name.clone(), coerced);
            }
            None => {
                if field.required {
                    return Err(Error::missing_field(field.normalized_name.clone()));
                }
            }
        }
    }

    if contract.mode() != crate::contract::SchemaMode::Fixed {
        let declared: std::collections::HashSet<&str> =
            contract.fields().iter().map(|f| f.original_name.as_str()).collect();
        for (name, value) in raw.iter() {
            if !declared.contains(name.as_str()) {
                fields.insert(crate::contract::normalize_field_name(name), value.clone());
            }
        }
    }

    Ok(PipelineRow {
        fields,
        contract: Arc::clone(contract),
    })
}

fn coerce_scalar(value: &Value, target: FieldType) -> Result<Value> {
    match target {
        FieldType::Json => Ok(value.clone()),
        FieldType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(Error::coercion_failed(value.to_string(), "string")),
        },
        FieldType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => {
                if s.is_empty() {
                    return Err(Error::coercion_failed(s.clone(), "int"));
                }
                s.trim()
                    .parse::<i64>()
                    .map(|parsed| Value::Number(parsed.into()))
                    .map_err(|_| Error::coercion_failed(s.clone(), "int"))
            }
            _ => Err(Error::coercion_failed(value.to_string(), "int")),
        },
        FieldType::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => {
                if s.is_empty() {
                    return Err(Error::coercion_failed(s.clone(), "float"));
                }
                let parsed: f64 = s
                    .trim()
                    .parse()
                    .map_err(|_| Error::coercion_failed(s.clone(), "float"))?;
                if !parsed.is_finite() {
                    return Err(Error::coercion_failed(s.clone(), "float"));
                }
                serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| Error::coercion_failed(s.clone(), "float"))
            }
            _ => Err(Error::coercion_failed(value.to_string(), "float")),
        },
        FieldType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(Error::coercion_failed(s.clone(), "bool")),
            },
            _ => Err(Error::coercion_failed(value.to_string(), "bool")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{FieldContract, FieldSource, SchemaMode};
    use serde_json::json;

    fn contract_with(fields: Vec<(&str, FieldType, bool)>, mode: SchemaMode) -> Arc<SchemaContract> {
        let fields = fields
            .into_iter()
            .map(|(name, ty, required)| FieldContract {
                normalized_name: name.to_string(),
                original_name: name.to_string(),
                field_type: ty,
                required,
                source: FieldSource::Declared,
            })
            .collect();
        Arc::new(SchemaContract::new(mode, fields))
    }

    #[test]
    fn coerces_string_to_int() {
        let contract = contract_with(vec![("count", FieldType::Int, true)], SchemaMode::Fixed);
        let raw = Tier3Row::new(BTreeMap::from([("count".to_string(), json!("42"))]));
        let row = coerce_row(&raw, &contract).unwrap();
        assert_eq!(row.get("count"), Some(&json!(42)));
    }

    #[test]
    fn empty_string_cannot_become_numeric() {
        let contract = contract_with(vec![("count", FieldType::Int, true)], SchemaMode::Fixed);
        let raw = Tier3Row::new(BTreeMap::from([("count".to_string(), json!(""))]));
        assert!(coerce_row(&raw, &contract).is_err());
    }

    #[test]
    fn coerces_case_insensitive_bool() {
        let contract = contract_with(vec![("active", FieldType::Bool, true)], SchemaMode::Fixed);
        let raw = Tier3Row::new(BTreeMap::from([("active".to_string(), json!("TRUE"))]));
        let row = coerce_row(&raw, &contract).unwrap();
        assert_eq!(row.get("active"), Some(&json!(true)));
    }

    #[test]
    fn missing_required_field_errors() {
        let contract = contract_with(vec![("id", FieldType::String, true)], SchemaMode::Fixed);
        let raw = Tier3Row::new(BTreeMap::new());
        assert!(coerce_row(&raw, &contract).is_err());
    }

    #[test]
    fn flexible_mode_carries_through_undeclared_fields() {
        let contract = contract_with(vec![("id", FieldType::String, true)], SchemaMode::Flexible);
        let raw = Tier3Row::new(BTreeMap::from([
            ("id".to_string(), json!("a")),
            ("Extra Field".to_string(), json!("b")),
        ]));
        let row = coerce_row(&raw, &contract).unwrap();
        assert_eq!(row.get("extra_field"), Some(&json!("b")));
    }

    #[test]
    fn to_dict_is_a_defensive_copy() {
        let contract = contract_with(vec![("id", FieldType::String, true)], SchemaMode::Fixed);
        let raw = Tier3Row::new(BTreeMap::from([("id".to_string(), json!("a"))]));
        let row = coerce_row(&raw, &contract).unwrap();
        let mut copy = row.to_dict();
        copy.insert("id".to_string(), json!("mutated"));
        assert_eq!(row.get("id"), Some(&json!("a")));
    }
}
