//! Schema contracts: field-level type contracts with OBSERVED/FLEXIBLE/FIXED
//! modes, first-row lock, and cross-edge compatibility.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A concrete field type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Bool,
    /// Opaque JSON value; no further structural checking applies.
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Json => "json",
        };
        f.write_str(label)
    }
}

/// Where a field's presence in the contract came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Explicitly declared in configuration.
    Declared,
    /// Learned from an observed row.
    Inferred,
}

/// One column of a schema contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldContract {
    /// Stable, normalized identifier (lowercase, non-alphanumerics
    /// collapsed to underscores).
    pub normalized_name: String,
    /// The header/name as seen in the source.
    pub original_name: String,
    /// The field's declared or inferred type.
    pub field_type: FieldType,
    /// Whether this field must be present on every row.
    pub required: bool,
    /// Whether this field was declared up front or inferred from data.
    pub source: FieldSource,
}

/// Map an arbitrary source header to a stable normalized identifier:
/// lowercase, with runs of non-alphanumeric characters collapsed to a
/// single underscore, and no leading/trailing underscore.
pub fn normalize_field_name(raw: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let pattern = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap());
    let lowered = raw.to_lowercase();
    pattern.replace_all(&lowered, "_").trim_matches('_').to_string()
}

/// Mode governing how a schema contract's field set is determined and
/// enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Closed contract: any extra field at runtime is an error.
    Fixed,
    /// Declared fields have declared types; extra fields pass through.
    Flexible,
    /// The field set is learned from the first accepted row, then locks.
    Observed,
}

/// The configurable, pre-first-row form of a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// How the field set is determined.
    pub mode: SchemaMode,
    /// Declared fields, if any (absent for a pure OBSERVED schema).
    pub fields: Option<Vec<FieldContract>>,
    /// Producer-side promise: fields downstream consumers may rely on.
    /// Must be a subset of `fields` when `fields` is declared.
    pub guaranteed_fields: Vec<String>,
    /// Fields this component adds purely for audit purposes.
    pub audit_fields: Vec<String>,
    /// Consumer-side hard requirement, authoritative for DAG validation.
    pub required_fields: Vec<String>,
}

/// A field-level type contract, ordered and deduplicated by normalized
/// name, with a lock flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContract {
    mode: SchemaMode,
    fields: Vec<FieldContract>,
    locked: bool,
}

impl SchemaContract {
    /// Build a contract from an ordered field list, deduplicating by
    /// normalized name (first occurrence wins).
    pub fn new(mode: SchemaMode, fields: Vec<FieldContract>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let deduped = fields
            .into_iter()
            .filter(|f| seen.insert(f.normalized_name.clone()))
            .collect();
        Self {
            mode,
            fields: deduped,
            locked: false,
        }
    }

    /// The contract's mode.
    pub fn mode(&self) -> SchemaMode {
        self.mode
    }

    /// The ordered, deduplicated field list.
    pub fn fields(&self) -> &[FieldContract] {
        &self.fields
    }

    /// Whether this contract has locked (no further field changes
    /// permitted).
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock the contract. Re-locking an already-locked contract is a bug
    /// (spec §3.4 invariant 6): callers must check `is_locked()` first.
    pub fn lock(&mut self) -> Result<()> {
        if self.locked {
            return Err(Error::ContractAlreadyLocked);
        }
        self.locked = true;
        Ok(())
    }

    /// Fields a producer holding this contract guarantees to a downstream
    /// consumer: in FIXED/FLEXIBLE mode, every declared field; OBSERVED
    /// mode guarantees nothing beyond what is explicitly promised
    /// elsewhere (the DAG validator handles `guaranteed_fields` itself for
    /// the pre-lock case).
    pub fn declared_field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.normalized_name.clone()).collect()
    }

    /// Canonical hash of `(mode, ordered fields, locked)`, used as the
    /// audit key.
    pub fn version_hash(&self) -> Result<String> {
        let value = serde_json::json!({
            "mode": self.mode,
            "fields": self.fields,
            "locked": self.locked,
        });
        Ok(elspeth_hash::stable_hash(&value)?)
    }

    /// Validate a candidate set of field names present on a row against
    /// this contract at a consumer boundary. Structural only: no
    /// coercion happens here.
    pub fn validate_field_presence(&self, present: &[String]) -> Result<()> {
        let present_set: std::collections::HashSet<&str> =
            present.iter().map(String::as_str).collect();

        for field in &self.fields {
            if field.required && !present_set.contains(field.normalized_name.as_str()) {
                return Err(Error::missing_field(field.normalized_name.clone()));
            }
        }

        if self.mode == SchemaMode::Fixed {
            let declared: std::collections::HashSet<&str> =
                self.fields.iter().map(|f| f.normalized_name.as_str()).collect();
            for name in &present_set {
                if !declared.contains(name) {
                    return Err(Error::UnexpectedField {
                        field: (*name).to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, required: bool) -> FieldContract {
        FieldContract {
            normalized_name: name.to_string(),
            original_name: name.to_string(),
            field_type: FieldType::String,
            required,
            source: FieldSource::Declared,
        }
    }

    #[test]
    fn normalizes_arbitrary_headers() {
        assert_eq!(normalize_field_name("User Name"), "user_name");
        assert_eq!(normalize_field_name("  Email-Address!! "), "email_address");
        assert_eq!(normalize_field_name("ALLCAPS"), "allcaps");
    }

    #[test]
    fn dedupes_fields_by_normalized_name_keeping_first() {
        let contract = SchemaContract::new(
            SchemaMode::Flexible,
            vec![field("a", true), field("a", false), field("b", false)],
        );
        assert_eq!(contract.fields().len(), 2);
        assert!(contract.fields()[0].required);
    }

    #[test]
    fn version_hash_is_stable_across_equal_contracts() {
        let a = SchemaContract::new(SchemaMode::Fixed, vec![field("a", true)]);
        let b = SchemaContract::new(SchemaMode::Fixed, vec![field("a", true)]);
        assert_eq!(a.version_hash().unwrap(), b.version_hash().unwrap());
    }

    #[test]
    fn relocking_a_locked_contract_errors() {
        let mut contract = SchemaContract::new(SchemaMode::Observed, vec![]);
        contract.lock().unwrap();
        assert!(matches!(contract.lock(), Err(Error::ContractAlreadyLocked)));
    }

    #[test]
    fn fixed_mode_rejects_extra_fields() {
        let contract = SchemaContract::new(SchemaMode::Fixed, vec![field("a", true)]);
        let err = contract
            .validate_field_presence(&["a".to_string(), "b".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedField { .. }));
    }

    #[test]
    fn flexible_mode_allows_extra_fields() {
        let contract = SchemaContract::new(SchemaMode::Flexible, vec![field("a", true)]);
        assert!(contract
            .validate_field_presence(&["a".to_string(), "b".to_string()])
            .is_ok());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let contract = SchemaContract::new(SchemaMode::Flexible, vec![field("a", true)]);
        let err = contract.validate_field_presence(&[]).unwrap_err();
        assert!(matches!(err, Error::MissingFieldViolation { .. }));
    }
}
