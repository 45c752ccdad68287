//! Schema support for structured data.
//!
//! Every kind of schema we accept is converted to a JSON Schema and checked
//! with the `jsonschema` crate. Validation never fails a document. It only
//! records facts in a [`SchemaResult`].

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde_json::{Map, Number};

use crate::{
    engine::fields::{FieldName, StructuredData},
    errors::AssessError,
    prelude::*,
};

/// A schema for the structured data of a document.
#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(untagged, deny_unknown_fields, rename_all = "snake_case")]
pub enum Schema {
    /// One of our built-in document schemas.
    Preset {
        /// Which schema to use.
        preset: SchemaPreset,
    },

    /// An arbitrary JSON Schema, applied to an object containing every field
    /// with a value.
    JsonSchema {
        /// The JSON Schema itself.
        json_schema: Value,
    },

    /// A list of required fields, with optional value types.
    Required {
        /// Fields which must have a value.
        required: Vec<FieldName>,

        /// Expected types of field values. Values are strings, but a field
        /// declared as a number must parse as one.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        types: BTreeMap<FieldName, ScalarType>,
    },
}

/// A schema as received over the wire: either already parsed, or as a JSON
/// string which may not parse at all.
#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SchemaInput {
    Parsed(Schema),
    Raw(String),
}

impl From<Schema> for SchemaInput {
    fn from(schema: Schema) -> Self {
        SchemaInput::Parsed(schema)
    }
}

/// Built-in document schemas.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPreset {
    /// Requires `name`.
    PersonDocument,
    /// Requires `amount` and `date`.
    FinancialDocument,
    /// Requires `name` and `passport`.
    IdentityDocument,
}

/// Basic types we support.
#[derive(Debug, Default, Clone, Copy, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum ScalarType {
    /// A string.
    #[default]
    String,

    /// A number.
    Number,

    /// A boolean.
    Boolean,
}

/// Convert to a JSON Schema.
pub trait ToJsonSchema {
    /// Convert this schema to a JSON Schema.
    fn to_json_schema(&self) -> Value;
}

impl ToJsonSchema for Schema {
    fn to_json_schema(&self) -> Value {
        match self {
            Schema::Preset { preset } => preset.to_json_schema(),
            Schema::JsonSchema { json_schema } => json_schema.clone(),
            Schema::Required { required, types } => {
                let properties = types
                    .iter()
                    .map(|(field, ty)| (field.to_string(), json!({ "type": ty.to_json_schema() })))
                    .collect::<Map<_, _>>();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
                })
            }
        }
    }
}

const DATE_PATTERN: &str = r"^\d{1,2}[./]\d{1,2}[./]\d{2,4}$";

impl ToJsonSchema for SchemaPreset {
    fn to_json_schema(&self) -> Value {
        match self {
            SchemaPreset::PersonDocument => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "date": { "type": "string", "pattern": DATE_PATTERN },
                    "phone": { "type": "string", "pattern": r"^[+]?[0-9\s\-\(\)]+$" },
                    "email": { "type": "string", "format": "email" },
                },
                "required": ["name"],
            }),
            SchemaPreset::FinancialDocument => json!({
                "type": "object",
                "properties": {
                    "amount": { "type": "string", "pattern": r"^\d+(?:[.,]\d+)?$" },
                    "date": { "type": "string", "pattern": DATE_PATTERN },
                    "inn": { "type": "string", "pattern": r"^\d{10,12}$" },
                },
                "required": ["amount", "date"],
            }),
            SchemaPreset::IdentityDocument => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "passport": { "type": "string", "pattern": r"^\d{4}\s*\d{6}$" },
                    "date": { "type": "string", "pattern": DATE_PATTERN },
                },
                "required": ["name", "passport"],
            }),
        }
    }
}

impl ToJsonSchema for ScalarType {
    fn to_json_schema(&self) -> Value {
        let r#type = match self {
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Boolean => "boolean",
        };
        Value::String(r#type.to_string())
    }
}

/// The outcome of checking structured data against a schema.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct SchemaResult {
    /// Was the structured data, and any schema we were given, valid JSON?
    pub json_validity: bool,

    /// Did the structured data satisfy the schema?
    pub schema_consistency: bool,

    /// Required keys with no value.
    pub missing_keys: BTreeSet<String>,
}

impl SchemaResult {
    fn consistent() -> Self {
        Self {
            json_validity: true,
            schema_consistency: true,
            missing_keys: BTreeSet::new(),
        }
    }
}

/// A compiled schema, ready to check documents.
pub struct SchemaValidator {
    state: ValidatorState,
}

enum ValidatorState {
    /// Nothing to check against.
    NoSchema,

    /// We were sent a schema string which didn't parse.
    Unparseable,

    Compiled {
        schema: Value,
        validator: jsonschema::Validator,
    },
}

impl SchemaValidator {
    /// Compile `input`. A JSON Schema which can't be compiled is an input
    /// error, as is a raw schema string holding JSON in no schema form. A raw
    /// string which isn't JSON at all is not an error.
    pub fn new(input: Option<&SchemaInput>) -> Result<Self, AssessError> {
        let schema = match input {
            None => {
                return Ok(Self {
                    state: ValidatorState::NoSchema,
                });
            }
            Some(SchemaInput::Parsed(schema)) => schema.clone(),
            Some(SchemaInput::Raw(raw)) => {
                let value = match serde_json::from_str::<Value>(raw) {
                    Ok(value) => value,
                    Err(err) => {
                        debug!(%err, "Could not parse schema string");
                        return Ok(Self {
                            state: ValidatorState::Unparseable,
                        });
                    }
                };
                // Valid JSON which isn't a schema is treated like a bad
                // schema object.
                serde_json::from_value::<Schema>(value)
                    .map_err(|err| AssessError::input(format!("invalid schema: {err}")))?
            }
        };

        let schema = schema.to_json_schema();
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(&schema)
            .map_err(|err| AssessError::input(format!("invalid JSON Schema: {err}")))?;
        Ok(Self {
            state: ValidatorState::Compiled { schema, validator },
        })
    }

    /// Check `data` against our schema.
    pub fn check(&self, data: &StructuredData) -> SchemaResult {
        let (schema, validator) = match &self.state {
            ValidatorState::NoSchema => return SchemaResult::consistent(),
            ValidatorState::Unparseable => {
                return SchemaResult {
                    json_validity: false,
                    schema_consistency: false,
                    missing_keys: BTreeSet::new(),
                };
            }
            ValidatorState::Compiled { schema, validator } => (schema, validator),
        };

        let instance = instance_for(schema, data);
        let missing_keys = schema["required"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|key| !instance.contains_key(*key))
            .map(str::to_owned)
            .collect::<BTreeSet<_>>();
        let instance = Value::Object(instance);
        for err in validator.iter_errors(&instance) {
            debug!(%err, path = %err.instance_path, "Schema mismatch");
        }
        SchemaResult {
            json_validity: true,
            schema_consistency: validator.is_valid(&instance),
            missing_keys,
        }
    }
}

/// Build the object we validate: every field with a value, converted to the
/// type the schema declares for it when that conversion succeeds.
fn instance_for(schema: &Value, data: &StructuredData) -> Map<String, Value> {
    data.iter()
        .filter_map(|(field, extracted)| {
            let value = extracted.value.as_deref()?;
            let key = field.as_str();
            let declared = schema["properties"][key]["type"].as_str();
            Some((key.to_owned(), typed_value(value, declared)))
        })
        .collect()
}

fn typed_value(value: &str, declared: Option<&str>) -> Value {
    match declared {
        Some("number") | Some("integer") => value
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(|n| {
                // Keep integers integral so `"type": "integer"` can match.
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Value::from(f as i64)
                    }
                    _ => Value::Number(n),
                }
            })
            .unwrap_or_else(|| Value::String(value.to_owned())),
        Some("boolean") => match value.to_lowercase().as_str() {
            "true" | "yes" | "да" => Value::Bool(true),
            "false" | "no" | "нет" => Value::Bool(false),
            _ => Value::String(value.to_owned()),
        },
        _ => Value::String(value.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fields::ExtractedField;

    fn data(pairs: &[(FieldName, Option<&str>)]) -> StructuredData {
        pairs
            .iter()
            .map(|&(field, value)| {
                (
                    field,
                    ExtractedField {
                        value: value.map(str::to_owned),
                        confidence: 0.8,
                    },
                )
            })
            .collect()
    }

    fn validator(schema: Value) -> SchemaValidator {
        let input: SchemaInput = serde_json::from_value(schema).unwrap();
        SchemaValidator::new(Some(&input)).unwrap()
    }

    #[test]
    fn parses_every_schema_form() {
        let parse = |v: Value| serde_json::from_value::<SchemaInput>(v).unwrap();
        assert_eq!(
            parse(json!({ "preset": "identity_document" })),
            SchemaInput::Parsed(Schema::Preset {
                preset: SchemaPreset::IdentityDocument
            })
        );
        assert!(matches!(
            parse(json!({ "required": ["name"], "types": { "amount": "number" } })),
            SchemaInput::Parsed(Schema::Required { .. })
        ));
        assert!(matches!(
            parse(json!({ "json_schema": { "type": "object" } })),
            SchemaInput::Parsed(Schema::JsonSchema { .. })
        ));
        assert!(matches!(parse(json!("{oops")), SchemaInput::Raw(_)));
    }

    #[test]
    fn no_schema_is_consistent() {
        let result = SchemaValidator::new(None)
            .unwrap()
            .check(&data(&[(FieldName::Name, None)]));
        assert_eq!(result, SchemaResult::consistent());
    }

    #[test]
    fn missing_required_key() {
        let result = validator(json!({ "required": ["name", "date"] })).check(&data(&[
            (FieldName::Name, Some("Иван Иванов")),
            (FieldName::Date, None),
        ]));
        assert!(result.json_validity);
        assert!(!result.schema_consistency);
        assert_eq!(result.missing_keys, BTreeSet::from(["date".to_owned()]));
    }

    #[test]
    fn checks_declared_types() {
        let schema = json!({ "required": ["amount"], "types": { "amount": "number" } });
        let ok = validator(schema.clone()).check(&data(&[(FieldName::Amount, Some("1500.50"))]));
        assert!(ok.schema_consistency);

        let bad = validator(schema).check(&data(&[(FieldName::Amount, Some("полторы тысячи"))]));
        assert!(!bad.schema_consistency);
        assert!(bad.missing_keys.is_empty());
    }

    #[test]
    fn presets_check_patterns() {
        let financial = validator(json!({ "preset": "financial_document" }));
        let ok = financial.check(&data(&[
            (FieldName::Amount, Some("1500.50")),
            (FieldName::Date, Some("01.01.2023")),
        ]));
        assert!(ok.schema_consistency);

        let bad = financial.check(&data(&[
            (FieldName::Amount, Some("1500.50")),
            (FieldName::Date, Some("2023-01-01")),
        ]));
        assert!(!bad.schema_consistency);
        assert!(bad.missing_keys.is_empty());
    }

    #[test]
    fn raw_schema_strings() {
        let parsed = validator(json!(r#"{"required": ["name"]}"#));
        let result = parsed.check(&data(&[(FieldName::Name, Some("Иван Иванов"))]));
        assert_eq!(result, SchemaResult::consistent());

        let broken = validator(json!("{not json"));
        let result = broken.check(&data(&[(FieldName::Name, Some("Иван Иванов"))]));
        assert!(!result.json_validity);
        assert!(!result.schema_consistency);
    }

    #[test]
    fn raw_json_in_no_schema_form_is_input_error() {
        let input = SchemaInput::Raw(r#"{"required": ["snils"]}"#.to_owned());
        let err = SchemaValidator::new(Some(&input)).err().unwrap();
        assert!(err.is_input_error());

        let input = SchemaInput::Raw("[1, 2]".to_owned());
        assert!(SchemaValidator::new(Some(&input)).is_err());
    }

    #[test]
    fn raw_json_schema_string_keeps_json_validity() {
        let raw = json!(r#"{"json_schema": {"type": "object", "required": ["passport"]}}"#);
        let result = validator(raw).check(&data(&[(FieldName::Name, Some("Иван Иванов"))]));
        assert!(result.json_validity);
        assert!(!result.schema_consistency);
        assert_eq!(result.missing_keys, BTreeSet::from(["passport".to_owned()]));
    }

    #[test]
    fn uncompilable_json_schema_is_input_error() {
        let input = SchemaInput::Parsed(Schema::JsonSchema {
            json_schema: json!({ "type": 12 }),
        });
        let err = SchemaValidator::new(Some(&input)).err().unwrap();
        assert!(err.is_input_error());
    }

    #[test]
    fn json_schema_required_keys_need_not_be_fields() {
        let result = validator(json!({
            "json_schema": { "type": "object", "required": ["snils"] }
        }))
        .check(&data(&[(FieldName::Name, Some("Иван Иванов"))]));
        assert!(!result.schema_consistency);
        assert_eq!(result.missing_keys, BTreeSet::from(["snils".to_owned()]));
    }
}
