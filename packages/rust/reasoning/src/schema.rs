//! Declared response schemas.
//!
//! A [`Schema`] is sent to the service as the structured-output contract and
//! checked again against the returned JSON, so a missing field or a wrong
//! primitive type is reported with its path before deserialization.

use serde_json::{Map, Value, json};

/// Response schema tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    String,
    /// A string restricted to the listed values.
    Enum(&'static [&'static str]),
    Integer,
    Array(Box<Schema>),
    Object(Vec<Field>),
}

/// A named object property.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub schema: Schema,
    pub required: bool,
}

impl Field {
    pub fn required(name: &'static str, schema: Schema) -> Self {
        Self {
            name,
            schema,
            required: true,
        }
    }

    pub fn optional(name: &'static str, schema: Schema) -> Self {
        Self {
            name,
            schema,
            required: false,
        }
    }
}

impl Schema {
    pub fn array(items: Schema) -> Self {
        Self::Array(Box::new(items))
    }

    pub fn object(fields: Vec<Field>) -> Self {
        Self::Object(fields)
    }

    /// Render in the service's OpenAPI-subset dialect.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String => json!({ "type": "STRING" }),
            Self::Enum(values) => json!({ "type": "STRING", "enum": values }),
            Self::Integer => json!({ "type": "INTEGER" }),
            Self::Array(items) => json!({ "type": "ARRAY", "items": items.to_json() }),
            Self::Object(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.to_string(), field.schema.to_json());
                    if field.required {
                        required.push(Value::from(field.name));
                    }
                }
                json!({
                    "type": "OBJECT",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }

    /// Check `value` against the schema. The error names the offending path.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        self.check_at(value, "$")
    }

    fn check_at(&self, value: &Value, path: &str) -> Result<(), String> {
        match (self, value) {
            (Self::String, Value::String(_)) => Ok(()),
            (Self::Enum(allowed), Value::String(s)) => {
                if allowed.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!("{path}: '{s}' is not one of {allowed:?}"))
                }
            }
            (Self::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (Self::Array(items), Value::Array(elements)) => {
                for (i, element) in elements.iter().enumerate() {
                    items.check_at(element, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            (Self::Object(fields), Value::Object(map)) => {
                for field in fields {
                    let child = format!("{path}.{}", field.name);
                    match map.get(field.name) {
                        Some(Value::Null) | None if field.required => {
                            return Err(format!("{child}: required field missing"));
                        }
                        Some(Value::Null) | None => {}
                        Some(v) => field.schema.check_at(v, &child)?,
                    }
                }
                Ok(())
            }
            (expected, actual) => Err(format!(
                "{path}: expected {}, got {}",
                expected.type_name(),
                json_type_name(actual)
            )),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::String | Self::Enum(_) => "string",
            Self::Integer => "integer",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
