// Input schemas for tools and the validator that checks arguments against them

use crate::types::{ErrorKind, ToolFailure};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Wire type of a single argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    /// A string naming a filesystem location; resolved through the sandbox
    Path,
    Array(Box<FieldType>),
}

impl FieldType {
    fn json_type(&self) -> &'static str {
        match self {
            Self::String | Self::Path => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array(_) => "array",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String | Self::Path => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array(_) => value.is_array(),
        }
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = serde_json::json!({ "type": self.json_type() });
        match self {
            Self::Path => {
                schema["format"] = Value::from("path");
            }
            Self::Array(items) => {
                schema["items"] = items.to_json_schema();
            }
            _ => {}
        }
        schema
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => f.write_str("path"),
            Self::Array(items) => write!(f, "array<{}>", items),
            other => f.write_str(other.json_type()),
        }
    }
}

/// Declaration of one named argument
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub description: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed: Option<Vec<String>>,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field_type,
            required: false,
            default: None,
            allowed: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, FieldType::String, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer, description)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number, description)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean, description)
    }

    pub fn path(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, FieldType::Path, description)
    }

    pub fn array(name: impl Into<String>, items: FieldType, description: impl Into<String>) -> Self {
        Self::new(name, FieldType::Array(Box::new(items)), description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value substituted when the caller omits this optional field
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn one_of(mut self, allowed: &[&str]) -> Self {
        self.allowed = Some(allowed.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = self.field_type.to_json_schema();
        schema["description"] = Value::from(self.description.as_str());
        if let Some(allowed) = &self.allowed {
            schema["enum"] = Value::from(allowed.clone());
        }
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        if let Some(minimum) = self.minimum {
            schema["minimum"] = Value::from(minimum);
        }
        if let Some(maximum) = self.maximum {
            schema["maximum"] = Value::from(maximum);
        }
        schema
    }
}

/// Structural description of a tool's argument object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    fields: Vec<FieldSchema>,
    closed: bool,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Reject argument names the schema does not declare
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of the arguments that denote filesystem paths
    pub fn path_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.field_type == FieldType::Path)
            .map(|f| f.name.as_str())
    }

    /// Render as the JSON Schema object advertised by `tools/list`
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), field.to_json_schema());
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        let mut schema = serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
        if self.closed {
            schema["additionalProperties"] = Value::Bool(false);
        }
        schema
    }

    pub fn validate(&self, arguments: &Value) -> Result<ValidatedArgs, ValidationError> {
        validate(self, arguments)
    }
}

impl Serialize for InputSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_schema().serialize(serializer)
    }
}

/// Why one argument was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ViolationReason {
    MissingField,
    TypeMismatch { expected: String, actual: String },
    InvalidEnumValue { allowed: Vec<String>, actual: String },
    OutOfRange {
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
        actual: String,
    },
    UnknownField,
}

impl ViolationReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::InvalidEnumValue { .. } => "invalid_enum_value",
            Self::OutOfRange { .. } => "out_of_range",
            Self::UnknownField => "unknown_field",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub reason: ViolationReason,
}

impl Violation {
    fn new(field: impl Into<String>, reason: ViolationReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason.code(), self.field)?;
        match &self.reason {
            ViolationReason::TypeMismatch { expected, actual } => {
                write!(f, " (expected {}, got {})", expected, actual)
            }
            ViolationReason::InvalidEnumValue { allowed, actual } => {
                write!(f, " ({:?} not in [{}])", actual, allowed.join(", "))
            }
            ViolationReason::OutOfRange {
                minimum,
                maximum,
                actual,
            } => {
                let lo = minimum.map(|m| m.to_string()).unwrap_or_default();
                let hi = maximum.map(|m| m.to_string()).unwrap_or_default();
                write!(f, " ({} not in {}..={})", actual, lo, hi)
            }
            ViolationReason::MissingField | ViolationReason::UnknownField => Ok(()),
        }
    }
}

/// Every violation found in one argument object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid arguments: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ValidationError> for ToolFailure {
    fn from(err: ValidationError) -> Self {
        let details = serde_json::json!({ "violations": err.violations });
        ToolFailure::new(ErrorKind::ValidationError, err.to_string()).with_details(details)
    }
}

/// Argument object that has passed validation, with defaults filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedArgs {
    values: Map<String, Value>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    /// Deserialize into a handler's typed argument struct
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ToolFailure> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| ToolFailure::internal(format!("Validated arguments did not fit handler: {}", e)))
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_type(field: &str, ty: &FieldType, value: &Value, out: &mut Vec<Violation>) {
    if !ty.accepts(value) {
        out.push(Violation::new(
            field,
            ViolationReason::TypeMismatch {
                expected: ty.to_string(),
                actual: type_name(value).to_string(),
            },
        ));
        return;
    }
    if let (FieldType::Array(item), Value::Array(elements)) = (ty, value) {
        for (index, element) in elements.iter().enumerate() {
            check_type(&format!("{}[{}]", field, index), item, element, out);
        }
    }
}

fn check_constraints(field: &FieldSchema, value: &Value, out: &mut Vec<Violation>) {
    if let (Some(allowed), Some(actual)) = (&field.allowed, value.as_str()) {
        if !allowed.iter().any(|a| a == actual) {
            out.push(Violation::new(
                &field.name,
                ViolationReason::InvalidEnumValue {
                    allowed: allowed.clone(),
                    actual: actual.to_string(),
                },
            ));
        }
    }

    if field.minimum.is_none() && field.maximum.is_none() {
        return;
    }
    let in_range = match value.as_i64() {
        Some(n) => field.minimum.map_or(true, |m| n >= m) && field.maximum.map_or(true, |m| n <= m),
        // Only u64 values above i64::MAX get here
        None => field.maximum.is_none(),
    };
    if !in_range {
        out.push(Violation::new(
            &field.name,
            ViolationReason::OutOfRange {
                minimum: field.minimum,
                maximum: field.maximum,
                actual: value.to_string(),
            },
        ));
    }
}

/// Check `arguments` against `schema`, collecting every violation.
///
/// JSON `null` counts as absent. A missing argument object is treated as `{}`.
/// Undeclared arguments are dropped unless the schema is closed, in which case
/// each one is reported as `unknown_field`.
pub fn validate(schema: &InputSchema, arguments: &Value) -> Result<ValidatedArgs, ValidationError> {
    let empty = Map::new();
    let object = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(ValidationError {
                violations: vec![Violation::new(
                    "",
                    ViolationReason::TypeMismatch {
                        expected: "object".to_string(),
                        actual: type_name(other).to_string(),
                    },
                )],
            })
        }
    };

    let mut violations = Vec::new();
    let mut values = Map::new();

    for field in &schema.fields {
        match object.get(&field.name).filter(|v| !v.is_null()) {
            None => {
                if field.required {
                    violations.push(Violation::new(&field.name, ViolationReason::MissingField));
                } else if let Some(default) = &field.default {
                    values.insert(field.name.clone(), default.clone());
                }
            }
            Some(value) => {
                let before = violations.len();
                check_type(&field.name, &field.field_type, value, &mut violations);
                if violations.len() == before {
                    check_constraints(field, value, &mut violations);
                }
                values.insert(field.name.clone(), value.clone());
            }
        }
    }

    if schema.closed {
        for key in object.keys() {
            if schema.get(key).is_none() {
                violations.push(Violation::new(key, ViolationReason::UnknownField));
            }
        }
    }

    if violations.is_empty() {
        Ok(ValidatedArgs { values })
    } else {
        Err(ValidationError { violations })
    }
}
