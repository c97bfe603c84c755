// crates/erp-ingest-core/src/mapping.rs
// ============================================================================
// Module: Mapping Engine
// Description: Declarative schema-to-schema document transformation.
// Purpose: Convert JSON documents between client, canonical, and target shapes.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`MappingSpec`] is an ordered list of destination fields. Each field has
//! a [`FieldRule`]: either a value read from a dotted source path (with an
//! optional [`Transform`] and default) or a nested spec applied to one object
//! or to every element of a list. [`map_document`] evaluates the rules in
//! declared order with a single recursive function, then checks each value
//! against its declared [`ValueKind`]. Errors name the full destination path,
//! for example `DocumentLines[0].ItemCode`.
//!
//! Specs are immutable once built and are shared through [`Arc`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Custom transform function.
pub type TransformFn = fn(&Value, &MappingContext) -> Result<Value, TransformError>;

/// Per-invocation mapping context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingContext {
    /// Resource being mapped.
    pub resource: String,
    /// Mapping profile name.
    pub profile: String,
}

impl MappingContext {
    /// Creates a context.
    #[must_use]
    pub fn new(resource: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            profile: profile.into(),
        }
    }
}

/// Declared destination value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// Integral JSON number.
    Integer,
    /// JSON boolean.
    Bool,
    /// JSON object.
    Object,
    /// JSON array.
    List,
    /// Any value.
    Any,
}

impl ValueKind {
    /// Returns true when the non-null value satisfies the kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::List => value.is_array(),
            Self::Any => true,
        }
    }

    /// Returns the kind label used in errors.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Object => "object",
            Self::List => "list",
            Self::Any => "any",
        }
    }
}

/// Value transform applied before assignment.
#[derive(Clone, Copy)]
pub enum Transform {
    /// Trim surrounding whitespace from strings.
    Trim,
    /// Upper-case strings.
    Uppercase,
    /// Lower-case strings.
    Lowercase,
    /// Render scalars as strings.
    ToString,
    /// Parse numeric strings into numbers.
    ToNumber,
    /// Parse integral strings or numbers into integers.
    ToInteger,
    /// User-supplied function.
    Custom(TransformFn),
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Trim => "Trim",
            Self::Uppercase => "Uppercase",
            Self::Lowercase => "Lowercase",
            Self::ToString => "ToString",
            Self::ToNumber => "ToNumber",
            Self::ToInteger => "ToInteger",
            Self::Custom(_) => "Custom",
        };
        f.write_str(label)
    }
}

/// Rule producing one destination value.
#[derive(Debug, Clone)]
pub enum FieldRule {
    /// Value read from a source path.
    Value {
        /// Dotted source path.
        source: String,
        /// Optional transform for non-null values.
        transform: Option<Transform>,
        /// Value used when the source is absent or null.
        default: Option<Value>,
    },
    /// Nested spec applied to an object or to each list element.
    Nested {
        /// Dotted source path.
        source: String,
        /// Spec applied to the nested value.
        spec: Arc<MappingSpec>,
        /// Whether the source is a list mapped element-wise.
        many: bool,
    },
}

/// Destination field declaration.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Destination field name.
    pub name: String,
    /// Declared value kind.
    pub kind: ValueKind,
    /// Whether a null value is rejected.
    pub required: bool,
    /// Value rule.
    pub rule: FieldRule,
}

impl FieldSpec {
    /// Declares a value field read from `source`.
    #[must_use]
    pub fn value(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ValueKind::Any,
            required: false,
            rule: FieldRule::Value {
                source: source.to_string(),
                transform: None,
                default: None,
            },
        }
    }

    /// Declares a nested object field read from `source`.
    #[must_use]
    pub fn nested(name: &str, source: &str, spec: Arc<MappingSpec>) -> Self {
        Self {
            name: name.to_string(),
            kind: ValueKind::Object,
            required: false,
            rule: FieldRule::Nested {
                source: source.to_string(),
                spec,
                many: false,
            },
        }
    }

    /// Declares a list field mapping every element of `source`.
    #[must_use]
    pub fn many(name: &str, source: &str, spec: Arc<MappingSpec>) -> Self {
        Self {
            name: name.to_string(),
            kind: ValueKind::List,
            required: false,
            rule: FieldRule::Nested {
                source: source.to_string(),
                spec,
                many: true,
            },
        }
    }

    /// Sets the declared kind.
    #[must_use]
    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the transform of a value field.
    #[must_use]
    pub fn transform(mut self, transform: Transform) -> Self {
        if let FieldRule::Value {
            transform: slot, ..
        } = &mut self.rule
        {
            *slot = Some(transform);
        }
        self
    }

    /// Sets the default of a value field.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        if let FieldRule::Value {
            default: slot, ..
        } = &mut self.rule
        {
            *slot = Some(value);
        }
        self
    }
}

/// Ordered destination shape.
#[derive(Debug, Clone, Default)]
pub struct MappingSpec {
    /// Spec name used in logs.
    pub name: String,
    /// Destination fields in output order.
    pub fields: Vec<FieldSpec>,
    /// Whether null values are left out of the output object.
    pub omit_nulls: bool,
}

impl MappingSpec {
    /// Creates an empty spec.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            omit_nulls: false,
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Leaves null values out of the output object.
    #[must_use]
    pub fn omit_nulls(mut self) -> Self {
        self.omit_nulls = true;
        self
    }

    /// Freezes the spec for sharing.
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failure reported by a transform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransformError(pub String);

/// Structural mapping failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    /// Required destination value is null.
    #[error("field {path}: required value missing")]
    Missing {
        /// Destination field path.
        path: String,
    },
    /// Destination value has the wrong kind.
    #[error("field {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Destination field path.
        path: String,
        /// Declared kind.
        expected: &'static str,
        /// Actual kind.
        found: &'static str,
    },
    /// Transform rejected the value.
    #[error("field {path}: {message}")]
    Transform {
        /// Destination field path.
        path: String,
        /// Transform message.
        message: String,
    },
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Maps `source` to the destination shape declared by `spec`.
///
/// # Errors
///
/// Returns [`MappingError`] naming the first invalid destination field.
pub fn map_document(
    source: &Value,
    spec: &MappingSpec,
    ctx: &MappingContext,
) -> Result<Value, MappingError> {
    map_object(source, spec, ctx, "")
}

/// Resolves a dotted path. Numeric segments index into lists.
#[must_use]
pub fn resolve_path<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(source);
    }
    let mut current = source;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Maps one object level.
fn map_object(
    source: &Value,
    spec: &MappingSpec,
    ctx: &MappingContext,
    prefix: &str,
) -> Result<Value, MappingError> {
    let mut out = Map::with_capacity(spec.fields.len());
    for field in &spec.fields {
        let path = join_path(prefix, &field.name);
        let value = evaluate_rule(source, &field.rule, ctx, &path)?;
        check_value(field, &value, &path)?;
        if value.is_null() && spec.omit_nulls {
            continue;
        }
        out.insert(field.name.clone(), value);
    }
    Ok(Value::Object(out))
}

/// Evaluates a field rule.
fn evaluate_rule(
    source: &Value,
    rule: &FieldRule,
    ctx: &MappingContext,
    path: &str,
) -> Result<Value, MappingError> {
    match rule {
        FieldRule::Value {
            source: source_path,
            transform,
            default,
        } => {
            let raw = resolve_path(source, source_path).filter(|value| !value.is_null());
            let value = raw.cloned().or_else(|| default.clone()).unwrap_or(Value::Null);
            match transform {
                Some(transform) if !value.is_null() => apply_transform(*transform, &value, ctx)
                    .map_err(|err| MappingError::Transform {
                        path: path.to_string(),
                        message: err.0,
                    }),
                _ => Ok(value),
            }
        }
        FieldRule::Nested {
            source: source_path,
            spec,
            many,
        } => {
            let raw = resolve_path(source, source_path).filter(|value| !value.is_null());
            if *many {
                let Some(raw) = raw else {
                    return Ok(Value::Array(Vec::new()));
                };
                let Value::Array(items) = raw else {
                    return Err(MappingError::TypeMismatch {
                        path: path.to_string(),
                        expected: ValueKind::List.label(),
                        found: value_label(raw),
                    });
                };
                let mut mapped = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    mapped.push(map_object(item, spec, ctx, &format!("{path}[{index}]"))?);
                }
                Ok(Value::Array(mapped))
            } else {
                match raw {
                    None => Ok(Value::Null),
                    Some(raw) => map_object(raw, spec, ctx, path),
                }
            }
        }
    }
}

/// Validates a destination value against its declaration.
fn check_value(field: &FieldSpec, value: &Value, path: &str) -> Result<(), MappingError> {
    if value.is_null() {
        if field.required {
            return Err(MappingError::Missing {
                path: path.to_string(),
            });
        }
        return Ok(());
    }
    if !field.kind.accepts(value) {
        return Err(MappingError::TypeMismatch {
            path: path.to_string(),
            expected: field.kind.label(),
            found: value_label(value),
        });
    }
    Ok(())
}

/// Applies a transform to a non-null value.
fn apply_transform(
    transform: Transform,
    value: &Value,
    ctx: &MappingContext,
) -> Result<Value, TransformError> {
    match transform {
        Transform::Trim => Ok(map_string(value, |text| text.trim().to_string())),
        Transform::Uppercase => Ok(map_string(value, str::to_uppercase)),
        Transform::Lowercase => Ok(map_string(value, str::to_lowercase)),
        Transform::ToString => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(number) => Ok(Value::String(number.to_string())),
            Value::Bool(flag) => Ok(Value::String(flag.to_string())),
            other => Err(TransformError(format!("cannot render {} as string", value_label(other)))),
        },
        Transform::ToNumber => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(text) => parse_number(text.trim()),
            other => {
                Err(TransformError(format!("cannot convert {} to number", value_label(other))))
            }
        },
        Transform::ToInteger => to_integer(value),
        Transform::Custom(function) => function(value, ctx),
    }
}

/// Applies `op` to string values and passes others through.
fn map_string(value: &Value, op: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(text) => Value::String(op(text)),
        other => other.clone(),
    }
}

/// Parses a numeric string, preferring integers.
fn parse_number(text: &str) -> Result<Value, TransformError> {
    if let Ok(integer) = text.parse::<i64>() {
        return Ok(Value::Number(integer.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| TransformError(format!("'{text}' is not a number")))
}

/// Converts integral numbers and strings to integers.
fn to_integer(value: &Value) -> Result<Value, TransformError> {
    match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => Ok(value.clone()),
        Value::Number(number) => match number.as_f64() {
            Some(float) if float.is_finite() && float.fract() == 0.0 => format!("{float:.0}")
                .parse::<i64>()
                .map(|integer| Value::Number(integer.into()))
                .map_err(|_| TransformError(format!("{float} is out of integer range"))),
            _ => Err(TransformError(format!("{number} is not an integer"))),
        },
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(|integer| Value::Number(integer.into()))
            .map_err(|_| TransformError(format!("'{text}' is not an integer"))),
        other => Err(TransformError(format!("cannot convert {} to integer", value_label(other)))),
    }
}

/// Joins a destination path prefix and field name.
fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{prefix}.{name}") }
}

/// Returns the JSON kind label of a value.
fn value_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
