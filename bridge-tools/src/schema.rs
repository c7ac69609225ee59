//! Parameter schemas and strict argument validation.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Semantic type tag for parameters and return values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// UTF-8 string.
    String,
    /// Whole number representable as `i64` or `u64`.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// JSON `null`.
    Null,
    /// Accepts every JSON value.
    Any,
}

impl ValueType {
    /// Returns `true` when `value` conforms to this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
            Self::Any => true,
        }
    }

    /// Returns the most specific type tag describing `value`.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns the wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
            Self::Any => "any",
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the validator treats argument keys the schema does not declare.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArgumentPolicy {
    /// Unknown keys fail validation.
    #[default]
    Strict,
    /// Unknown keys are dropped before invocation.
    Lenient,
}

/// Declaration of a single named parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    name: String,
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default)]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl ParameterSpec {
    /// Declares a required parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: true,
            default: None,
            description: None,
        }
    }

    /// Marks the parameter as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Supplies a default value; parameters with defaults are never required.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }

    /// Sets a human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Returns `true` when callers must supply the parameter.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Returns the default value, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Ordered parameter list with unique names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ParameterSpec>", into = "Vec<ParameterSpec>")]
pub struct ParameterSchema {
    parameters: Vec<ParameterSpec>,
}

impl ParameterSchema {
    /// Builds a schema from parameter declarations.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when a name is empty or repeated, or when a
    /// default does not conform to its parameter type.
    pub fn new(parameters: Vec<ParameterSpec>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for spec in &parameters {
            if spec.name.trim().is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateParameter {
                    name: spec.name.clone(),
                });
            }
            if let Some(default) = &spec.default {
                if !spec.value_type.matches(default) {
                    return Err(SchemaError::DefaultTypeMismatch {
                        parameter: spec.name.clone(),
                        expected: spec.value_type,
                        found: ValueType::of(default),
                    });
                }
            }
        }
        Ok(Self { parameters })
    }

    /// Schema for tools that take no arguments.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the declaration for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|spec| spec.name == name)
    }

    /// Iterates the declarations in order.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter()
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Returns `true` when no parameters are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Checks `arguments` against the schema and fills in defaults.
    ///
    /// `null` arguments count as an empty object, and a `null` value for an
    /// optional parameter counts as absent.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending parameter.
    pub fn validate(
        &self,
        arguments: Value,
        policy: ArgumentPolicy,
    ) -> Result<Map<String, Value>, ValidationError> {
        let mut supplied = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::new(
                    "arguments",
                    ValidationProblem::NotAnObject {
                        found: ValueType::of(&other),
                    },
                ));
            }
        };

        if let Some(unknown) = supplied.keys().find(|key| self.get(key).is_none()) {
            if policy == ArgumentPolicy::Strict {
                return Err(ValidationError::new(
                    unknown.clone(),
                    ValidationProblem::Unexpected,
                ));
            }
            supplied.retain(|key, _| {
                let known = self.get(key).is_some();
                if !known {
                    debug!(parameter = %key, "dropping undeclared argument");
                }
                known
            });
        }

        let mut validated = Map::new();
        for spec in &self.parameters {
            let value = supplied
                .remove(&spec.name)
                .filter(|value| !value.is_null() || spec.value_type.matches(value));

            match value {
                Some(value) => {
                    if !spec.value_type.matches(&value) {
                        return Err(ValidationError::new(
                            spec.name.clone(),
                            ValidationProblem::TypeMismatch {
                                expected: spec.value_type,
                                found: ValueType::of(&value),
                            },
                        ));
                    }
                    validated.insert(spec.name.clone(), value);
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ValidationError::new(
                            spec.name.clone(),
                            ValidationProblem::Missing,
                        ));
                    }
                }
            }
        }

        Ok(validated)
    }
}

impl TryFrom<Vec<ParameterSpec>> for ParameterSchema {
    type Error = SchemaError;

    fn try_from(value: Vec<ParameterSpec>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParameterSchema> for Vec<ParameterSpec> {
    fn from(value: ParameterSchema) -> Self {
        value.parameters
    }
}

/// Errors raised while building a [`ParameterSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A parameter was declared without a name.
    #[error("parameter name cannot be empty")]
    EmptyName,

    /// Two parameters share a name.
    #[error("parameter `{name}` is declared more than once")]
    DuplicateParameter {
        /// Repeated parameter name.
        name: String,
    },

    /// A default value does not conform to the declared type.
    #[error("default for parameter `{parameter}` must be {expected}, found {found}")]
    DefaultTypeMismatch {
        /// Parameter carrying the default.
        parameter: String,
        /// Declared type.
        expected: ValueType,
        /// Type of the supplied default.
        found: ValueType,
    },
}

/// Argument rejected by [`ParameterSchema::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parameter `{parameter}`: {problem}")]
pub struct ValidationError {
    parameter: String,
    problem: ValidationProblem,
}

impl ValidationError {
    /// Creates a validation error for `parameter`.
    #[must_use]
    pub fn new(parameter: impl Into<String>, problem: ValidationProblem) -> Self {
        Self {
            parameter: parameter.into(),
            problem,
        }
    }

    /// Name of the offending parameter.
    #[must_use]
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// What was wrong with it.
    #[must_use]
    pub fn problem(&self) -> &ValidationProblem {
        &self.problem
    }
}

/// Reason a parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationProblem {
    /// Required parameter absent.
    #[error("missing required parameter")]
    Missing,

    /// Value has the wrong type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Declared type.
        expected: ValueType,
        /// Type of the supplied value.
        found: ValueType,
    },

    /// Parameter is not declared by the tool.
    #[error("unexpected parameter")]
    Unexpected,

    /// The argument payload itself is not an object.
    #[error("arguments must be an object, found {found}")]
    NotAnObject {
        /// Type of the supplied payload.
        found: ValueType,
    },
}
