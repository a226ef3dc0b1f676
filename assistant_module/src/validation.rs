//! Structured input validation for RPC procedure inputs.
//!
//! Inputs arrive as JSON objects; `InputReader` pulls typed fields out of them
//! and collects every problem as a `ValidationIssue` instead of stopping at the
//! first one, so callers get field-level feedback for the whole payload.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{Map, Value};

/// Structural kind of a single validation problem.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    InvalidType { expected: String, received: String },
    InvalidString { validation: String },
    TooSmall { minimum: i64, value_type: String },
    TooBig { maximum: i64, value_type: String },
    InvalidEnumValue { options: Vec<String>, received: String },
    InvalidDate,
    Custom,
}

impl IssueKind {
    pub fn code(&self) -> &'static str {
        match self {
            IssueKind::InvalidType { .. } => "invalid_type",
            IssueKind::InvalidString { .. } => "invalid_string",
            IssueKind::TooSmall { .. } => "too_small",
            IssueKind::TooBig { .. } => "too_big",
            IssueKind::InvalidEnumValue { .. } => "invalid_enum_value",
            IssueKind::InvalidDate => "invalid_date",
            IssueKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub path: Vec<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: &str, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            path: vec![field.to_string()],
            kind,
            message: message.into(),
        }
    }

    pub fn required(field: &str) -> Self {
        Self::new(
            field,
            IssueKind::InvalidType {
                expected: "string".to_string(),
                received: "undefined".to_string(),
            },
            "Required",
        )
    }

    /// Dotted path, or an empty string for issues on the whole input.
    pub fn field(&self) -> String {
        self.path.join(".")
    }

    /// Parse one entry of a JSON `issues` list (`{"code", "path", "message", ...}`).
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let code = object.get("code")?.as_str()?;
        let path = object
            .get("path")
            .and_then(|path| path.as_array())
            .map(|segments| {
                segments
                    .iter()
                    .map(|segment| match segment {
                        Value::String(key) => key.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let text = |key: &str| {
            object
                .get(key)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let number = |key: &str| object.get(key).and_then(|value| value.as_i64()).unwrap_or(0);
        let kind = match code {
            "invalid_type" => IssueKind::InvalidType {
                expected: text("expected"),
                received: text("received"),
            },
            "invalid_string" => IssueKind::InvalidString {
                validation: object
                    .get("validation")
                    .map(|value| match value {
                        Value::String(name) => name.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default(),
            },
            "too_small" => IssueKind::TooSmall {
                minimum: number("minimum"),
                value_type: text("type"),
            },
            "too_big" => IssueKind::TooBig {
                maximum: number("maximum"),
                value_type: text("type"),
            },
            "invalid_enum_value" => IssueKind::InvalidEnumValue {
                options: object
                    .get("options")
                    .and_then(|options| options.as_array())
                    .map(|options| {
                        options
                            .iter()
                            .filter_map(|option| option.as_str().map(|s| s.to_string()))
                            .collect()
                    })
                    .unwrap_or_default(),
                received: text("received"),
            },
            "invalid_date" => IssueKind::InvalidDate,
            _ => IssueKind::Custom,
        };
        Some(Self {
            path,
            kind,
            message: text("message"),
        })
    }
}

/// One or more validation issues for a single input.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationFailure {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn single(issue: ValidationIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }

    /// Parse a JSON `issues` array; `None` when nothing in it is a usable issue.
    pub fn from_issues_json(value: &Value) -> Option<Self> {
        let issues: Vec<ValidationIssue> = value
            .as_array()?
            .iter()
            .filter_map(ValidationIssue::from_json)
            .collect();
        if issues.is_empty() {
            None
        } else {
            Some(Self { issues })
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (idx, issue) in self.issues.iter().enumerate() {
            let sep = if idx == 0 { ": " } else { "; " };
            write!(f, "{}{} ({}) {}", sep, issue.field(), issue.kind.code(), issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Reads typed fields out of a JSON object, accumulating issues.
pub struct InputReader<'a> {
    input: Option<&'a Map<String, Value>>,
    issues: Vec<ValidationIssue>,
}

impl<'a> InputReader<'a> {
    pub fn new(value: &'a Value) -> Self {
        let mut reader = Self {
            input: value.as_object(),
            issues: Vec::new(),
        };
        if reader.input.is_none() {
            reader.issues.push(ValidationIssue {
                path: Vec::new(),
                kind: IssueKind::InvalidType {
                    expected: "object".to_string(),
                    received: type_name(value).to_string(),
                },
                message: "Expected object".to_string(),
            });
        }
        reader
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.input
            .and_then(|input| input.get(key))
            .filter(|value| !value.is_null())
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn required_string(&mut self, key: &str, min: usize, max: usize) -> Option<String> {
        if self.input.is_none() {
            return None;
        }
        match self.get(key) {
            None => {
                self.issues.push(ValidationIssue::required(key));
                None
            }
            Some(value) => self.check_string(key, value, min, max),
        }
    }

    pub fn optional_string(&mut self, key: &str, max: usize) -> Option<String> {
        let value = self.get(key)?;
        self.check_string(key, value, 0, max)
    }

    fn check_string(&mut self, key: &str, value: &Value, min: usize, max: usize) -> Option<String> {
        let Some(text) = value.as_str() else {
            self.issues.push(ValidationIssue::new(
                key,
                IssueKind::InvalidType {
                    expected: "string".to_string(),
                    received: type_name(value).to_string(),
                },
                format!("Expected string, received {}", type_name(value)),
            ));
            return None;
        };
        let length = text.trim().chars().count();
        if length < min {
            self.issues.push(ValidationIssue::new(
                key,
                IssueKind::TooSmall {
                    minimum: min as i64,
                    value_type: "string".to_string(),
                },
                format!("String must contain at least {} character(s)", min),
            ));
            return None;
        }
        if text.chars().count() > max {
            self.issues.push(ValidationIssue::new(
                key,
                IssueKind::TooBig {
                    maximum: max as i64,
                    value_type: "string".to_string(),
                },
                format!("String must contain at most {} character(s)", max),
            ));
            return None;
        }
        Some(text.trim().to_string())
    }

    pub fn required_datetime(&mut self, key: &str) -> Option<DateTime<Utc>> {
        if self.input.is_none() {
            return None;
        }
        match self.get(key) {
            None => {
                self.issues.push(ValidationIssue::required(key));
                None
            }
            Some(value) => self.check_datetime(key, value),
        }
    }

    pub fn optional_datetime(&mut self, key: &str) -> Option<DateTime<Utc>> {
        let value = self.get(key)?;
        self.check_datetime(key, value)
    }

    /// Accepts RFC 3339 strings, `YYYY-MM-DD` (UTC midnight) or epoch milliseconds.
    fn check_datetime(&mut self, key: &str, value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::String(text) => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(text.trim()) {
                    return Some(parsed.with_timezone(&Utc));
                }
                if let Ok(date) = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
                    if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                        return Some(Utc.from_utc_datetime(&midnight));
                    }
                }
                self.issues.push(ValidationIssue::new(
                    key,
                    IssueKind::InvalidString {
                        validation: "datetime".to_string(),
                    },
                    "Invalid datetime",
                ));
                None
            }
            Value::Number(number) => {
                let parsed = number
                    .as_i64()
                    .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
                if parsed.is_none() {
                    self.issues
                        .push(ValidationIssue::new(key, IssueKind::InvalidDate, "Invalid date"));
                }
                parsed
            }
            other => {
                self.issues.push(ValidationIssue::new(
                    key,
                    IssueKind::InvalidType {
                        expected: "date".to_string(),
                        received: type_name(other).to_string(),
                    },
                    format!("Expected date, received {}", type_name(other)),
                ));
                None
            }
        }
    }

    pub fn optional_bool(&mut self, key: &str) -> Option<bool> {
        let value = self.get(key)?;
        match value.as_bool() {
            Some(flag) => Some(flag),
            None => {
                self.issues.push(ValidationIssue::new(
                    key,
                    IssueKind::InvalidType {
                        expected: "boolean".to_string(),
                        received: type_name(value).to_string(),
                    },
                    format!("Expected boolean, received {}", type_name(value)),
                ));
                None
            }
        }
    }

    pub fn optional_enum(&mut self, key: &str, options: &[&str]) -> Option<String> {
        let value = self.get(key)?;
        let text = self.check_string(key, value, 0, 64)?;
        if options.iter().any(|option| *option == text) {
            return Some(text);
        }
        self.issues.push(ValidationIssue::new(
            key,
            IssueKind::InvalidEnumValue {
                options: options.iter().map(|option| option.to_string()).collect(),
                received: text.clone(),
            },
            format!(
                "Invalid enum value. Expected {}, received '{}'",
                options.join(" | "),
                text
            ),
        ));
        None
    }

    pub fn required_base64(&mut self, key: &str) -> Option<Vec<u8>> {
        let text = self.required_string(key, 1, usize::MAX)?;
        match BASE64_STANDARD.decode(text.as_bytes()) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                self.issues.push(ValidationIssue::new(
                    key,
                    IssueKind::InvalidString {
                        validation: "base64".to_string(),
                    },
                    "Invalid base64",
                ));
                None
            }
        }
    }

    pub fn finish(self) -> Result<(), ValidationFailure> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure::new(self.issues))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
