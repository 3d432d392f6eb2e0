//! Host-side vocabulary for multi-step configuration flows.
//!
//! A flow is a sequence of form round trips. Each step either shows a form
//! (optionally with field errors), creates an entry, or aborts. User input is
//! the JSON object of submitted form fields.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::entries::EntryError;

/// Submitted form fields
pub type UserInput = serde_json::Map<String, serde_json::Value>;

/// Error key shown on the form itself rather than on a single field
pub const BASE_ERROR: &str = "base";

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for field: {0}")]
    InvalidField(String),

    #[error("Step {0} was reached without its prior steps")]
    OutOfOrder(String),

    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// One selectable option of a multi-select field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    MultiSelect {
        options: Vec<SelectOption>,
        default: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormField {
    pub key: String,
    pub required: bool,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FormField {
    pub fn text(key: &str, default: Option<String>) -> Self {
        Self {
            key: key.to_string(),
            required: true,
            kind: FieldKind::Text { default },
        }
    }

    pub fn multi_select(key: &str, options: Vec<SelectOption>, default: Vec<String>) -> Self {
        Self {
            key: key.to_string(),
            required: true,
            kind: FieldKind::MultiSelect { options, default },
        }
    }
}

/// A form shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Form {
    pub step_id: String,
    pub fields: Vec<FormField>,
    pub errors: BTreeMap<String, String>,
    pub placeholders: BTreeMap<String, String>,
}

impl Form {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            fields: Vec::new(),
            errors: BTreeMap::new(),
            placeholders: BTreeMap::new(),
        }
    }

    pub fn field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn error(mut self, key: &str, error: &str) -> Self {
        self.errors.insert(key.to_string(), error.to_string());
        self
    }

    pub fn placeholder(mut self, key: &str, value: impl Into<String>) -> Self {
        self.placeholders.insert(key.to_string(), value.into());
        self
    }
}

/// Result of running one flow step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult<T> {
    ShowForm(Form),
    CreateEntry { title: String, data: T },
    Abort { reason: String },
}

impl<T> FlowResult<T> {
    /// Whether the flow is finished and its session can be discarded
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowResult::ShowForm(_))
    }
}

/// Read a required string field
pub fn required_str<'a>(input: &'a UserInput, key: &str) -> Result<&'a str, FlowError> {
    match input.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(_) => Err(FlowError::InvalidField(key.to_string())),
        None => Err(FlowError::MissingField(key.to_string())),
    }
}

/// Read a required list-of-strings field
pub fn required_list(input: &UserInput, key: &str) -> Result<Vec<String>, FlowError> {
    let values = match input.get(key) {
        Some(serde_json::Value::Array(values)) => values,
        Some(_) => return Err(FlowError::InvalidField(key.to_string())),
        None => return Err(FlowError::MissingField(key.to_string())),
    };
    values
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| FlowError::InvalidField(key.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: serde_json::Value) -> UserInput {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_str() {
        let i = input(serde_json::json!({"base_url": "http://x", "n": 1}));
        assert_eq!(required_str(&i, "base_url").unwrap(), "http://x");
        assert!(matches!(
            required_str(&i, "n"),
            Err(FlowError::InvalidField(_))
        ));
        assert!(matches!(
            required_str(&i, "missing"),
            Err(FlowError::MissingField(_))
        ));
    }

    #[test]
    fn test_required_list() {
        let i = input(serde_json::json!({"printers": ["P1", "P2"], "bad": ["P1", 2]}));
        assert_eq!(required_list(&i, "printers").unwrap(), vec!["P1", "P2"]);
        assert!(matches!(
            required_list(&i, "bad"),
            Err(FlowError::InvalidField(_))
        ));
    }

    #[test]
    fn test_flow_result_serialization() {
        let form = Form::new("user")
            .field(FormField::text("base_url", None))
            .error(BASE_ERROR, "cannot_connect");
        let json = serde_json::to_value(FlowResult::<()>::ShowForm(form)).unwrap();
        assert_eq!(json["type"], "show_form");
        assert_eq!(json["step_id"], "user");
        assert_eq!(json["fields"][0]["kind"], "text");
        assert_eq!(json["errors"]["base"], "cannot_connect");

        let json = serde_json::to_value(FlowResult::<()>::Abort {
            reason: "already_configured".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "abort");
        assert_eq!(json["reason"], "already_configured");
    }
}
