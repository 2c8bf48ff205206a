//! Declarative verification contracts.
//!
//! A [`Contract`] is supplied by the mission store as JSON and is never
//! mutated by the grader. It names the script to run, the files it depends
//! on, where to find them, and the [`ValidationRule`]s its output must meet.

use std::collections::BTreeMap;

use grader_remote::{format_template, SourceConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifyError};

/// How one mission's submission is verified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contract {
    /// Script path relative to the selection's base path.
    pub script_path: String,
    /// Fetched before the run; a missing one fails the attempt.
    pub required_files: Vec<String>,
    /// Resolved lazily, only if the script opens them.
    pub optional_files: Vec<String>,
    /// Files or directories downloaded recursively into the execution root.
    pub workspace_paths: Vec<String>,
    pub source: SourceConfig,
    pub validations: Vec<ValidationRule>,
    /// Template with `{script_path}` and `{source}` placeholders.
    pub feedback_script_missing: Option<String>,
    /// Template with `{required_path}` and `{source}` placeholders.
    pub feedback_required_file_missing: Option<String>,
    /// Overrides the engine's script timeout.
    pub timeout_seconds: Option<u64>,
}

impl Contract {
    pub fn from_json(raw: &str) -> Result<Self> {
        let contract: Contract = serde_json::from_str(raw).map_err(|e| {
            VerifyError::configuration(format!("invalid verification contract: {}", e))
        })?;
        contract.validate()?;
        Ok(contract)
    }

    pub fn validate(&self) -> Result<()> {
        if self.script_path.trim().trim_matches('/').is_empty() {
            return Err(VerifyError::configuration(
                "the verification contract does not define script_path",
            ));
        }
        if self.timeout_seconds == Some(0) {
            return Err(VerifyError::configuration(
                "timeout_seconds must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn script_missing_feedback(&self, source: &str) -> Result<String> {
        match &self.feedback_script_missing {
            Some(template) => render_feedback(
                template,
                "feedback_script_missing",
                &[("script_path", &self.script_path), ("source", source)],
            ),
            None => Ok(format!(
                "The script {} was not found in {}.",
                self.script_path, source
            )),
        }
    }

    pub fn required_missing_feedback(&self, required_path: &str, source: &str) -> Result<String> {
        match &self.feedback_required_file_missing {
            Some(template) => render_feedback(
                template,
                "feedback_required_file_missing",
                &[("required_path", required_path), ("source", source)],
            ),
            None => Ok(format!(
                "The required file {} was not found in {}.",
                required_path, source
            )),
        }
    }
}

fn render_feedback(template: &str, field: &str, values: &[(&str, &str)]) -> Result<String> {
    format_template(template, values)
        .map_err(|e| VerifyError::configuration(format!("{} template is invalid: {}", field, e)))
}

/// One check applied to captured stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationRule {
    OutputContains {
        text: String,
        #[serde(default)]
        message: Option<String>,
    },
    DataframeOutput(DataframeExpectation),
}

/// Expected dataframe summary; absent fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataframeExpectation {
    pub shape: Option<ExpectedValue>,
    pub columns: Option<ExpectedValue>,
    pub head: Option<ExpectedValue>,
    pub dtypes: Option<ExpectedDtypes>,
}

/// An expectation given either structurally or as the text a script prints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    List(Vec<serde_json::Value>),
    Text(String),
}

impl ExpectedValue {
    /// List items rendered as plain strings (JSON strings unquoted).
    pub fn items(&self) -> Option<Vec<String>> {
        match self {
            ExpectedValue::List(items) => Some(
                items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            ExpectedValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedDtypes {
    Map(BTreeMap<String, String>),
    Text(String),
}
