//! Output contract validation.
//!
//! Rules never raise: each failing rule appends feedback and evaluation
//! continues with the next rule.

use serde::{Deserialize, Serialize};

use crate::contract::ValidationRule;
use crate::dataframe;
use crate::executor::ScriptOutput;

/// `passed` is true exactly when `feedback` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub feedback: Vec<String>,
}

impl VerificationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            feedback: Vec::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: vec![message.into()],
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.feedback.push(message.into());
        self.passed = false;
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, messages: I) {
        for message in messages {
            self.push(message);
        }
    }
}

/// Evaluate every rule against captured stdout.
pub fn validate_output(rules: &[ValidationRule], stdout: &str) -> VerificationResult {
    let mut result = VerificationResult::pass();
    for rule in rules {
        match rule {
            ValidationRule::OutputContains { text, message } => {
                if !stdout.contains(text.as_str()) {
                    result.push(message.clone().unwrap_or_else(|| {
                        format!("Expected the output to contain \"{}\".", text)
                    }));
                }
            }
            ValidationRule::DataframeOutput(expect) => {
                result.extend(dataframe::compare(expect, stdout));
            }
        }
    }
    result
}

/// Feedback for a script that exited unsuccessfully: the status line, then
/// stdout and stderr verbatim.
pub fn failed_run_feedback(output: &ScriptOutput) -> VerificationResult {
    let status = match output.exit_code {
        Some(code) => format!("The script exited with status {}.", code),
        None => "The script was terminated by a signal.".to_string(),
    };
    let mut result = VerificationResult::fail(status);
    result.push(format!("stdout:\n{}", output.stdout));
    result.push(format!("stderr:\n{}", output.stderr));
    result
}

/// Validate a finished run.
pub fn evaluate_run(rules: &[ValidationRule], output: &ScriptOutput) -> VerificationResult {
    if output.success() {
        validate_output(rules, &output.stdout)
    } else {
        failed_run_feedback(output)
    }
}
