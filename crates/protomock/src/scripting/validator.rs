//! Load-time script checks.
//!
//! Scripts are only parsed here, never evaluated: evaluation needs a request
//! and happens per call inside the sandbox.

use boa_engine::{Context, Script, Source};
use thiserror::Error;

/// Checks a script before it is admitted into a route table.
pub trait ScriptValidator {
    type Error: std::error::Error + Clone;

    fn validate(&self, script: &str) -> Result<(), Self::Error>;

    /// Validate several `(id, script)` pairs, keeping every result.
    fn validate_batch<'a>(
        &self,
        scripts: &[(&'a str, &str)],
    ) -> Vec<(&'a str, Result<(), Self::Error>)> {
        scripts
            .iter()
            .map(|(id, script)| (*id, self.validate(script)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptValidationError {
    #[error("syntax error: {0}")]
    Syntax(String),
}

/// Parses JavaScript with the same engine the sandbox runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsValidator;

impl JsValidator {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptValidator for JsValidator {
    type Error = ScriptValidationError;

    fn validate(&self, script: &str) -> Result<(), Self::Error> {
        let mut context = Context::default();
        Script::parse(Source::from_bytes(script.as_bytes()), None, &mut context)
            .map(|_| ())
            .map_err(|e| ScriptValidationError::Syntax(e.to_string()))
    }
}
