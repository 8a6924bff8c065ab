//! Priority oracle client
//!
//! Turns one task plus its peers into a 1-10 score. The wire transport sits
//! behind `ScoringBackend`; everything around it (credential check, prompt,
//! answer extraction, the local gibberish check, clamping) lives here.

mod gemini;
mod prompt;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

pub use gemini::{GeminiBackend, GenerationConfig, OracleConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use prompt::build_prompt;

use crate::credential::Credential;
use crate::models::{clamp_priority, Task, FALLBACK_PRIORITY};

lazy_static! {
    static ref FIRST_NUMBER: Regex = Regex::new(r"\d+").expect("number pattern compiles");
    static ref FEW_LETTERS: Regex = Regex::new(r"^[a-zA-Z]{1,2}$").expect("letters pattern compiles");
    static ref ONLY_DIGITS: Regex = Regex::new(r"^[0-9]+$").expect("digits pattern compiles");
}

/// Oracle errors
///
/// Every variant degrades to the fallback priority at the rescoring boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("Please add your Gemini API key to enable task prioritization")]
    MissingCredential,

    #[error("Invalid API key. Please check your key.")]
    InvalidCredential,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API Error: {0}")]
    Upstream(String),

    #[error("Unusable answer from the model: {0}")]
    UnparsableResponse(String),
}

/// Transport for a single scoring request
#[async_trait::async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Sends `prompt` and returns the model's raw text answer
    async fn generate(&self, credential: &Credential, prompt: &str) -> Result<String, OracleError>;
}

/// Extracts the first run of digits in the model's answer
pub fn extract_priority(text: &str) -> Result<i64, OracleError> {
    let digits = FIRST_NUMBER
        .find(text)
        .ok_or_else(|| OracleError::UnparsableResponse(format!("no number in {:?}", text)))?;

    digits
        .as_str()
        .parse::<i64>()
        .map_err(|e| OracleError::UnparsableResponse(format!("{:?}: {}", digits.as_str(), e)))
}

/// Local check for names the model tends to over-score
///
/// A name is gibberish when, after trimming, it has no ASCII letter, is
/// shorter than three characters, is just one or two letters, or is all
/// digits.
pub fn looks_like_gibberish(name: &str) -> bool {
    let name = name.trim();
    !name.chars().any(|c| c.is_ascii_alphabetic())
        || name.chars().count() < 3
        || FEW_LETTERS.is_match(name)
        || ONLY_DIGITS.is_match(name)
}

/// Scores tasks through a `ScoringBackend`
#[derive(Clone)]
pub struct PriorityOracle {
    backend: Arc<dyn ScoringBackend>,
}

impl PriorityOracle {
    pub fn new(backend: Arc<dyn ScoringBackend>) -> Self {
        Self { backend }
    }

    /// Scores `target` against `peers`
    ///
    /// Fails fast with `MissingCredential` when no credential is given; no
    /// request is sent in that case.
    pub async fn score(
        &self,
        credential: Option<&Credential>,
        target: &Task,
        peers: &[Task],
    ) -> Result<u8, OracleError> {
        let credential = credential.ok_or(OracleError::MissingCredential)?;

        let prompt = build_prompt(target, peers);
        tracing::debug!(task = %target.id(), peers = peers.len(), "requesting priority");

        let answer = self.backend.generate(credential, &prompt).await?;
        let raw = extract_priority(&answer)?;

        if looks_like_gibberish(target.name()) {
            tracing::debug!(task = %target.id(), raw, "name looks like gibberish, forcing fallback");
            return Ok(FALLBACK_PRIORITY);
        }

        let priority = clamp_priority(raw);
        tracing::debug!(task = %target.id(), raw, priority, "priority scored");
        Ok(priority)
    }
}
