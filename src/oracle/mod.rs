mod ollama;
mod openai;

use crate::types::Category;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use ollama::OllamaJudge;
pub use openai::OpenAiJudge;

/// Result type for judge operations
pub type JudgeResult<T> = Result<T, JudgeError>;

/// Errors that can occur while consulting the judge
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("response parsing failed: {0}")]
    Parse(String),
}

/// One deduplicated answer to validate.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AnswerQuery {
    pub category: Category,
    pub answer: String,
}

/// A batch of answers for one round, judged in a single call.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// The letter every answer must start with.
    pub letter: String,
    pub categories: Vec<Category>,
    pub answers: Vec<AnswerQuery>,
    pub timeout: Duration,
}

/// The judge's verdict for one answer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub category: Category,
    pub answer: String,
    pub is_valid: bool,
}

/// External oracle deciding whether answers are real words of their category.
#[async_trait]
pub trait AnswerJudge: Send + Sync {
    /// Judge every answer in the batch. Callers never pass an empty batch.
    async fn judge(&self, request: ValidationRequest) -> JudgeResult<Vec<Verdict>>;

    fn name(&self) -> &str;
}

/// Build the judging prompt shared by all providers. Scoring itself happens
/// locally; the judge is only asked for per-answer validity.
fn judge_prompt(request: &ValidationRequest) -> String {
    let answers = serde_json::to_string(&request.answers).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are the judge in an Arabic word game. The letter for this round is "{letter}".
The categories are: {categories}.
An answer is valid only if it is a real, known Arabic word or name that fits its category and starts with the letter "{letter}".
Return a JSON object with a single key "results": an array with one object per submitted answer, each with "category", "answer" and "isValid" (boolean), in the same order as submitted.

Answers: {answers}"#,
        letter = request.letter,
        categories = request.categories.join("، "),
        answers = answers,
    )
}

#[derive(Debug, Deserialize)]
struct VerdictEnvelope {
    results: Vec<Verdict>,
}

/// Parse the model's JSON reply, tolerating markdown code fences.
fn parse_verdicts(text: &str) -> JudgeResult<Vec<Verdict>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let envelope: VerdictEnvelope =
        serde_json::from_str(body).map_err(|e| JudgeError::Parse(e.to_string()))?;
    Ok(envelope.results)
}

/// Configuration for judge providers
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI model to use
    pub openai_model: String,
    /// Ollama base URL
    pub ollama_base_url: Option<String>,
    /// Ollama model to use
    pub ollama_model: String,
    /// Timeout for judge requests
    pub timeout: Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: Some("http://localhost:11434".to_string()),
            ollama_model: "llama3.2".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl JudgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().and_then(|key| {
            let trimmed = key.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let openai_model = std::env::var("OPENAI_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| "gpt-4o-mini".to_string());

        let ollama_base_url = match std::env::var("OLLAMA_BASE_URL") {
            Ok(url) => {
                let trimmed = url.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => Some("http://localhost:11434".to_string()),
        };

        let ollama_model = std::env::var("OLLAMA_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| "llama3.2".to_string());

        Self {
            openai_api_key,
            openai_model,
            ollama_base_url,
            ollama_model,
            timeout: std::env::var("JUDGE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30)),
        }
    }

    /// Build the configured judge. OpenAI wins when both are configured.
    pub fn build_judge(&self) -> JudgeResult<Box<dyn AnswerJudge>> {
        if let Some(api_key) = &self.openai_api_key {
            return Ok(Box::new(OpenAiJudge::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        if let Some(base_url) = &self.ollama_base_url {
            return Ok(Box::new(OllamaJudge::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )));
        }

        Err(JudgeError::Config(
            "No judge provider configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
        ))
    }
}
