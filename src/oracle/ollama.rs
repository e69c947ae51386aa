use super::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama judge implementation
pub struct OllamaJudge {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaJudge {
    /// Create a new Ollama judge with the given base URL and model
    pub fn new(base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            model,
            client,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    /// Constrains the model to emit valid JSON.
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    #[allow(dead_code)] // Part of Ollama API response format
    done: bool,
}

#[async_trait]
impl AnswerJudge for OllamaJudge {
    async fn judge(&self, request: ValidationRequest) -> JudgeResult<Vec<Verdict>> {
        let ollama_request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: judge_prompt(&request),
            stream: false,
            format: "json",
        };

        let url = format!("{}/api/generate", self.base_url);

        // Execute with timeout
        let response = tokio::time::timeout(
            request.timeout,
            self.client.post(&url).json(&ollama_request).send(),
        )
        .await
        .map_err(|_| JudgeError::Timeout(request.timeout))?
        .map_err(|e| JudgeError::Api(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JudgeError::Api(format!(
                "Ollama API returned status: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Parse(e.to_string()))?;

        parse_verdicts(&ollama_response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with Ollama running locally
    async fn judge_live_answers() {
        let judge =
            OllamaJudge::new("http://localhost:11434".to_string(), "llama3.2".to_string());

        let request = ValidationRequest {
            letter: "س".to_string(),
            categories: vec!["نبات".to_string()],
            answers: vec![AnswerQuery {
                category: "نبات".to_string(),
                answer: "سبانخ".to_string(),
            }],
            timeout: Duration::from_secs(30),
        };

        let verdicts = judge.judge(request).await.unwrap();
        assert_eq!(verdicts.len(), 1);
        println!("Verdicts: {verdicts:?}");
    }
}
