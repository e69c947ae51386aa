use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};

/// OpenAI judge implementation
pub struct OpenAiJudge {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiJudge {
    /// Create a new OpenAI judge with the given API key and model
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        Self { client, model }
    }
}

const SYSTEM_PROMPT: &str =
    "You are a strict judge for an Arabic word category game. Answer with JSON only, no prose.";

#[async_trait]
impl AnswerJudge for OpenAiJudge {
    async fn judge(&self, request: ValidationRequest) -> JudgeResult<Vec<Verdict>> {
        let user_content = judge_prompt(&request);

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .response_format(ResponseFormat::JsonObject)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()
                    .map_err(|e| JudgeError::Api(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_content)
                    .build()
                    .map_err(|e| JudgeError::Api(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| JudgeError::Api(e.to_string()))?;

        // Execute with timeout
        let response =
            tokio::time::timeout(request.timeout, self.client.chat().create(chat_request))
                .await
                .map_err(|_| JudgeError::Timeout(request.timeout))?
                .map_err(|e| JudgeError::Api(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| JudgeError::Parse("No content in response".to_string()))?;

        parse_verdicts(&text)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
