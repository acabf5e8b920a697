//! OpenAI provider (Chat Completions API, JSON object output).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::evaluator::EvaluatorConfig;

use super::prompt::{build_user_prompt, SYSTEM_PROMPT};
use super::reply::parse_reply;
use super::{AnswerEvaluator, EvalFuture, EvaluationRequest, EvaluatorError};

const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiEvaluator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiEvaluator {
    pub fn from_config(config: &EvaluatorConfig) -> Result<Self, EvaluatorError> {
        if config.api_key.trim().is_empty() {
            return Err(EvaluatorError::Disabled("missing OpenAI API key".into()));
        }
        let timeout_secs = config.timeout_secs.max(1);
        let http = reqwest::Client::builder()
            .user_agent(concat!("isolation-interview/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EvaluatorError::Transport(e.to_string()))?;
        let model = config
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model,
            timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn evaluate_impl(&self, req: EvaluationRequest<'_>) -> Result<super::Evaluation, EvaluatorError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let user = build_user_prompt(&req);
        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.1,
            max_tokens: 400,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EvaluatorError::Status(status.as_u16()));
        }

        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| EvaluatorError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(EvaluatorError::Malformed("empty completion".into()));
        }
        parse_reply(&content, req.question)
    }

    fn map_transport(&self, e: reqwest::Error) -> EvaluatorError {
        if e.is_timeout() {
            EvaluatorError::Timeout(self.timeout_secs)
        } else {
            EvaluatorError::Transport(e.to_string())
        }
    }
}

impl AnswerEvaluator for OpenAiEvaluator {
    fn evaluate<'a>(&'a self, request: EvaluationRequest<'a>) -> EvalFuture<'a> {
        Box::pin(self.evaluate_impl(request))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
