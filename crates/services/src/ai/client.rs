use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use study_core::model::{Difficulty, Exercise, Grade};
use tracing::{debug, warn};

use crate::ai::parse::{parse_exercises, parse_grade};
use crate::ai::tutor::TutorBackend;
use crate::config::AiConfig;
use crate::error::CollaboratorError;

const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

const EXERCISE_SYSTEM_PROMPT: &str = "You are an education expert creating practice questions. \
     Your output must be valid JSON: no trailing commas, closed quotes, commas between elements.";

const EVALUATION_SYSTEM_PROMPT: &str = "You are an education expert who grades student answers \
     and gives constructive feedback. Your output must be valid JSON with score (0.0-1.0), \
     feedback and explanation fields.";

/// `TutorBackend` over an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiTutor {
    client: Client,
    config: AiConfig,
}

impl OpenAiTutor {
    /// # Errors
    ///
    /// Returns `CollaboratorError::Http` if the HTTP client cannot be built.
    pub fn new(config: AiConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Send one chat request, retrying transient failures with exponential
    /// backoff up to `max_retries` extra times.
    async fn chat(&self, system: &str, prompt: String) -> Result<String, CollaboratorError> {
        let mut attempt = 0_u32;
        loop {
            match self.chat_once(system, &prompt).await {
                Ok(content) => return Ok(content),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    let delay = RETRY_BASE_DELAY.saturating_mul(2_u32.saturating_pow(attempt));
                    warn!(
                        attempt = attempt + 1,
                        ?delay,
                        error = %err,
                        "AI tutor request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn chat_once(&self, system: &str, prompt: &str) -> Result<String, CollaboratorError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.as_str().trim_end_matches('/')
        );
        let payload = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.7,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(lift_timeout)?;

        if !response.status().is_success() {
            return Err(CollaboratorError::HttpStatus(response.status()));
        }

        let body: ChatResponse = response.json().await.map_err(lift_timeout)?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CollaboratorError::EmptyResponse)?;
        debug!(bytes = content.len(), "AI tutor replied");
        Ok(content)
    }
}

fn lift_timeout(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout
    } else {
        CollaboratorError::Http(err)
    }
}

#[async_trait]
impl TutorBackend for OpenAiTutor {
    async fn generate_exercises(
        &self,
        subject: &str,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Exercise>, CollaboratorError> {
        let prompt = format!(
            "Create {count} practice questions in English.\n\
             Subject: {subject}\nTopic: {topic}\nDifficulty: {level}\n\n\
             Each question must differ from earlier ones, cover a key concept of the topic, \
             shuffle its options and avoid \"which is NOT\" phrasing.\n\
             Return JSON shaped as:\n\
             {{\"exercises\": [{{\"question\": \"...\", \"type\": \"multiple_choice\", \
             \"options\": [\"...\", \"...\", \"...\", \"...\"], \"correct_option\": 0, \
             \"explanation\": \"...\", \"difficulty\": \"{level}\", \
             \"estimated_time_minutes\": 15}}]}}",
            level = difficulty.as_str(),
        );
        let reply = self.chat(EXERCISE_SYSTEM_PROMPT, prompt).await?;
        parse_exercises(&reply, difficulty, count)
    }

    async fn evaluate_answer(
        &self,
        subject: &str,
        topic: &str,
        question: &str,
        answer: &str,
        difficulty: Difficulty,
    ) -> Result<Grade, CollaboratorError> {
        let prompt = format!(
            "Grade the student's answer.\n\
             Subject: {subject}\nTopic: {topic}\nDifficulty: {level}\n\
             Question: {question}\nAnswer: {answer}\n\n\
             Return JSON shaped as:\n\
             {{\"score\": 0.0, \"feedback\": \"...\", \"explanation\": \"...\"}}",
            level = difficulty.as_str(),
        );
        let reply = self.chat(EVALUATION_SYSTEM_PROMPT, prompt).await?;
        parse_grade(&reply)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_json_response_format() {
        let payload = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.7,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn empty_content_is_absent() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(body.choices[0].message.content.is_none());
    }
}
