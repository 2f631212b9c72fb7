//! The model prompting service: one operation, prompt in, completion out.
//!
//! Every pipeline component takes a `&dyn ModelClient`, so the HTTP client,
//! the retry wrapper and the scripted test doubles are interchangeable.

use std::{
    cell::RefCell,
    collections::VecDeque,
    thread,
    time::Duration,
};

use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::ModelSettings;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response did not contain a completion")]
    EmptyResponse,
    #[error("invalid model configuration: {0}")]
    Config(String),
    #[error("model call gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: usize,
        last: Box<ModelError>,
    },
    #[error("{0}")]
    Unavailable(String),
}

impl ModelError {
    fn is_transient(&self) -> bool {
        match self {
            ModelError::Http(_) | ModelError::EmptyResponse => true,
            ModelError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub trait ModelClient {
    fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

impl<M: ModelClient + ?Sized> ModelClient for &M {
    fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        (**self).complete(prompt)
    }
}

impl<M: ModelClient + ?Sized> ModelClient for Box<M> {
    fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        (**self).complete(prompt)
    }
}

/// OpenAI-compatible chat completions over blocking HTTP.
pub struct HttpModelClient {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    headers: HeaderMap,
    temperature: f32,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpModelClient {
    pub fn new(settings: &ModelSettings) -> Result<Self, ModelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = settings.api_key.as_deref().filter(|key| !key.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| ModelError::Config("Invalid API key format".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            client,
            url: format!("{}/chat/completions", settings.endpoint.trim_end_matches('/')),
            model: settings.model.clone(),
            headers,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

impl ModelClient for HttpModelClient {
    fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        debug!("Sending {} prompt byte(s) to {}", prompt.len(), self.url);

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatResponse = response.json()?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

/// Retries transient model failures with linear backoff. Only model calls are
/// retried; generated code is never re-run by this wrapper.
pub struct RetryingModel<M> {
    inner: M,
    max_retries: usize,
    backoff: Duration,
}

impl<M: ModelClient> RetryingModel<M> {
    pub fn new(inner: M, max_retries: usize, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }
}

impl<M: ModelClient> ModelClient for RetryingModel<M> {
    fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.inner.complete(prompt) {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt <= self.max_retries => {
                    warn!("Model call attempt {attempt} failed: {err}; retrying");
                    thread::sleep(self.backoff * attempt as u32);
                }
                Err(err) if attempt > 1 => {
                    return Err(ModelError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Replays canned completions in order and records every prompt it saw.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ModelError::Unavailable("scripted model has no responses left".into()))
    }
}

/// Answers prompts with a closure.
pub struct FnModel<F>(pub F);

impl<F> ModelClient for FnModel<F>
where
    F: Fn(&str) -> Result<String, ModelError>,
{
    fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        (self.0)(prompt)
    }
}

/// Stands in when no model is configured; every call fails.
pub struct NoModel;

impl ModelClient for NoModel {
    fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::Unavailable(
            "no model endpoint is configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn scripted_model_replays_in_order() {
        let model = ScriptedModel::new(["one", "two"]);
        assert_eq!(model.complete("a").unwrap(), "one");
        assert_eq!(model.complete("b").unwrap(), "two");
        assert!(model.complete("c").is_err());
        assert_eq!(model.prompts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let calls = Cell::new(0);
        let flaky = FnModel(|_: &str| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ModelError::EmptyResponse)
            } else {
                Ok("done".to_string())
            }
        });
        let model = RetryingModel::new(flaky, 2, Duration::ZERO);
        assert_eq!(model.complete("p").unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_gives_up_and_skips_permanent_errors() {
        let always_empty = FnModel(|_: &str| Err(ModelError::EmptyResponse));
        let model = RetryingModel::new(always_empty, 1, Duration::ZERO);
        assert!(matches!(
            model.complete("p"),
            Err(ModelError::Exhausted { attempts: 2, .. })
        ));

        let calls = Cell::new(0);
        let forbidden = FnModel(|_: &str| {
            calls.set(calls.get() + 1);
            Err(ModelError::Status {
                status: 401,
                body: "nope".into(),
            })
        });
        let model = RetryingModel::new(forbidden, 3, Duration::ZERO);
        assert!(matches!(model.complete("p"), Err(ModelError::Status { .. })));
        assert_eq!(calls.get(), 1);
    }
}
