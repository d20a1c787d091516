use std::future::Future;
use std::time::Duration;

use chatgpt::client::ChatGPT;
use chatgpt::types::CompletionResponse;
use log::{debug, info, warn};

use crate::config::Config;
use crate::error::{ConfigurationError, GenerationError};
use crate::quiz::prompt::{self, CompletionRequest};
use crate::quiz::{response, GenerationRequest, Question};

/// Tries per question: the first call plus one retry after a transient failure.
const MAX_TRIES: u32 = 2;

/// Something that turns a prompt into free text.
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// OpenAI chat completions through `chatgpt_rs`.
pub struct ChatGptBackend {
    chat_gpt: ChatGPT,
}

impl ChatGptBackend {
    pub fn new(config: &Config) -> Result<Self, ConfigurationError> {
        let mut chat_gpt = ChatGPT::new(config.api_key.clone())
            .map_err(|e| ConfigurationError::Client(e.to_string()))?;

        chat_gpt.config.engine = config.model.engine();
        chat_gpt.config.temperature = config.temperature;
        chat_gpt.config.timeout = config.timeout;

        Ok(Self { chat_gpt })
    }
}

fn classify(err: chatgpt::err::Error) -> GenerationError {
    match err {
        chatgpt::err::Error::ClientError(e) => GenerationError::Unreachable(e.to_string()),
        other => GenerationError::Service(other.to_string()),
    }
}

impl CompletionBackend for ChatGptBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, GenerationError> {
        // a fresh conversation per question, so earlier questions never leak into the prompt
        let mut conversation = self
            .chat_gpt
            .new_conversation_directed(request.system.clone());
        let response: CompletionResponse = conversation
            .send_message(request.user.clone())
            .await
            .map_err(classify)?;

        Ok(response.message().content.clone())
    }
}

/// Generates quiz questions through a [`CompletionBackend`].
pub struct QuizHelper<B> {
    backend: B,
    timeout: Duration,
}

impl<B: CompletionBackend> QuizHelper<B> {
    pub fn new(backend: B, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Asks the service for one question.
    ///
    /// Either every field of the returned question is populated or the call fails;
    /// a network error or timeout is retried once, a malformed reply is not.
    pub async fn generate_question(
        &self,
        request: &GenerationRequest,
    ) -> Result<Question, GenerationError> {
        info!(
            "Generating a {} question about {} ({})",
            request.difficulty,
            request.topic,
            request.subtopic.as_deref().unwrap_or("any subtopic")
        );
        let prompt = prompt::build(request);
        debug!("Prompt: {:?}", prompt.user);

        let reply = self.complete_with_retry(&prompt).await?;
        debug!("Completion: {:?}", reply);

        let parsed = response::parse(&reply).map_err(|e| {
            warn!("Rejected reply from the question service: {}", e);
            GenerationError::Malformed(e)
        })?;

        Ok(parsed.into_question(request, &mut rand::thread_rng()))
    }

    async fn complete_with_retry(
        &self,
        prompt: &CompletionRequest,
    ) -> Result<String, GenerationError> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.complete_once(prompt).await {
                Err(e) if e.is_transient() && tries < MAX_TRIES => {
                    warn!("Question service failed ({}), retrying", e);
                }
                result => return result,
            }
        }
    }

    async fn complete_once(
        &self,
        prompt: &CompletionRequest,
    ) -> Result<String, GenerationError> {
        tokio::time::timeout(self.timeout, self.backend.complete(prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
    }
}
