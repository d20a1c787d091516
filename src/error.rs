//! Error types shared by the quiz modules and the bot.

use std::time::Duration;

use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{0} is not set; export it or put it in a .env file")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("unable to create the ChatGPT client: {0}")]
    Client(String),
}

/// Why a reply from the text-generation service could not be turned into a question.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("reply is not a single JSON object: {0}")]
    NotJson(String),
    #[error("unsupported schema {0:?}")]
    Schema(String),
    #[error("field `{0}` is missing or empty")]
    Empty(&'static str),
    #[error("expected between {min} and {max} options, got {got}")]
    OptionCount { min: usize, max: usize, got: usize },
    #[error("option {0:?} appears more than once")]
    DuplicateOption(String),
    #[error("the answer is not one of the options")]
    AnswerNotAnOption,
}

/// A generation request that did not produce a question. Recoverable.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("question service unreachable: {0}")]
    Unreachable(String),
    #[error("question service did not answer within {0:?}")]
    Timeout(Duration),
    #[error("question service rejected the request: {0}")]
    Service(String),
    #[error("malformed question: {0}")]
    Malformed(#[from] ResponseError),
}

impl GenerationError {
    /// Network and timeout failures are worth one more try; a bad reply is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// Writing a transcript failed. The session itself is untouched.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unable to write results: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Misuse of the question/answer loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no question is waiting for an answer")]
    NothingPresented,
    #[error("a question is already waiting for an answer")]
    AlreadyPresented,
    #[error("all {0} questions have been answered")]
    Complete(usize),
}
