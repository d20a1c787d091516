//! Parsing of the question service's reply.
//!
//! The service is asked for one JSON object tagged with [`SCHEMA_VERSION`].
//! Anything that does not match is rejected as a whole, so a caller never sees
//! a question with a missing prompt or answer.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use crate::error::ResponseError;
use crate::quiz::grading::normalize;
use crate::quiz::{GenerationRequest, Question};

pub const SCHEMA_VERSION: &str = "quiz-question/v1";

const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 6;

#[derive(Debug, Deserialize)]
struct RawReply {
    schema: Option<String>,
    question: Option<String>,
    answer: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    explanation: Option<String>,
}

/// A reply that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub question: String,
    pub answer: String,
    pub options: Vec<String>,
    pub explanation: Option<String>,
}

impl ParsedReply {
    /// Builds the question, shuffling the options so the answer is not always first.
    pub fn into_question<R: Rng + ?Sized>(self, request: &GenerationRequest, rng: &mut R) -> Question {
        let mut options = self.options;
        options.shuffle(rng);
        Question::new(request.topic, request.difficulty, self.question, self.answer)
            .with_subtopic(request.subtopic.clone())
            .with_options(options)
            .with_explanation(self.explanation)
    }
}

/// Removes one Markdown code fence around the whole reply, if there is one.
fn strip_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // drop the info string, e.g. "json"
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => text,
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ResponseError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ResponseError::Empty(field))
}

pub fn parse(text: &str) -> Result<ParsedReply, ResponseError> {
    let raw: RawReply = serde_json::from_str(strip_fence(text))
        .map_err(|e| ResponseError::NotJson(e.to_string()))?;

    let schema = required(raw.schema, "schema")?;
    if schema != SCHEMA_VERSION {
        return Err(ResponseError::Schema(schema));
    }
    let question = required(raw.question, "question")?;
    let mut answer = required(raw.answer, "answer")?;
    let explanation = raw
        .explanation
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    let mut options = Vec::with_capacity(raw.options.len());
    if !raw.options.is_empty() {
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&raw.options.len()) {
            return Err(ResponseError::OptionCount {
                min: MIN_OPTIONS,
                max: MAX_OPTIONS,
                got: raw.options.len(),
            });
        }
        for option in raw.options {
            let option = required(Some(option), "options")?;
            if options.iter().any(|o: &String| normalize(o) == normalize(&option)) {
                return Err(ResponseError::DuplicateOption(option));
            }
            options.push(option);
        }
        // use the option's spelling so the keyboard button grades as correct
        answer = options
            .iter()
            .find(|o| normalize(o) == normalize(&answer))
            .cloned()
            .ok_or(ResponseError::AnswerNotAnOption)?;
    }

    Ok(ParsedReply {
        question,
        answer,
        options,
        explanation,
    })
}
