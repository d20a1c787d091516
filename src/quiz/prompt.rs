use crate::quiz::response::SCHEMA_VERSION;
use crate::quiz::GenerationRequest;

/// Number of answer choices the service is asked for.
pub const OPTION_COUNT: usize = 4;

/// The two messages sent to the chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

pub fn build(request: &GenerationRequest) -> CompletionRequest {
    CompletionRequest {
        system: system_message(request),
        user: user_message(request),
    }
}

fn system_message(request: &GenerationRequest) -> String {
    format!(
        "You are an expert in IBM Enterprise PL/I for z/OS and Db2 for z/OS SQL. \
Generate one high-quality {difficulty}-level technical quiz question suitable for mainframe developers.
All PL/I code must follow IBM Enterprise PL/I syntax as defined in the IBM Language Reference. \
All SQL must follow Db2 for z/OS syntax and EXEC SQL rules. Do not invent features or use other dialects.

Reply with EXACTLY one JSON object and nothing else (no prose, no markdown):
{{
  \"schema\": \"{schema}\",
  \"question\": \"string\",
  \"options\": [\"string\", \"string\", \"string\", \"string\"],
  \"answer\": \"string, copied verbatim from options\",
  \"explanation\": \"string, at most 30 words, why the answer is correct\"
}}
The \"options\" array must hold {count} distinct, non-empty choices and exactly one of them must be correct.",
        difficulty = request.difficulty,
        schema = SCHEMA_VERSION,
        count = OPTION_COUNT,
    )
}

fn user_message(request: &GenerationRequest) -> String {
    let subject = match &request.subtopic {
        Some(subtopic) => format!("{} - {}", request.topic, subtopic),
        None => request.topic.to_string(),
    };
    format!(
        "Generate one multiple-choice quiz question about {subject}.
Difficulty Level: {difficulty}
Focus on {focus}
The question must be technical, domain-specific and appropriate for {difficulty} developers.",
        difficulty = request.difficulty,
        focus = request.difficulty.focus(),
    )
}
