use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quiz::{Attempt, Question};

/// Words shorter than this are ignored when matching keywords.
const MIN_KEYWORD_LEN: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradingMode {
    /// Normalized answers must be equal.
    #[default]
    Exact,
    /// Every significant word of the expected answer must appear in the given one.
    Keyword,
}

impl FromStr for GradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(GradingMode::Exact),
            "keyword" | "keywords" => Ok(GradingMode::Keyword),
            other => Err(format!("expected `exact` or `keyword`, got `{other}`")),
        }
    }
}

/// Sentence punctuation and quotes that may trail an answer.
const TRAILING_PUNCTUATION: &[char] = &['.', '!', '?', ',', ';', '"', '\'', '`'];
const QUOTES: &[char] = &['"', '\'', '`'];

/// Lowercases and collapses whitespace. Trailing sentence punctuation and
/// surrounding quotes are dropped only when some alphanumeric text remains,
/// so operator answers such as `||` or `-1` keep their meaning.
pub fn normalize(answer: &str) -> String {
    let collapsed = answer
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let stripped = collapsed
        .trim_end_matches(TRAILING_PUNCTUATION)
        .trim_start_matches(QUOTES)
        .trim();
    if stripped.chars().any(char::is_alphanumeric) {
        stripped.to_string()
    } else {
        collapsed
    }
}

fn words(answer: &str) -> impl Iterator<Item = &str> {
    answer
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

/// Whether `given` counts as a correct answer to a question expecting `expected`.
pub fn is_correct(expected: &str, given: &str, mode: GradingMode) -> bool {
    let expected = normalize(expected);
    let given = normalize(given);
    if given.is_empty() || expected.is_empty() {
        return false;
    }
    match mode {
        GradingMode::Exact => expected == given,
        GradingMode::Keyword => {
            let keywords: Vec<&str> = words(&expected)
                .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
                .collect();
            if keywords.is_empty() {
                return expected == given;
            }
            let given_words: HashSet<&str> = words(&given).collect();
            keywords.iter().all(|k| given_words.contains(k))
        }
    }
}

pub fn grade_at(
    question: Question,
    user_answer: &str,
    mode: GradingMode,
    answered_at: DateTime<Utc>,
) -> Attempt {
    let correct = is_correct(question.expected_answer(), user_answer, mode);
    Attempt::new(question, user_answer.trim(), correct, answered_at)
}
