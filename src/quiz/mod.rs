pub mod ai_helper;
pub mod export;
pub mod grading;
pub mod pending;
pub mod prompt;
pub mod response;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use grading::GradingMode;

/// Upper bound on questions per session.
pub const MAX_QUESTIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "PL/I")]
    Pli,
    #[serde(rename = "Db2")]
    Db2,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Pli, Topic::Db2];

    pub fn label(&self) -> &'static str {
        match self {
            Topic::Pli => "PL/I",
            Topic::Db2 => "Db2",
        }
    }

    pub fn subtopics(&self) -> &'static [&'static str] {
        match self {
            Topic::Pli => &[
                "Data Types",
                "Structures",
                "I/O Operations",
                "Conditions",
                "Built-in Functions",
            ],
            Topic::Db2 => &["SQL DML", "SQL DDL", "Indexing", "Joins", "Constraints"],
        }
    }

    /// Accepts the display label as well as the bare `PLI` / `DB2` spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "PL/I" | "PLI" | "PL1" => Some(Topic::Pli),
            "DB2" => Some(Topic::Db2),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Junior,
    Mid,
    Senior,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Junior, Difficulty::Mid, Difficulty::Senior];

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Junior => "Junior",
            Difficulty::Mid => "Mid",
            Difficulty::Senior => "Senior",
        }
    }

    /// What questions at this level should concentrate on.
    pub fn focus(&self) -> &'static str {
        match self {
            Difficulty::Junior => {
                "basic concepts, syntax, and fundamental principles. Questions should test foundational knowledge."
            }
            Difficulty::Mid => {
                "practical applications, common patterns, and moderately complex scenarios. Questions should test working knowledge."
            }
            Difficulty::Senior => {
                "architectural decisions, performance tuning, best practices, and advanced troubleshooting. Questions should test mastery-level expertise."
            }
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.label().eq_ignore_ascii_case(label.trim()))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the question service needs to know to produce one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub topic: Topic,
    pub difficulty: Difficulty,
    pub subtopic: Option<String>,
}

impl GenerationRequest {
    pub fn new(topic: Topic, difficulty: Difficulty) -> Self {
        Self {
            topic,
            difficulty,
            subtopic: None,
        }
    }

    pub fn with_subtopic(mut self, subtopic: impl Into<String>) -> Self {
        self.subtopic = Some(subtopic.into());
        self
    }
}

/// A generated question. Built once from a parsed reply and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    topic: Topic,
    difficulty: Difficulty,
    subtopic: Option<String>,
    prompt_text: String,
    expected_answer: String,
    options: Vec<String>,
    explanation: Option<String>,
}

impl Question {
    pub fn new(
        topic: Topic,
        difficulty: Difficulty,
        prompt_text: impl Into<String>,
        expected_answer: impl Into<String>,
    ) -> Self {
        Self {
            topic,
            difficulty,
            subtopic: None,
            prompt_text: prompt_text.into(),
            expected_answer: expected_answer.into(),
            options: Vec::new(),
            explanation: None,
        }
    }

    pub fn with_subtopic(mut self, subtopic: Option<String>) -> Self {
        self.subtopic = subtopic;
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_explanation(mut self, explanation: Option<String>) -> Self {
        self.explanation = explanation;
        self
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn subtopic(&self) -> Option<&str> {
        self.subtopic.as_deref()
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn expected_answer(&self) -> &str {
        &self.expected_answer
    }

    /// Answer choices; empty for free-text questions.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    question: Question,
    user_answer: String,
    is_correct: bool,
    answered_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(
        question: Question,
        user_answer: impl Into<String>,
        is_correct: bool,
        answered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            question,
            user_answer: user_answer.into(),
            is_correct,
            answered_at,
        }
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn user_answer(&self) -> &str {
        &self.user_answer
    }

    pub fn is_correct(&self) -> bool {
        self.is_correct
    }

    pub fn answered_at(&self) -> DateTime<Utc> {
        self.answered_at
    }
}

/// One run of the quiz, from the first question to the export.
///
/// A question must be [`present`](Session::present)ed before it can be graded,
/// and grading consumes it, so every attempt belongs to a question the user saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    student: String,
    topic: Topic,
    subtopic: Option<String>,
    difficulty: Difficulty,
    planned: usize,
    started_at: DateTime<Utc>,
    attempts: Vec<Attempt>,
    presented: Option<Question>,
}

impl Session {
    pub fn new(
        student: impl Into<String>,
        topic: Topic,
        subtopic: Option<String>,
        difficulty: Difficulty,
        planned: usize,
    ) -> Self {
        Self::starting_at(student, topic, subtopic, difficulty, planned, Utc::now())
    }

    pub fn starting_at(
        student: impl Into<String>,
        topic: Topic,
        subtopic: Option<String>,
        difficulty: Difficulty,
        planned: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            student: student.into(),
            topic,
            subtopic,
            difficulty,
            planned: planned.clamp(1, MAX_QUESTIONS),
            started_at,
            attempts: Vec::new(),
            presented: None,
        }
    }

    pub fn generation_request(&self) -> GenerationRequest {
        let request = GenerationRequest::new(self.topic, self.difficulty);
        match &self.subtopic {
            Some(subtopic) => request.with_subtopic(subtopic.clone()),
            None => request,
        }
    }

    /// Marks `question` as shown to the user and waiting for an answer.
    pub fn present(&mut self, question: Question) -> Result<&Question, SessionError> {
        if self.is_complete() {
            return Err(SessionError::Complete(self.planned));
        }
        if self.presented.is_some() {
            return Err(SessionError::AlreadyPresented);
        }
        Ok(&*self.presented.insert(question))
    }

    pub fn presented(&self) -> Option<&Question> {
        self.presented.as_ref()
    }

    /// Drops the waiting question without grading it.
    pub fn withdraw(&mut self) -> Option<Question> {
        self.presented.take()
    }

    /// Grades the waiting question and appends the attempt to the transcript.
    pub fn grade(&mut self, user_answer: &str, mode: GradingMode) -> Result<&Attempt, SessionError> {
        self.grade_at(user_answer, mode, Utc::now())
    }

    pub fn grade_at(
        &mut self,
        user_answer: &str,
        mode: GradingMode,
        answered_at: DateTime<Utc>,
    ) -> Result<&Attempt, SessionError> {
        let question = self.presented.take().ok_or(SessionError::NothingPresented)?;
        let attempt = grading::grade_at(question, user_answer, mode, answered_at);
        self.attempts.push(attempt);
        Ok(&self.attempts[self.attempts.len() - 1])
    }

    pub fn student(&self) -> &str {
        &self.student
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn subtopic(&self) -> Option<&str> {
        self.subtopic.as_deref()
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn score(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_correct()).count()
    }

    pub fn total(&self) -> usize {
        self.attempts.len()
    }

    pub fn planned(&self) -> usize {
        self.planned
    }

    pub fn is_complete(&self) -> bool {
        self.attempts.len() >= self.planned
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    pub(crate) fn call_question() -> Question {
        Question::new(
            Topic::Pli,
            Difficulty::Junior,
            "What does the PLI CALL statement do?",
            "invokes a subroutine",
        )
    }

    fn session(planned: usize) -> Session {
        Session::starting_at("Ada Lovelace", Topic::Pli, None, Difficulty::Junior, planned, fixed_time())
    }

    #[test]
    fn topic_labels_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_label(topic.label()), Some(topic));
        }
        assert_eq!(Topic::from_label("pli"), Some(Topic::Pli));
        assert_eq!(Topic::from_label("COBOL"), None);
    }

    #[test]
    fn difficulty_parses_case_insensitively() {
        assert_eq!(Difficulty::from_label(" senior "), Some(Difficulty::Senior));
        assert_eq!(Difficulty::from_label("expert"), None);
    }

    #[test]
    fn grading_requires_a_presented_question() {
        let mut session = session(2);
        assert_eq!(
            session.grade("anything", GradingMode::Exact).unwrap_err(),
            SessionError::NothingPresented
        );
        assert!(session.attempts().is_empty());
    }

    #[test]
    fn grading_consumes_the_presented_question() {
        let mut session = session(2);
        session.present(call_question()).unwrap();
        let attempt = session
            .grade_at("Invokes a subroutine.", GradingMode::Exact, fixed_time())
            .unwrap();
        assert!(attempt.is_correct());
        assert!(session.presented().is_none());
        assert_eq!(
            session.grade("again", GradingMode::Exact).unwrap_err(),
            SessionError::NothingPresented
        );
        assert_eq!(session.total(), 1);
    }

    #[test]
    fn only_one_question_waits_at_a_time() {
        let mut session = session(3);
        session.present(call_question()).unwrap();
        assert_eq!(
            session.present(call_question()).unwrap_err(),
            SessionError::AlreadyPresented
        );
        assert!(session.withdraw().is_some());
        assert!(session.present(call_question()).is_ok());
    }

    #[test]
    fn complete_session_refuses_more_questions() {
        let mut session = session(1);
        session.present(call_question()).unwrap();
        session.grade("no idea", GradingMode::Exact).unwrap();
        assert!(session.is_complete());
        assert_eq!(
            session.present(call_question()).unwrap_err(),
            SessionError::Complete(1)
        );
    }

    #[test]
    fn score_counts_correct_attempts() {
        let mut session = session(3);
        for answer in ["invokes a subroutine", "declares a variable", "INVOKES A SUBROUTINE"] {
            session.present(call_question()).unwrap();
            session.grade(answer, GradingMode::Exact).unwrap();
        }
        let correct = session.attempts().iter().filter(|a| a.is_correct()).count();
        assert_eq!(session.score(), correct);
        assert_eq!(session.score(), 2);
        assert_eq!(session.total(), 3);
    }

    #[test]
    fn planned_count_is_clamped() {
        assert_eq!(session(0).planned(), 1);
        assert_eq!(session(500).planned(), MAX_QUESTIONS);
    }
}
