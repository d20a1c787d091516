//! Transcript export.
//!
//! Both formats list the attempts in the order they were answered and contain
//! nothing that is not part of the session, so the same session always
//! exports to the same bytes.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::error::ExportError;
use crate::quiz::{Difficulty, Session, Topic};

const RULE_WIDTH: usize = 60;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Serialize)]
struct JsonTranscript<'a> {
    attempts: Vec<JsonAttempt<'a>>,
    score: usize,
    total: usize,
}

#[derive(Serialize)]
struct JsonAttempt<'a> {
    topic: Topic,
    difficulty: Difficulty,
    prompt: &'a str,
    answer: &'a str,
    correct: bool,
}

pub fn export(session: &Session, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Txt => Ok(to_txt(session).into_bytes()),
        ExportFormat::Json => Ok(to_json(session)?.into_bytes()),
    }
}

pub fn to_json(session: &Session) -> Result<String, serde_json::Error> {
    let transcript = JsonTranscript {
        attempts: session
            .attempts()
            .iter()
            .map(|a| JsonAttempt {
                topic: a.question().topic(),
                difficulty: a.question().difficulty(),
                prompt: a.question().prompt_text(),
                answer: a.user_answer(),
                correct: a.is_correct(),
            })
            .collect(),
        score: session.score(),
        total: session.total(),
    };
    serde_json::to_string_pretty(&transcript)
}

pub fn percentage(session: &Session) -> f64 {
    if session.total() == 0 {
        return 0.0;
    }
    session.score() as f64 * 100.0 / session.total() as f64
}

pub fn letter_grade(percentage: f64) -> &'static str {
    match percentage {
        p if p >= 90.0 => "A - Excellent",
        p if p >= 80.0 => "B - Very Good",
        p if p >= 70.0 => "C - Good",
        p if p >= 60.0 => "D - Passing",
        _ => "F - Needs Improvement",
    }
}

pub fn to_txt(session: &Session) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let percentage = percentage(session);

    let mut lines = vec![
        heavy.clone(),
        "QUIZ RESULT REPORT".to_string(),
        heavy.clone(),
        String::new(),
        format!("Student Name: {}", session.student()),
        format!("Started: {}", session.started_at().format(TIME_FORMAT)),
        format!("Topic: {}", session.topic()),
        format!("Subtopic: {}", session.subtopic().unwrap_or("Any")),
        format!("Difficulty Level: {}", session.difficulty()),
        String::new(),
        format!("Total Questions: {}", session.total()),
        format!("Correct Answers: {}", session.score()),
        format!("Incorrect Answers: {}", session.total() - session.score()),
        format!("Score: {:.1}%", percentage),
        format!("Grade: {}", letter_grade(percentage)),
        String::new(),
        light.clone(),
        "DETAILED ANSWERS".to_string(),
        light,
    ];

    for (i, attempt) in session.attempts().iter().enumerate() {
        let question = attempt.question();
        lines.push(String::new());
        lines.push(format!("Question {}: {}", i + 1, question.prompt_text()));
        lines.push(format!("Your Answer: {}", attempt.user_answer()));
        lines.push(format!("Correct Answer: {}", question.expected_answer()));
        lines.push(format!(
            "Result: {}",
            if attempt.is_correct() { "CORRECT" } else { "INCORRECT" }
        ));
        lines.push(format!("Answered: {}", attempt.answered_at().format(TIME_FORMAT)));
    }

    lines.push(String::new());
    lines.push(heavy.clone());
    lines.push("END OF REPORT".to_string());
    lines.push(heavy);
    lines.join("\n") + "\n"
}

/// Shortens a student name for use in file names.
///
/// "John Doe" becomes "JDoe", "Jane Smith Johnson" becomes "JSJohnson".
pub fn abbreviate_name(name: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();
    let abbreviated: String = match parts.as_slice() {
        [] => String::new(),
        [single] => single.chars().take(10).collect(),
        [init @ .., last] => init
            .iter()
            .filter_map(|p| p.chars().next())
            .chain(last.chars())
            .collect(),
    };
    let abbreviated: String = abbreviated
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(15)
        .collect();
    if abbreviated.is_empty() {
        "unknown".to_string()
    } else {
        abbreviated
    }
}

pub fn file_stem(session: &Session) -> String {
    format!(
        "quiz_result_{}_{}",
        abbreviate_name(session.student()),
        session.started_at().format("%Y%m%d_%H%M%S")
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedResults {
    pub txt: PathBuf,
    pub json: PathBuf,
}

/// Writes the TXT and JSON transcripts into `dir`, creating it if needed.
pub fn save_results(session: &Session, dir: &Path) -> Result<SavedResults, ExportError> {
    let json = export(session, ExportFormat::Json)?;
    let txt = export(session, ExportFormat::Txt)?;

    fs::create_dir_all(dir)?;
    let stem = file_stem(session);
    let saved = SavedResults {
        txt: dir.join(format!("{stem}.{}", ExportFormat::Txt.extension())),
        json: dir.join(format!("{stem}.{}", ExportFormat::Json.extension())),
    };
    fs::write(&saved.txt, txt)?;
    fs::write(&saved.json, json)?;

    info!("Saved results to {}", saved.txt.display());
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::grading::GradingMode;
    use crate::quiz::tests::{call_question, fixed_time};
    use crate::quiz::Question;

    fn played_session(answers: &[&str]) -> Session {
        let mut session = Session::starting_at(
            "Jane Smith Johnson",
            Topic::Pli,
            Some("Conditions".to_string()),
            Difficulty::Junior,
            answers.len(),
            fixed_time(),
        );
        for answer in answers {
            session.present(call_question()).unwrap();
            session
                .grade_at(answer, GradingMode::Exact, fixed_time())
                .unwrap();
        }
        session
    }

    #[test]
    fn json_has_the_documented_shape() {
        let session = played_session(&["Invokes a subroutine.", "it loops"]);
        let value: serde_json::Value = serde_json::from_str(&to_json(&session).unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "attempts": [
                    {
                        "topic": "PL/I",
                        "difficulty": "Junior",
                        "prompt": "What does the PLI CALL statement do?",
                        "answer": "Invokes a subroutine.",
                        "correct": true
                    },
                    {
                        "topic": "PL/I",
                        "difficulty": "Junior",
                        "prompt": "What does the PLI CALL statement do?",
                        "answer": "it loops",
                        "correct": false
                    }
                ],
                "score": 1,
                "total": 2
            })
        );
    }

    #[test]
    fn both_formats_list_every_attempt() {
        for answers in [&[][..], &["a"][..], &["invokes a subroutine", "b", "c"][..]] {
            let session = played_session(answers);
            let txt = to_txt(&session);
            let json: serde_json::Value =
                serde_json::from_slice(&export(&session, ExportFormat::Json).unwrap()).unwrap();

            assert_eq!(txt.matches("\nQuestion ").count(), session.total());
            assert_eq!(json["attempts"].as_array().unwrap().len(), session.total());
            assert_eq!(json["total"], session.total());
        }
    }

    #[test]
    fn exported_score_matches_correct_attempts() {
        let session = played_session(&["invokes a subroutine", "nope", "INVOKES A SUBROUTINE!"]);
        let correct = session.attempts().iter().filter(|a| a.is_correct()).count();
        let json: serde_json::Value = serde_json::from_str(&to_json(&session).unwrap()).unwrap();

        assert_eq!(json["score"], correct);
        assert_eq!(session.score(), correct);
        assert!(to_txt(&session).contains("Correct Answers: 2\n"));
    }

    #[test]
    fn export_is_stable() {
        let session = played_session(&["invokes a subroutine", "nope"]);
        for format in [ExportFormat::Txt, ExportFormat::Json] {
            assert_eq!(
                export(&session, format).unwrap(),
                export(&session.clone(), format).unwrap()
            );
        }
    }

    #[test]
    fn txt_report_contains_details() {
        let session = played_session(&["invokes a subroutine", "nope"]);
        let txt = to_txt(&session);
        assert!(txt.contains("Student Name: Jane Smith Johnson"));
        assert!(txt.contains("Subtopic: Conditions"));
        assert!(txt.contains("Score: 50.0%"));
        assert!(txt.contains("Grade: F - Needs Improvement"));
        assert!(txt.contains("Result: CORRECT\n"));
        assert!(txt.contains("Result: INCORRECT\n"));
        assert!(txt.contains("Started: 2024-03-01 09:30:00 UTC"));
    }

    #[test]
    fn attempts_stay_in_answer_order() {
        let mut session = Session::starting_at("Ada", Topic::Db2, None, Difficulty::Mid, 2, fixed_time());
        for prompt in ["First?", "Second?"] {
            session
                .present(Question::new(Topic::Db2, Difficulty::Mid, prompt, "x"))
                .unwrap();
            session.grade_at("x", GradingMode::Exact, fixed_time()).unwrap();
        }
        let txt = to_txt(&session);
        let first = txt.find("Question 1: First?").unwrap();
        let second = txt.find("Question 2: Second?").unwrap();
        assert!(first < second);
    }

    #[test]
    fn letter_grades_follow_the_cut_offs() {
        assert_eq!(letter_grade(100.0), "A - Excellent");
        assert_eq!(letter_grade(90.0), "A - Excellent");
        assert_eq!(letter_grade(85.0), "B - Very Good");
        assert_eq!(letter_grade(70.0), "C - Good");
        assert_eq!(letter_grade(60.0), "D - Passing");
        assert_eq!(letter_grade(59.9), "F - Needs Improvement");
    }

    #[test]
    fn abbreviates_names() {
        assert_eq!(abbreviate_name("John Doe"), "JDoe");
        assert_eq!(abbreviate_name("Jane Smith Johnson"), "JSJohnson");
        assert_eq!(abbreviate_name("Maximilianus"), "Maximilian");
        assert_eq!(abbreviate_name("  "), "unknown");
        assert_eq!(abbreviate_name("O'Brien"), "OBrien");
        assert_eq!(abbreviate_name("A Bartholomew-Featherstonehaugh"), "ABartholomewFea");
    }

    #[test]
    fn saves_both_files() {
        let dir = std::env::temp_dir().join(format!("quiz-export-test-{}", std::process::id()));
        let session = played_session(&["invokes a subroutine"]);

        let saved = save_results(&session, &dir).unwrap();
        assert_eq!(
            saved.txt.file_name().unwrap(),
            "quiz_result_JSJohnson_20240301_093000.txt"
        );
        assert_eq!(fs::read_to_string(&saved.txt).unwrap(), to_txt(&session));
        assert_eq!(fs::read_to_string(&saved.json).unwrap(), to_json(&session).unwrap());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn write_failure_is_an_export_error_and_leaves_the_session_alone() {
        let blocker = std::env::temp_dir().join(format!("quiz-export-blocker-{}", std::process::id()));
        fs::write(&blocker, "not a directory").unwrap();
        let session = played_session(&["invokes a subroutine"]);
        let before = session.clone();

        let err = save_results(&session, &blocker.join("nested")).unwrap_err();
        assert!(matches!(err, ExportError::Io(_)));
        assert_eq!(session, before);

        fs::remove_file(&blocker).unwrap();
    }
}
