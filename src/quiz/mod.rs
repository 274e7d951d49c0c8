//! Question sets and quiz identifiers
//!
//! This module contains the immutable quiz content a session is created
//! from: the ordered [`QuestionSet`], its [`question::Question`]s, and the
//! scoring rules applied to submitted answers.

pub mod question;
pub mod scoring;

use std::{fmt::Display, str::FromStr, time::Duration};

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

use crate::constants::quiz::{MAX_QUESTION_COUNT, MAX_TITLE_LENGTH, MIN_QUESTION_COUNT};

use question::Question;

/// Identifier of a quiz, and of the live session running it
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct QuizId(Uuid);

impl QuizId {
    /// Creates a new random quiz identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QuizId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for QuizId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for QuizId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for QuizId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Validates that a duration falls within specified bounds.
///
/// This is a custom validation function for use with the `garde` crate.
/// It checks if the duration in whole seconds is within the inclusive range
/// defined by `MIN_SECONDS` and `MAX_SECONDS`.
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is outside the specified bounds.
pub fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
    _ctx: &(),
) -> garde::Result {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

/// An ordered, immutable list of questions
///
/// Loaded once when a session is created and never modified while the
/// session is alive.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct QuestionSet {
    /// Display title of the quiz
    #[garde(length(chars, max = MAX_TITLE_LENGTH))]
    #[serde(default)]
    title: String,

    /// The questions in delivery order
    #[garde(length(min = MIN_QUESTION_COUNT, max = MAX_QUESTION_COUNT), dive)]
    questions: Vec<Question>,
}

impl QuestionSet {
    /// Creates a question set from a title and its questions
    pub fn new(title: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            title: title.into(),
            questions,
        }
    }

    /// Returns the title of the quiz
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the question at `index`, if any
    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Returns all questions in delivery order
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Returns the number of questions
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Checks if the set contains no questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::quiz::question::{Kind, Label};
    use enum_map::enum_map;

    fn short(text: &str, answer: &str) -> Question {
        Question::new(
            text,
            Kind::ShortAnswer {
                correct: answer.to_owned(),
            },
            1,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_question_set_validation() {
        let set = QuestionSet::new("Capitals", vec![short("Capital of France?", "Paris")]);
        assert!(set.validate().is_ok());
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
        assert_eq!(set.title(), "Capitals");
    }

    #[test]
    fn test_question_set_empty_rejected() {
        let set = QuestionSet::new("Empty", vec![]);
        assert!(set.validate().is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_question_set_too_many_questions() {
        let questions = (0..=MAX_QUESTION_COUNT)
            .map(|i| short(&format!("Question {i}"), "x"))
            .collect();
        assert!(QuestionSet::new("Long", questions).validate().is_err());
    }

    #[test]
    fn test_question_set_title_too_long() {
        let set = QuestionSet::new("a".repeat(MAX_TITLE_LENGTH + 1), vec![short("Q", "A")]);
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_question_set_dives_into_questions() {
        let bad = Question::new(
            "Too quick",
            Kind::MultipleChoice {
                options: enum_map! {
                    Label::A => "1".to_owned(),
                    Label::B => "2".to_owned(),
                    Label::C => "3".to_owned(),
                    Label::D => "4".to_owned(),
                },
                correct: Label::A,
            },
            1,
            Duration::from_secs(5),
        );
        assert!(QuestionSet::new("Bad", vec![bad]).validate().is_err());
    }

    #[test]
    fn test_question_set_deserialization() {
        let json = r#"{
            "title": "Geography",
            "questions": [
                {
                    "id": "6f1c1f4e-8a1b-4c53-9e1a-0d6a3c3f1b2a",
                    "text": "Largest ocean?",
                    "type": "multiple_choice",
                    "options": {"A": "Atlantic", "B": "Pacific", "C": "Indian", "D": "Arctic"},
                    "correct": "B",
                    "points": 10,
                    "time_limit": 30
                },
                {
                    "id": "0b7d5c1e-2f43-4d8e-8f77-1c0f3a9e6d55",
                    "text": "Capital of Japan?",
                    "type": "short_answer",
                    "correct": "Tokyo"
                }
            ]
        }"#;

        let set: QuestionSet = serde_json::from_str(json).expect("valid question set");
        assert!(set.validate().is_ok());
        assert_eq!(set.len(), 2);

        let second = set.get(1).expect("second question");
        assert_eq!(second.points(), 1);
        assert_eq!(second.time_limit(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_duration_bounds() {
        assert!(validate_duration::<10, 20>(&Duration::from_secs(10), &()).is_ok());
        assert!(validate_duration::<10, 20>(&Duration::from_secs(20), &()).is_ok());
        assert!(validate_duration::<10, 20>(&Duration::from_secs(9), &()).is_err());
        assert!(validate_duration::<10, 20>(&Duration::from_secs(21), &()).is_err());
    }

    #[test]
    fn test_quiz_id_round_trip_through_string() {
        let id = QuizId::new();
        let parsed: QuizId = id.to_string().parse().expect("valid uuid");
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<QuizId>().is_err());
    }
}
