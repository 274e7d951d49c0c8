//! Quiz questions and their sanitized views
//!
//! A [`Question`] holds its correct answer. Only the answer evaluator and
//! driver connections ever see it; everything broadcast to students goes
//! through [`QuestionView`], which has no answer field at all.

use std::{fmt::Display, time::Duration};

use enum_map::{Enum, EnumMap};
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    constants::question::{
        MAX_ANSWER_LENGTH, MAX_OPTION_LENGTH, MAX_POINTS, MAX_TEXT_LENGTH, MAX_TIME_LIMIT,
        MIN_POINTS, MIN_TEXT_LENGTH, MIN_TIME_LIMIT,
    },
    participant::Id,
};

use super::validate_duration;

/// Label of a multiple choice option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum Label {
    /// First option
    A,
    /// Second option
    B,
    /// Third option
    C,
    /// Fourth option
    D,
}

impl Label {
    /// Parses a submitted option label
    ///
    /// Matching is exact: `"a"` or `" A"` are not labels.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            _ => None,
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        f.write_str(label)
    }
}

fn validate_options(options: &EnumMap<Label, String>, _ctx: &()) -> garde::Result {
    for (label, option) in options {
        let length = option.trim().chars().count();
        if length == 0 || length > MAX_OPTION_LENGTH {
            return Err(garde::Error::new(format!(
                "option {label} must be between 1 and {MAX_OPTION_LENGTH} characters",
            )));
        }
    }
    Ok(())
}

/// The answer format of a question, along with its correct answer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kind {
    /// Four labelled options, one of which is correct
    MultipleChoice {
        /// The option text for each label
        #[garde(custom(validate_options))]
        options: EnumMap<Label, String>,
        /// The label of the correct option
        #[garde(skip)]
        correct: Label,
    },
    /// A free text answer compared case-insensitively
    ShortAnswer {
        /// The expected answer
        #[garde(length(chars, min = 1, max = MAX_ANSWER_LENGTH))]
        correct: String,
    },
}

/// Discriminant of [`Kind`] without the answer data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// See [`Kind::MultipleChoice`]
    MultipleChoice,
    /// See [`Kind::ShortAnswer`]
    ShortAnswer,
}

impl Kind {
    /// Returns the type of this question without its answer
    pub fn question_type(&self) -> QuestionType {
        match self {
            Self::MultipleChoice { .. } => QuestionType::MultipleChoice,
            Self::ShortAnswer { .. } => QuestionType::ShortAnswer,
        }
    }
}

fn default_points() -> u64 {
    1
}

fn default_time_limit() -> Duration {
    Duration::from_secs(60)
}

/// A single quiz question
#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Question {
    /// Identifier of the question in the authoritative store
    #[garde(skip)]
    id: Id,
    /// The question being asked
    #[garde(length(chars, min = MIN_TEXT_LENGTH, max = MAX_TEXT_LENGTH))]
    text: String,
    /// Answer format and correct answer
    #[serde(flatten)]
    #[garde(dive)]
    kind: Kind,
    /// Points awarded for a correct answer before any bonus
    #[garde(range(min = MIN_POINTS, max = MAX_POINTS))]
    #[serde(default = "default_points")]
    points: u64,
    /// Time students have to answer
    #[garde(custom(validate_duration::<MIN_TIME_LIMIT, MAX_TIME_LIMIT>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_time_limit")]
    time_limit: Duration,
}

/// A question as broadcast to students: the correct answer is not part of it
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    /// Identifier of the question
    pub id: Id,
    /// Position of the question in the set
    pub index: usize,
    /// Number of questions in the set
    pub count: usize,
    /// The question being asked
    pub text: String,
    /// Answer format
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Option texts, for multiple choice questions only
    pub options: Option<EnumMap<Label, String>>,
    /// Points awarded for a correct answer before any bonus
    pub points: u64,
    /// Time students have to answer
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub time_limit: Duration,
}

impl Question {
    /// Creates a question with a freshly generated identifier
    pub fn new(text: impl Into<String>, kind: Kind, points: u64, time_limit: Duration) -> Self {
        Self {
            id: Id::new(),
            text: text.into(),
            kind,
            points,
            time_limit,
        }
    }

    /// Returns the question's identifier
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the question text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the answer format and correct answer
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Returns the base point value
    pub fn points(&self) -> u64 {
        self.points
    }

    /// Returns the answering time limit
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Returns the correct answer as it would be shown to a driver
    pub fn correct_answer(&self) -> String {
        match &self.kind {
            Kind::MultipleChoice { correct, .. } => correct.to_string(),
            Kind::ShortAnswer { correct } => correct.clone(),
        }
    }

    /// Checks a submitted answer against the correct one
    ///
    /// Multiple choice answers must name the correct label exactly. Short
    /// answers are compared after trimming and lowercasing both sides.
    pub fn is_correct(&self, answer: &str) -> bool {
        match &self.kind {
            Kind::MultipleChoice { correct, .. } => Label::parse(answer) == Some(*correct),
            Kind::ShortAnswer { correct } => clean_answer(answer) == clean_answer(correct),
        }
    }

    /// Builds the sanitized view of this question
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the question in its set
    /// * `count` - Number of questions in the set
    pub fn view(&self, index: usize, count: usize) -> QuestionView {
        QuestionView {
            id: self.id,
            index,
            count,
            text: self.text.clone(),
            question_type: self.kind.question_type(),
            options: match &self.kind {
                Kind::MultipleChoice { options, .. } => Some(options.clone()),
                Kind::ShortAnswer { .. } => None,
            },
            points: self.points,
            time_limit: self.time_limit,
        }
    }
}

/// Normalizes a short answer for comparison
fn clean_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}
