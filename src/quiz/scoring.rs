//! Answer evaluation and point calculation

use std::time::Duration;

use serde::Serialize;

use crate::constants::scoring::{FAST_ANSWER_FRACTION, FAST_ANSWER_MULTIPLIER};

use super::question::Question;

/// Result of checking one submitted answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    /// Whether the answer matched the correct one
    pub correct: bool,
    /// Points awarded, including any bonus
    pub points: u64,
}

/// Calculate points for a correct answer based on timing
///
/// Answers submitted in strictly less than half of the time limit earn a 20%
/// bonus, rounded to the nearest integer. Slower answers earn the base points.
pub fn calculate_points(time_limit: Duration, time_taken: Duration, points: u64) -> u64 {
    if time_taken.as_secs_f64() < time_limit.as_secs_f64() * FAST_ANSWER_FRACTION {
        (points as f64 * FAST_ANSWER_MULTIPLIER).round() as u64
    } else {
        points
    }
}

/// Evaluates a submitted answer for `question`
pub fn evaluate(question: &Question, answer: &str, time_taken: Duration) -> Evaluation {
    let correct = question.is_correct(answer);

    Evaluation {
        correct,
        points: if correct {
            calculate_points(question.time_limit(), time_taken, question.points())
        } else {
            0
        },
    }
}
