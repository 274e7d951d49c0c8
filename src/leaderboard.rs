//! Leaderboard and scoring projections
//!
//! Standings are a pure function of the participant registry: students
//! ordered by score descending, ties broken by join order. Drivers never
//! appear on a leaderboard.

use itertools::Itertools;
use serde::Serialize;

use super::{
    TruncatedVec,
    participant::{Id, Participant, Participants, Role},
};

/// One row of the live leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    /// Identity of the student
    pub id: Id,
    /// Display name of the student
    pub name: String,
    /// Cumulative score
    pub score: u64,
}

/// One row of the final ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalStanding {
    /// Position in the ranking (1-indexed)
    pub rank: usize,
    /// Identity of the student
    pub id: Id,
    /// Display name of the student
    pub name: String,
    /// Final score
    pub score: u64,
    /// Number of questions answered
    pub answered: usize,
    /// Number of questions answered correctly
    pub correct: usize,
}

/// Per-question statistics shown to drivers at the end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuestionStats {
    /// Students who answered the question
    pub answered: usize,
    /// Students who answered it correctly
    pub correct: usize,
}

/// Score information for a single student
///
/// Contains the student's current score and their position in the leaderboard.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ScoreMessage {
    /// Total points earned by the student
    pub points: u64,
    /// Current position in the leaderboard (1-indexed)
    pub position: usize,
}

/// Students ordered by score descending, ties by join order
fn ranked(participants: &Participants) -> impl Iterator<Item = &Participant> {
    participants
        .in_join_order(Role::Student)
        .into_iter()
        // stable sort keeps join order among equal scores
        .sorted_by(|a, b| b.score().cmp(&a.score()))
}

/// Returns the live leaderboard, truncated to `limit` rows
///
/// The exact number of students is kept alongside the truncated rows.
pub fn live(participants: &Participants, limit: usize) -> TruncatedVec<Standing> {
    TruncatedVec::new(
        ranked(participants).map(|p| Standing {
            id: p.id(),
            name: p.name().to_owned(),
            score: p.score(),
        }),
        limit,
        participants.count(Role::Student),
    )
}

/// Returns the score and position of a single student
pub fn score(participants: &Participants, id: Id) -> Option<ScoreMessage> {
    ranked(participants)
        .find_position(|p| p.id() == id)
        .map(|(position, p)| ScoreMessage {
            points: p.score(),
            position: position + 1,
        })
}

/// Returns the full ranking of every student
pub fn final_ranking(participants: &Participants) -> Vec<FinalStanding> {
    ranked(participants)
        .enumerate()
        .map(|(i, p)| FinalStanding {
            rank: i + 1,
            id: p.id(),
            name: p.name().to_owned(),
            score: p.score(),
            answered: p.answers().len(),
            correct: p.correct_count(),
        })
        .collect_vec()
}

/// Returns answered and correct counts for each of `count` questions
pub fn question_stats(participants: &Participants, count: usize) -> Vec<QuestionStats> {
    let mut stats = vec![QuestionStats::default(); count];

    for participant in participants.in_join_order(Role::Student) {
        for answer in participant.answers() {
            let Some(entry) = stats.get_mut(answer.index) else {
                continue;
            };
            entry.answered += 1;
            if answer.correct {
                entry.correct += 1;
            }
        }
    }

    stats
}

/// Summary of a finished session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalSummary {
    /// Every student with rank and totals
    pub ranking: Vec<FinalStanding>,
    /// Per-question statistics
    pub stats: Vec<QuestionStats>,
}

/// Caches the final summary of a session
///
/// Scores cannot change once a session has finished, so the summary is
/// computed at most once.
#[derive(Debug, Default)]
pub struct Leaderboard {
    final_summary: once_cell_serde::sync::OnceCell<FinalSummary>,
}

impl Leaderboard {
    /// Gets or computes the final summary
    ///
    /// # Arguments
    ///
    /// * `participants` - The registry of the finished session
    /// * `count` - Number of questions in the session
    pub fn final_summary(&self, participants: &Participants, count: usize) -> &FinalSummary {
        self.final_summary.get_or_init(|| FinalSummary {
            ranking: final_ranking(participants),
            stats: question_stats(participants, count),
        })
    }
}
