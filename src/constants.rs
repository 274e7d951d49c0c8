//! Configuration constants for the live quiz engine
//!
//! This module contains the hard limits used throughout the engine to
//! validate question sets and bound the resources a single session may use.

/// Question set constants
pub mod quiz {
    /// Minimum number of questions in a playable question set
    pub const MIN_QUESTION_COUNT: usize = 1;
    /// Maximum number of questions in a single question set
    pub const MAX_QUESTION_COUNT: usize = 100;
    /// Maximum length of a question set title in characters
    pub const MAX_TITLE_LENGTH: usize = 100;
    /// Maximum number of members (drivers and students) in one session
    pub const MAX_PARTICIPANT_COUNT: usize = 1000;
}

/// Per-question constants
pub mod question {
    /// Minimum length of a question's text
    pub const MIN_TEXT_LENGTH: usize = 1;
    /// Maximum length of a question's text
    pub const MAX_TEXT_LENGTH: usize = 1000;
    /// Maximum length of a single multiple choice option
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Maximum length of a short answer's expected text
    pub const MAX_ANSWER_LENGTH: usize = 200;
    /// Minimum points a question can be worth
    pub const MIN_POINTS: u64 = 1;
    /// Maximum points a question can be worth
    pub const MAX_POINTS: u64 = 1000;
    /// Minimum time limit in seconds for answering a question
    pub const MIN_TIME_LIMIT: u64 = 10;
    /// Maximum time limit in seconds for answering a question
    pub const MAX_TIME_LIMIT: u64 = 600;
}

/// Scoring constants
pub mod scoring {
    /// Multiplier applied to a correct answer submitted quickly
    pub const FAST_ANSWER_MULTIPLIER: f64 = 1.2;
    /// Fraction of the time limit an answer must beat to earn the bonus
    pub const FAST_ANSWER_FRACTION: f64 = 0.5;
}

/// Submitted answer constants
pub mod answer_text {
    /// Maximum length of a submitted answer in characters
    pub const MAX_LENGTH: usize = 500;
}

/// Leaderboard constants
pub mod leaderboard {
    /// Largest live leaderboard a session may be configured to broadcast
    pub const MAX_LIVE_SIZE: usize = 50;
}

/// Session timing constants
pub mod session {
    /// Longest delay in seconds before the first question is broadcast
    pub const MAX_QUESTION_DELAY: u64 = 30;
}
