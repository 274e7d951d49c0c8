//! Core session logic and state management
//!
//! This module contains the state machine of a single live quiz session:
//! participants joining, the driver starting and advancing through the
//! questions, students submitting answers, and the messages announced to
//! every connected participant along the way.
//!
//! Nothing here blocks or awaits. Connections are reached through a
//! `tunnel_finder` and delayed events are requested through a
//! `schedule_message` callback, so the caller decides how both are
//! implemented.

use std::{fmt::Debug, time::Duration};

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::{debug, info};
use web_time::SystemTime;

use super::{
    Error, TruncatedVec,
    constants::{answer_text, leaderboard::MAX_LIVE_SIZE, session::MAX_QUESTION_DELAY},
    leaderboard::{self, FinalStanding, Leaderboard, QuestionStats, ScoreMessage, Standing},
    participant::{Actor, Id, Joined, Participants, Role, SubmittedAnswer},
    quiz::{QuestionSet, QuizId, question::QuestionView, scoring, validate_duration},
    session::Tunnel,
};

/// The phase a session is in
///
/// Sessions only ever move forward: `Lobby`, then `Running` with a
/// non-decreasing index, then `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    /// Waiting for the driver to start
    Lobby,
    /// Question `index` is the current question
    Running {
        /// Index of the current question
        index: usize,
    },
    /// All questions were asked; `index` is the last one
    Finished {
        /// Index of the last question asked
        index: usize,
    },
}

impl Status {
    /// Returns the current question index, if one is defined
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Lobby => None,
            Self::Running { index } | Self::Finished { index } => Some(index),
        }
    }
}

/// Delayed events a session asks its owner to deliver later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Broadcast question `index` if it is still the current one
    DeliverQuestion {
        /// Index of the question to broadcast
        index: usize,
    },
}

fn default_question_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_leaderboard_size() -> usize {
    10
}

/// Per-session options
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Options {
    /// Delay between "quiz started" and the first question
    #[garde(custom(validate_duration::<0, MAX_QUESTION_DELAY>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(default = "default_question_delay")]
    pub question_delay: Duration,
    /// Number of rows in the live leaderboard
    #[garde(range(min = 1, max = MAX_LIVE_SIZE))]
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            question_delay: default_question_delay(),
            leaderboard_size: default_leaderboard_size(),
        }
    }
}

/// Intents received from connected clients
///
/// The identity of the sender is resolved by the authentication layer and
/// never part of the payload.
#[serde_with::serde_as]
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// Join the session of a quiz
    Join {
        /// Quiz to join
        #[garde(skip)]
        quiz_id: QuizId,
    },
    /// Start the session (driver only)
    Start {
        /// Quiz to start
        #[garde(skip)]
        quiz_id: QuizId,
    },
    /// Move to the next question or finish (driver only)
    Advance {
        /// Quiz to advance
        #[garde(skip)]
        quiz_id: QuizId,
    },
    /// Answer the current question (students only)
    Submit {
        /// Quiz being answered
        #[garde(skip)]
        quiz_id: QuizId,
        /// Index of the question being answered
        #[garde(skip)]
        question_index: usize,
        /// The answer, a label for multiple choice questions
        #[garde(length(chars, max = answer_text::MAX_LENGTH))]
        answer: String,
        /// Seconds the student took to answer
        #[garde(skip)]
        #[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")]
        time_taken: Duration,
    },
}

impl IncomingMessage {
    /// Parses and validates an intent from its JSON form
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the text is not a known intent, a
    /// duration is negative, or a field is out of bounds.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let message: Self =
            serde_json::from_str(text).map_err(|e| Error::Malformed(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    /// Returns the quiz the intent targets
    pub fn quiz_id(&self) -> QuizId {
        match self {
            Self::Join { quiz_id }
            | Self::Start { quiz_id }
            | Self::Advance { quiz_id }
            | Self::Submit { quiz_id, .. } => *quiz_id,
        }
    }
}

/// Update messages sent to participants about session changes
#[serde_with::serde_as]
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Someone joined or rejoined
    ParticipantJoined {
        /// Identity of the participant
        id: Id,
        /// Display name of the participant
        name: String,
        /// Role of the participant
        role: Role,
        /// Whether the participant already had a record
        returning: bool,
    },
    /// Someone lost their connection
    ParticipantLeft {
        /// Identity of the participant
        id: Id,
        /// Display name of the participant
        name: String,
    },
    /// The driver started the session
    QuizStarted {
        /// Number of questions
        count: usize,
        /// Time until the first question appears
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        delay: Duration,
    },
    /// A new question, as seen by students
    Question(QuestionView),
    /// A new question, as seen by drivers
    DriverQuestion {
        /// The question
        question: QuestionView,
        /// Its correct answer
        answer: String,
    },
    /// The live leaderboard changed
    Leaderboard(TruncatedVec<Standing>),
    /// Acknowledgement of the receiver's own answer
    AnswerResult {
        /// Index of the answered question
        index: usize,
        /// Whether the answer was correct
        correct: bool,
        /// Points awarded for it
        points: u64,
        /// The receiver's new total
        total: u64,
    },
    /// The session finished
    Finished(SummaryMessage),
    /// An intent from the receiver was rejected
    Error(Error),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Sync messages sent to a participant to rebuild their whole view
///
/// Sent on join and rejoin.
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// The session has not started yet
    Lobby {
        /// Title of the quiz
        title: String,
        /// Number of questions
        count: usize,
        /// Names of the students waiting, in join order
        students: TruncatedVec<String>,
    },
    /// The session started but its first question was not broadcast yet
    Starting {
        /// Title of the quiz
        title: String,
        /// Number of questions
        count: usize,
    },
    /// A student's view of a running session
    Running {
        /// The current question
        question: QuestionView,
        /// The student's score and position
        score: Option<ScoreMessage>,
        /// The student's answer to the current question, if any
        answered: Option<SubmittedAnswer>,
        /// The live leaderboard
        leaderboard: TruncatedVec<Standing>,
    },
    /// A driver's view of a running session
    DriverRunning {
        /// The current question
        question: QuestionView,
        /// Its correct answer
        answer: String,
        /// Number of students who answered it so far
        answered: usize,
        /// The live leaderboard
        leaderboard: TruncatedVec<Standing>,
    },
    /// The session finished
    Summary(SummaryMessage),
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Final results, shaped for the receiver's role
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum SummaryMessage {
    /// Summary for students
    Student {
        /// Every student with rank and totals
        ranking: Vec<FinalStanding>,
        /// The receiver's own score and position
        own: Option<ScoreMessage>,
        /// Number of questions
        count: usize,
    },
    /// Summary for drivers, with per-question statistics
    Driver {
        /// Every student with rank and totals
        ranking: Vec<FinalStanding>,
        /// Answered and correct counts for each question
        stats: Vec<QuestionStats>,
        /// Number of questions
        count: usize,
    },
}

/// Result of a successful `advance`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advanced {
    /// Question at this index is now current
    Question(usize),
    /// The session finished at this time
    Finished(SystemTime),
}

/// Result of an accepted answer
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    /// The recorded answer
    pub answer: SubmittedAnswer,
    /// Identifier of the answered question
    pub question_id: Id,
    /// The student's new total
    pub total: u64,
}

/// A single live quiz session
pub struct Game {
    /// Quiz this session runs
    quiz_id: QuizId,
    /// The questions, fixed for the whole session
    questions: QuestionSet,
    /// Everyone who joined
    participants: Participants,
    /// Final summary cache
    leaderboard: Leaderboard,
    /// Current phase
    status: Status,
    /// Whether the current question was broadcast
    delivered: bool,
    /// When the driver started the session
    started_at: Option<SystemTime>,
    /// When the last question was advanced past
    ended_at: Option<SystemTime>,
    /// Session options
    options: Options,
}

impl Debug for Game {
    /// Custom debug implementation that avoids printing every participant
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("quiz_id", &self.quiz_id)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Game {
    /// Creates a session in the lobby
    pub fn new(quiz_id: QuizId, questions: QuestionSet, options: Options) -> Self {
        Self {
            quiz_id,
            questions,
            participants: Participants::default(),
            leaderboard: Leaderboard::default(),
            status: Status::Lobby,
            delivered: false,
            started_at: None,
            ended_at: None,
            options,
        }
    }

    /// Returns the quiz this session runs
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    /// Returns the current phase
    pub fn status(&self) -> Status {
        self.status
    }

    /// Returns the question set
    pub fn questions(&self) -> &QuestionSet {
        &self.questions
    }

    /// Returns the participant registry
    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    /// Returns the session options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns when the session was started
    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    /// Returns when the session finished
    pub fn ended_at(&self) -> Option<SystemTime> {
        self.ended_at
    }

    /// Returns the final ranking once the session has finished
    pub fn final_ranking(&self) -> Option<&[FinalStanding]> {
        matches!(self.status, Status::Finished { .. }).then(|| {
            self.leaderboard
                .final_summary(&self.participants, self.questions.len())
                .ranking
                .as_slice()
        })
    }

    /// Checks that `id` holds `role`
    fn require(&self, id: Id, role: Role) -> Result<(), Error> {
        if self.participants.role(id) == Some(role) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    fn live_leaderboard(&self) -> TruncatedVec<Standing> {
        leaderboard::live(&self.participants, self.options.leaderboard_size)
    }

    /// Adds a participant or resolves a returning one
    ///
    /// The role is only used when a new record is created; a returning
    /// participant keeps the role and name it first joined with. The other
    /// connections are told about the join, and the caller receives a full
    /// view of the session, which is also returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionFull`] if the session cannot take another
    /// participant.
    pub fn join<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        actor: &Actor,
        role: Role,
        tunnel_finder: F,
    ) -> Result<SyncMessage, Error> {
        let joined = self.participants.join(actor.id, &actor.name, role)?;

        let (name, role) = self
            .participants
            .get(actor.id)
            .map(|p| (p.name().to_owned(), p.role()))
            .ok_or(Error::NotFound)?;

        info!(quiz = %self.quiz_id, user = %actor.id, ?role, ?joined, "participant joined");

        self.participants.announce_except(
            actor.id,
            &UpdateMessage::ParticipantJoined {
                id: actor.id,
                name,
                role,
                returning: joined == Joined::Returning,
            },
            &tunnel_finder,
        );

        let state = self.state_message(actor.id);
        self.participants
            .send_state(&state, actor.id, &tunnel_finder);

        Ok(state)
    }

    /// Starts the session
    ///
    /// Announces "quiz started" and asks for question 0 to be delivered
    /// after the configured delay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if `actor` is not a driver of this
    /// session, or [`Error::InvalidState`] if it already started.
    pub fn start<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        actor: Id,
        mut schedule_message: S,
        tunnel_finder: F,
    ) -> Result<SystemTime, Error> {
        self.require(actor, Role::Driver)?;

        if self.status != Status::Lobby {
            return Err(Error::InvalidState);
        }

        let now = SystemTime::now();
        self.status = Status::Running { index: 0 };
        self.started_at = Some(now);

        info!(quiz = %self.quiz_id, user = %actor, count = self.questions.len(), "quiz started");

        self.participants.announce(
            &UpdateMessage::QuizStarted {
                count: self.questions.len(),
                delay: self.options.question_delay,
            },
            tunnel_finder,
        );

        schedule_message(
            AlarmMessage::DeliverQuestion { index: 0 },
            self.options.question_delay,
        );

        Ok(now)
    }

    /// Broadcasts question `index`, with the answer for drivers only
    fn deliver_question<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, index: usize, tunnel_finder: F) {
        let Some(question) = self.questions.get(index) else {
            return;
        };

        let view = question.view(index, self.questions.len());
        let answer = question.correct_answer();

        debug!(quiz = %self.quiz_id, index, "delivering question");

        self.participants.announce_with(
            |_, role| {
                Some(match role {
                    Role::Driver => UpdateMessage::DriverQuestion {
                        question: view.clone(),
                        answer: answer.clone(),
                    },
                    Role::Student => UpdateMessage::Question(view.clone()),
                })
            },
            tunnel_finder,
        );
    }

    /// Handles a delayed event requested earlier through `schedule_message`
    ///
    /// Returns whether the event still applied. A question delivery whose
    /// index is no longer current does nothing.
    pub fn receive_alarm<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        alarm: AlarmMessage,
        tunnel_finder: F,
    ) -> bool {
        match alarm {
            AlarmMessage::DeliverQuestion { index } => {
                if self.status != (Status::Running { index }) {
                    debug!(quiz = %self.quiz_id, index, "stale question delivery ignored");
                    return false;
                }

                self.deliver_question(index, tunnel_finder);
                self.delivered = true;
                true
            }
        }
    }

    /// Moves to the next question, or finishes after the last one
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if `actor` is not a driver of this
    /// session, or [`Error::InvalidState`] if it is not running.
    pub fn advance<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        actor: Id,
        tunnel_finder: F,
    ) -> Result<Advanced, Error> {
        self.require(actor, Role::Driver)?;

        let Status::Running { index } = self.status else {
            return Err(Error::InvalidState);
        };

        let next = index + 1;

        if next < self.questions.len() {
            self.status = Status::Running { index: next };
            info!(quiz = %self.quiz_id, index = next, "advanced to question");
            self.deliver_question(next, tunnel_finder);
            self.delivered = true;
            return Ok(Advanced::Question(next));
        }

        let now = SystemTime::now();
        self.status = Status::Finished { index };
        self.ended_at = Some(now);

        info!(
            quiz = %self.quiz_id,
            students = self.participants.count(Role::Student),
            "quiz finished"
        );

        self.participants.announce_with(
            |id, _| Some(UpdateMessage::Finished(self.summary_message(id))),
            tunnel_finder,
        );

        Ok(Advanced::Finished(now))
    }

    /// Evaluates and records a student's answer
    ///
    /// The caller receives an acknowledgement, and everyone receives the
    /// updated live leaderboard.
    ///
    /// # Errors
    ///
    /// Checked in this order, none of which changes any state:
    /// * [`Error::Unauthorized`] if `actor` is not a student of this session
    /// * [`Error::InvalidState`] if the session is not running
    /// * [`Error::NotFound`] if `index` is not a question of the set
    /// * [`Error::StaleQuestion`] if `index` is not the current question
    /// * [`Error::DuplicateSubmission`] if the student already answered it
    /// * [`Error::Malformed`] if the answer is too long
    pub fn submit<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        actor: Id,
        index: usize,
        answer: &str,
        time_taken: Duration,
        tunnel_finder: F,
    ) -> Result<AnswerOutcome, Error> {
        self.require(actor, Role::Student)?;

        let Status::Running { index: current } = self.status else {
            return Err(Error::InvalidState);
        };

        let question = self.questions.get(index).ok_or(Error::NotFound)?;

        if index != current {
            return Err(Error::StaleQuestion);
        }

        let participant = self
            .participants
            .get_mut(actor)
            .ok_or(Error::Unauthorized)?;

        if participant.answer_for(index).is_some() {
            return Err(Error::DuplicateSubmission);
        }

        if answer.chars().count() > answer_text::MAX_LENGTH {
            return Err(Error::Malformed(format!(
                "answer longer than {} characters",
                answer_text::MAX_LENGTH
            )));
        }

        let evaluation = scoring::evaluate(question, answer, time_taken);
        let submitted = SubmittedAnswer {
            index,
            answer: answer.to_owned(),
            correct: evaluation.correct,
            points: evaluation.points,
            time_taken,
            submitted_at: SystemTime::now(),
        };
        let question_id = question.id();
        let total = participant.record(submitted.clone())?;

        debug!(
            quiz = %self.quiz_id,
            user = %actor,
            index,
            correct = evaluation.correct,
            points = evaluation.points,
            "answer recorded"
        );

        self.participants.send_message(
            &UpdateMessage::AnswerResult {
                index,
                correct: evaluation.correct,
                points: evaluation.points,
                total,
            },
            actor,
            &tunnel_finder,
        );

        self.participants.announce(
            &UpdateMessage::Leaderboard(self.live_leaderboard()),
            &tunnel_finder,
        );

        Ok(AnswerOutcome {
            answer: submitted,
            question_id,
            total,
        })
    }

    /// Handles the loss of a participant's connection
    ///
    /// In the lobby the participant is forgotten entirely; once the session
    /// has started the record is kept so a rejoin restores it. Returns
    /// whether `id` was a participant.
    pub fn disconnect<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        id: Id,
        tunnel_finder: F,
    ) -> bool {
        let Some(name) = self.participants.get(id).map(|p| p.name().to_owned()) else {
            return false;
        };

        if self.status == Status::Lobby {
            self.participants.remove(id);
        }

        info!(quiz = %self.quiz_id, user = %id, "participant left");

        self.participants.announce_except(
            id,
            &UpdateMessage::ParticipantLeft { id, name },
            tunnel_finder,
        );

        true
    }

    fn summary_message(&self, id: Id) -> SummaryMessage {
        let count = self.questions.len();
        let summary = self.leaderboard.final_summary(&self.participants, count);

        match self.participants.role(id) {
            Some(Role::Driver) => SummaryMessage::Driver {
                ranking: summary.ranking.clone(),
                stats: summary.stats.clone(),
                count,
            },
            _ => SummaryMessage::Student {
                ranking: summary.ranking.clone(),
                own: leaderboard::score(&self.participants, id),
                count,
            },
        }
    }

    /// Builds the full view of the session for participant `id`
    ///
    /// During the delay before the first question, nobody is shown it.
    pub fn state_message(&self, id: Id) -> SyncMessage {
        match self.status {
            Status::Running { .. } if !self.delivered => SyncMessage::Starting {
                title: self.questions.title().to_owned(),
                count: self.questions.len(),
            },
            Status::Lobby => {
                let students = self.participants.in_join_order(Role::Student);
                SyncMessage::Lobby {
                    title: self.questions.title().to_owned(),
                    count: self.questions.len(),
                    students: TruncatedVec::new(
                        students.iter().map(|p| p.name().to_owned()),
                        MAX_LIVE_SIZE,
                        students.len(),
                    ),
                }
            }
            Status::Running { index } => {
                let Some(question) = self.questions.get(index) else {
                    return SyncMessage::Summary(self.summary_message(id));
                };
                let view = question.view(index, self.questions.len());

                match self.participants.role(id) {
                    Some(Role::Driver) => SyncMessage::DriverRunning {
                        question: view,
                        answer: question.correct_answer(),
                        answered: self
                            .participants
                            .in_join_order(Role::Student)
                            .into_iter()
                            .filter(|p| p.answer_for(index).is_some())
                            .count(),
                        leaderboard: self.live_leaderboard(),
                    },
                    _ => SyncMessage::Running {
                        question: view,
                        score: leaderboard::score(&self.participants, id),
                        answered: self
                            .participants
                            .get(id)
                            .and_then(|p| p.answer_for(index))
                            .cloned(),
                        leaderboard: self.live_leaderboard(),
                    },
                }
            }
            Status::Finished { .. } => SyncMessage::Summary(self.summary_message(id)),
        }
    }
}
