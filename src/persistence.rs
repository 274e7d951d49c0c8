//! Authoritative store collaborators and write-behind persistence
//!
//! Live sessions are authoritative while they run; the store only receives
//! a record of what happened. Writes are issued after the session lock is
//! released and never awaited by the intent that caused them. A failed
//! write is queued and retried at the session-end checkpoint.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use garde::Validate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use web_time::SystemTime;

use crate::{
    leaderboard::FinalStanding,
    participant::{Id, Role, SubmittedAnswer},
    quiz::{QuestionSet, QuizId, validate_duration},
};

/// Failures reported by a collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the operation
    #[error("store rejected the operation: {0}")]
    Rejected(String),
}

impl From<Error> for crate::Error {
    fn from(error: Error) -> Self {
        Self::PersistenceFailure(error.to_string())
    }
}

/// Lifecycle status of a quiz in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    /// Being edited
    Draft,
    /// Open for a live session
    Active,
    /// A session ran to the end
    Completed,
    /// Hidden from use
    Archived,
}

impl QuizStatus {
    /// Whether a new live session may be opened for the quiz
    pub fn is_open(self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }
}

/// A quiz as loaded from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizRecord {
    /// The questions, validated by the session store before use
    pub questions: QuestionSet,
    /// Stored lifecycle status
    pub status: QuizStatus,
}

/// The start of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartRecord {
    /// The quiz that started
    pub quiz_id: QuizId,
    /// When the driver started it
    pub started_at: SystemTime,
}

/// One accepted answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRecord {
    /// The quiz answered
    pub quiz_id: QuizId,
    /// The student who answered
    pub user: Id,
    /// The question answered
    pub question_id: Id,
    /// The answer and its evaluation
    pub answer: SubmittedAnswer,
}

/// The outcome of a finished session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalRecord {
    /// The quiz that finished
    pub quiz_id: QuizId,
    /// When the session started
    pub started_at: Option<SystemTime>,
    /// When the session finished
    pub ended_at: SystemTime,
    /// Final ranking of every student
    pub scores: Vec<FinalStanding>,
}

/// The authoritative store for quizzes and their results
#[async_trait]
pub trait Repository: Send + Sync {
    /// Loads a quiz's questions and status, `None` if it does not exist
    async fn load_quiz(&self, quiz_id: QuizId) -> Result<Option<QuizRecord>, Error>;

    /// Records that a session started
    async fn record_started(&self, record: &StartRecord) -> Result<(), Error>;

    /// Records one accepted answer
    async fn record_answer(&self, record: &AnswerRecord) -> Result<(), Error>;

    /// Records the end of a session with its final scores
    async fn record_finished(&self, record: &FinalRecord) -> Result<(), Error>;
}

/// Group membership lookup
#[async_trait]
pub trait Roster: Send + Sync {
    /// Returns the role `user` holds for `quiz_id`, `None` if not a member
    async fn role_of(&self, quiz_id: QuizId, user: Id) -> Result<Option<Role>, Error>;
}

/// A pending write against the [`Repository`]
#[derive(Debug, Clone, PartialEq, derive_more::From)]
pub enum Write {
    /// See [`Repository::record_started`]
    Started(StartRecord),
    /// See [`Repository::record_answer`]
    Answer(AnswerRecord),
    /// See [`Repository::record_finished`]
    Finished(FinalRecord),
}

impl Write {
    async fn apply(&self, repository: &dyn Repository) -> Result<(), Error> {
        match self {
            Self::Started(record) => repository.record_started(record).await,
            Self::Answer(record) => repository.record_answer(record).await,
            Self::Finished(record) => repository.record_finished(record).await,
        }
    }

    fn quiz_id(&self) -> QuizId {
        match self {
            Self::Started(StartRecord { quiz_id, .. })
            | Self::Answer(AnswerRecord { quiz_id, .. })
            | Self::Finished(FinalRecord { quiz_id, .. }) => *quiz_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Answer(_) => "answer",
            Self::Finished(_) => "finished",
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_millis(500)
}

/// How queued writes are retried at the checkpoint
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RetryPolicy {
    /// Attempts per write, the first one included
    #[garde(range(min = 1, max = 10))]
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Base delay between attempts, doubled each time
    #[garde(custom(validate_duration::<0, 60>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(default = "default_backoff")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: default_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed), with up to one
    /// `backoff` of random jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(1 << attempt.min(16));
        let jitter = fastrand::u64(0..=self.backoff.as_millis() as u64);
        base.saturating_add(Duration::from_millis(jitter))
    }
}

async fn apply_with_retry(
    repository: &dyn Repository,
    write: &Write,
    retry: RetryPolicy,
) -> Result<(), Error> {
    let mut attempt = 0;

    loop {
        match write.apply(repository).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 >= retry.attempts => return Err(e),
            Err(e) => {
                warn!(quiz = %write.quiz_id(), kind = write.kind(), attempt, error = %e, "retrying write");
                tokio::time::sleep(retry.delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Issues writes in the background and keeps the ones that failed
#[derive(Clone)]
pub struct Writer {
    repository: Arc<dyn Repository>,
    pending: Arc<Mutex<Vec<Write>>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("pending", &self.pending.lock().len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Writer {
    /// Creates a writer against `repository`
    pub fn new(repository: Arc<dyn Repository>, retry: RetryPolicy) -> Self {
        Self {
            repository,
            pending: Arc::default(),
            retry,
        }
    }

    /// Number of failed writes waiting for the checkpoint
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Applies `write` once in the background, queueing it on failure
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, write: Write) -> JoinHandle<()> {
        let repository = self.repository.clone();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            if let Err(e) = write.apply(repository.as_ref()).await {
                warn!(quiz = %write.quiz_id(), kind = write.kind(), error = %e, "write failed, queued for retry");
                pending.lock().push(write);
            }
        })
    }

    /// Retries every queued write, then applies `last` if given
    ///
    /// Each write gets up to `attempts` tries with jittered exponential
    /// backoff. Writes that still fail are logged and dropped; the task
    /// resolves to how many were dropped.
    pub fn checkpoint(&self, last: Option<Write>) -> JoinHandle<usize> {
        let repository = self.repository.clone();
        let pending = self.pending.clone();
        let retry = self.retry;

        tokio::spawn(async move {
            let writes = std::mem::take(&mut *pending.lock())
                .into_iter()
                .chain(last)
                .collect::<Vec<_>>();

            let mut dropped = 0;
            for write in &writes {
                if let Err(e) = apply_with_retry(repository.as_ref(), write, retry).await {
                    error!(quiz = %write.quiz_id(), kind = write.kind(), error = %e, "write dropped after retries");
                    dropped += 1;
                }
            }

            if !writes.is_empty() {
                info!(written = writes.len() - dropped, dropped, "persistence checkpoint");
            }

            dropped
        })
    }
}
