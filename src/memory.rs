//! In-memory collaborators
//!
//! Process-local implementations of [`Repository`] and [`Roster`], used in
//! tests and for running the engine without an external store.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use web_time::SystemTime;

use crate::{
    participant::{Id, Role},
    persistence::{
        AnswerRecord, Error, FinalRecord, QuizRecord, QuizStatus, Repository, Roster, StartRecord,
    },
    quiz::{QuestionSet, QuizId},
};

#[derive(Debug, Default)]
struct Stored {
    quizzes: HashMap<QuizId, QuizRecord>,
    started: HashMap<QuizId, SystemTime>,
    answers: HashMap<QuizId, Vec<AnswerRecord>>,
    finished: HashMap<QuizId, FinalRecord>,
}

/// A [`Repository`] kept in process memory
///
/// Starting a quiz marks it active and finishing it marks it completed,
/// so a finished quiz cannot be opened again.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    stored: Mutex<Stored>,
    failures: AtomicUsize,
}

impl MemoryRepository {
    /// Adds or replaces a quiz
    pub fn insert(&self, quiz_id: QuizId, questions: QuestionSet, status: QuizStatus) {
        self.stored
            .lock()
            .quizzes
            .insert(quiz_id, QuizRecord { questions, status });
    }

    /// Makes the next `count` calls fail with [`Error::Unavailable`]
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), Error> {
        let consumed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match consumed {
            Ok(_) => Err(Error::Unavailable("injected failure".to_owned())),
            Err(_) => Ok(()),
        }
    }

    /// Returns the stored status of a quiz
    pub fn status(&self, quiz_id: QuizId) -> Option<QuizStatus> {
        self.stored.lock().quizzes.get(&quiz_id).map(|q| q.status)
    }

    /// Returns when a quiz was recorded as started
    pub fn started(&self, quiz_id: QuizId) -> Option<SystemTime> {
        self.stored.lock().started.get(&quiz_id).copied()
    }

    /// Returns the answers recorded for a quiz
    pub fn answers(&self, quiz_id: QuizId) -> Vec<AnswerRecord> {
        self.stored
            .lock()
            .answers
            .get(&quiz_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the final record of a quiz
    pub fn finished(&self, quiz_id: QuizId) -> Option<FinalRecord> {
        self.stored.lock().finished.get(&quiz_id).cloned()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn load_quiz(&self, quiz_id: QuizId) -> Result<Option<QuizRecord>, Error> {
        self.check()?;
        Ok(self.stored.lock().quizzes.get(&quiz_id).cloned())
    }

    async fn record_started(&self, record: &StartRecord) -> Result<(), Error> {
        self.check()?;
        let mut stored = self.stored.lock();
        stored.started.insert(record.quiz_id, record.started_at);
        if let Some(quiz) = stored.quizzes.get_mut(&record.quiz_id) {
            quiz.status = QuizStatus::Active;
        }
        Ok(())
    }

    async fn record_answer(&self, record: &AnswerRecord) -> Result<(), Error> {
        self.check()?;
        let mut stored = self.stored.lock();
        let answers = stored.answers.entry(record.quiz_id).or_default();

        if answers
            .iter()
            .any(|a| a.user == record.user && a.answer.index == record.answer.index)
        {
            return Err(Error::Rejected("answer already recorded".to_owned()));
        }

        answers.push(record.clone());
        Ok(())
    }

    async fn record_finished(&self, record: &FinalRecord) -> Result<(), Error> {
        self.check()?;
        let mut stored = self.stored.lock();
        stored.finished.insert(record.quiz_id, record.clone());
        if let Some(quiz) = stored.quizzes.get_mut(&record.quiz_id) {
            quiz.status = QuizStatus::Completed;
        }
        Ok(())
    }
}

/// A [`Roster`] kept in process memory
#[derive(Debug, Default)]
pub struct MemoryRoster {
    roles: Mutex<HashMap<(QuizId, Id), Role>>,
}

impl MemoryRoster {
    /// Gives `user` a role for `quiz_id`
    pub fn grant(&self, quiz_id: QuizId, user: Id, role: Role) {
        self.roles.lock().insert((quiz_id, user), role);
    }

    /// Removes `user` from the roster of `quiz_id`
    pub fn revoke(&self, quiz_id: QuizId, user: Id) {
        self.roles.lock().remove(&(quiz_id, user));
    }
}

#[async_trait]
impl Roster for MemoryRoster {
    async fn role_of(&self, quiz_id: QuizId, user: Id) -> Result<Option<Role>, Error> {
        Ok(self.roles.lock().get(&(quiz_id, user)).copied())
    }
}
