//! Process-wide registry of live sessions
//!
//! A [`SessionStore`] maps quiz identifiers to live sessions. Each session
//! sits behind its own mutex and every intent against it runs entirely
//! under that lock, so intents for one quiz are serialized while different
//! quizzes never wait on each other. The map itself is only locked for
//! lookups, inserts and removals.
//!
//! Locks are always taken store first, then session, and never held across
//! an `.await`: collaborator reads happen before a session is locked, and
//! persistence writes are spawned after it is released.
//!
//! All connections of one quiz must be routed to the same process.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use garde::Validate;
use itertools::Itertools;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    Error,
    config::Config,
    game::{
        Advanced, AlarmMessage, AnswerOutcome, Game, IncomingMessage, Status, SyncMessage,
        UpdateMessage,
    },
    participant::{Actor, Id},
    persistence::{AnswerRecord, FinalRecord, Repository, Roster, StartRecord, Write, Writer},
    quiz::{QuestionSet, QuizId},
    session::{ConnectionId, Tunnel},
};

struct SessionState<T> {
    game: Game,
    /// Live connection of each participant, at most one per user
    tunnels: HashMap<Id, T>,
    /// Pending timer tasks
    alarms: Vec<JoinHandle<()>>,
    last_activity: Instant,
    finished_at: Option<Instant>,
    /// Set once the session is removed from the store
    closed: bool,
}

struct Session<T> {
    quiz_id: QuizId,
    state: Mutex<SessionState<T>>,
    writer: Writer,
}

impl<T: Tunnel + Clone + Send + 'static> Session<T> {
    fn new(quiz_id: QuizId, game: Game, writer: Writer) -> Self {
        Self {
            quiz_id,
            state: Mutex::new(SessionState {
                game,
                tunnels: HashMap::new(),
                alarms: Vec::new(),
                last_activity: Instant::now(),
                finished_at: None,
                closed: false,
            }),
            writer,
        }
    }

    /// Locks the session for an intent
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the session was removed while the
    /// caller held a reference to it.
    fn lock(&self) -> Result<MutexGuard<'_, SessionState<T>>, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::NotFound);
        }
        state.last_activity = Instant::now();
        Ok(state)
    }

    fn is_expired(&self, now: Instant, config: &Config) -> bool {
        let state = self.state.lock();

        if let Some(finished_at) = state.finished_at {
            return now.duration_since(finished_at) >= config.finished_retention;
        }

        state.tunnels.is_empty() && now.duration_since(state.last_activity) >= config.idle_timeout
    }

    /// Marks the session removed, cancels its timers and closes its
    /// connections
    fn close(&self) {
        let tunnels = {
            let mut state = self.state.lock();
            state.closed = true;
            for alarm in state.alarms.drain(..) {
                alarm.abort();
            }
            state.tunnels.drain().map(|(_, tunnel)| tunnel).collect_vec()
        };

        for tunnel in tunnels {
            tunnel.close();
        }

        if self.writer.pending() > 0 {
            self.writer.checkpoint(None);
        }
    }
}

/// Delivers `alarm` to the session after `delay`, unless it is gone by then
fn schedule_alarm<T: Tunnel + Clone + Send + 'static>(
    session: Weak<Session<T>>,
    alarm: AlarmMessage,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let Some(session) = session.upgrade() else {
            return;
        };
        let Ok(mut state) = session.lock() else {
            return;
        };

        let SessionState { game, tunnels, .. } = &mut *state;
        game.receive_alarm(alarm, |id| tunnels.get(&id).cloned());
    })
}

/// Registry of every live session in the process
pub struct SessionStore<T> {
    sessions: RwLock<HashMap<QuizId, Arc<Session<T>>>>,
    repository: Arc<dyn Repository>,
    roster: Arc<dyn Roster>,
    config: Config,
}

impl<T> std::fmt::Debug for SessionStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.read().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Tunnel + Clone + Send + 'static> SessionStore<T> {
    /// Creates an empty store
    pub fn new(repository: Arc<dyn Repository>, roster: Arc<dyn Roster>, config: Config) -> Self {
        Self {
            sessions: RwLock::default(),
            repository,
            roster,
            config,
        }
    }

    /// Returns the store's configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Checks if there are no live sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Checks if a live session exists for `quiz_id`
    pub fn contains(&self, quiz_id: QuizId) -> bool {
        self.sessions.read().contains_key(&quiz_id)
    }

    /// Returns the status of the live session for `quiz_id`
    pub fn status(&self, quiz_id: QuizId) -> Option<Status> {
        self.inspect(quiz_id, Game::status)
    }

    /// Runs `f` against the live session for `quiz_id`
    pub fn inspect<R, F: FnOnce(&Game) -> R>(&self, quiz_id: QuizId, f: F) -> Option<R> {
        let session = self.get(quiz_id).ok()?;
        let state = session.state.lock();
        (!state.closed).then(|| f(&state.game))
    }

    fn get(&self, quiz_id: QuizId) -> Result<Arc<Session<T>>, Error> {
        self.sessions
            .read()
            .get(&quiz_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Returns the live session, creating it from the repository if needed
    async fn session_or_create(&self, quiz_id: QuizId) -> Result<Arc<Session<T>>, Error> {
        if let Ok(session) = self.get(quiz_id) {
            return Ok(session);
        }

        let record = self
            .repository
            .load_quiz(quiz_id)
            .await?
            .ok_or(Error::NotFound)?;

        if !record.status.is_open() {
            return Err(Error::InvalidState);
        }

        record.questions.validate().map_err(|e| {
            warn!(quiz = %quiz_id, error = %e, "stored question set is invalid");
            Error::PersistenceFailure(format!("stored question set is invalid: {e}"))
        })?;

        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(quiz_id)
            .or_insert_with(|| self.new_session(quiz_id, record.questions));

        Ok(session.clone())
    }

    fn new_session(&self, quiz_id: QuizId, questions: QuestionSet) -> Arc<Session<T>> {
        info!(quiz = %quiz_id, questions = questions.len(), "session created");
        Arc::new(Session::new(
            quiz_id,
            Game::new(quiz_id, questions, self.config.game),
            Writer::new(self.repository.clone(), self.config.retry),
        ))
    }

    /// Opens a session for `quiz_id` from an already loaded question set
    ///
    /// Joins then find the session without reading the repository. The
    /// roster is still consulted on every join.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `questions` fails validation, or
    /// [`Error::InvalidState`] if a session for `quiz_id` already exists.
    pub fn create(&self, quiz_id: QuizId, questions: QuestionSet) -> Result<(), Error> {
        questions.validate()?;

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&quiz_id) {
            return Err(Error::InvalidState);
        }
        sessions.insert(quiz_id, self.new_session(quiz_id, questions));

        Ok(())
    }

    /// Joins `actor` to the session of `quiz_id` over `tunnel`
    ///
    /// Creates the session on first join. A user who already joined keeps
    /// their record; a previous connection of theirs, if still open and not
    /// the one behind `tunnel`, is closed and replaced.
    ///
    /// # Errors
    ///
    /// * [`Error::PersistenceFailure`] if the roster or quiz cannot be read
    /// * [`Error::NotFound`] if the quiz does not exist
    /// * [`Error::InvalidState`] if the stored quiz is completed or archived
    /// * [`Error::Unauthorized`] if the user is not on the quiz's roster
    /// * [`Error::SessionFull`] if the session has no room left
    pub async fn join(
        &self,
        quiz_id: QuizId,
        actor: &Actor,
        tunnel: T,
    ) -> Result<SyncMessage, Error> {
        let role = self.roster.role_of(quiz_id, actor.id).await?;

        loop {
            let session = self.session_or_create(quiz_id).await?;

            let Some(role) = role else {
                debug!(quiz = %quiz_id, user = %actor.id, "join rejected, not on roster");
                return Err(Error::Unauthorized);
            };

            match session.lock() {
                Ok(mut state) => {
                    let SessionState { game, tunnels, .. } = &mut *state;

                    let connection = tunnel.connection();
                    if let Some(previous) = tunnels
                        .insert(actor.id, tunnel.clone())
                        .filter(|previous| previous.connection() != connection)
                    {
                        previous.close();
                    }

                    let result = game.join(actor, role, |id| tunnels.get(&id).cloned());

                    if result.is_err() {
                        if let Some(rejected) = tunnels.remove(&actor.id) {
                            rejected.close();
                        }
                    } else {
                        debug!(quiz = %quiz_id, user = %actor.id, %connection, "connection attached");
                    }

                    return result;
                }
                // removed between lookup and lock; a fresh session will be loaded
                Err(_) => continue,
            }
        }
    }

    /// Starts the session of `quiz_id`
    ///
    /// Must be called from within a tokio runtime: the first question is
    /// delivered by a timer task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no live session, otherwise
    /// see [`Game::start`].
    pub fn start(&self, quiz_id: QuizId, actor: Id) -> Result<(), Error> {
        let session = self.get(quiz_id)?;
        let weak = Arc::downgrade(&session);

        let started_at = {
            let mut state = session.lock()?;
            let SessionState {
                game,
                tunnels,
                alarms,
                ..
            } = &mut *state;

            game.start(
                actor,
                |alarm, delay| alarms.push(schedule_alarm(weak.clone(), alarm, delay)),
                |id| tunnels.get(&id).cloned(),
            )?
        };

        session
            .writer
            .submit(Write::from(StartRecord { quiz_id, started_at }));

        Ok(())
    }

    /// Advances the session of `quiz_id`
    ///
    /// When the last question is advanced past, pending timers are cancelled
    /// and the final results are written together with any queued writes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no live session, otherwise
    /// see [`Game::advance`].
    pub fn advance(&self, quiz_id: QuizId, actor: Id) -> Result<Advanced, Error> {
        let session = self.get(quiz_id)?;

        let (advanced, last) = {
            let mut state = session.lock()?;
            let SessionState { game, tunnels, .. } = &mut *state;

            let advanced = game.advance(actor, |id| tunnels.get(&id).cloned())?;

            let last = match advanced {
                Advanced::Question(_) => None,
                Advanced::Finished(ended_at) => Some(FinalRecord {
                    quiz_id,
                    started_at: game.started_at(),
                    ended_at,
                    scores: game.final_ranking().map(<[_]>::to_vec).unwrap_or_default(),
                }),
            };

            if last.is_some() {
                state.finished_at = Some(Instant::now());
                for alarm in state.alarms.drain(..) {
                    alarm.abort();
                }
            }

            (advanced, last)
        };

        if let Some(record) = last {
            session.writer.checkpoint(Some(Write::from(record)));
        }

        Ok(advanced)
    }

    /// Submits an answer to the current question of `quiz_id`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no live session, otherwise
    /// see [`Game::submit`].
    pub fn submit(
        &self,
        quiz_id: QuizId,
        actor: Id,
        index: usize,
        answer: &str,
        time_taken: Duration,
    ) -> Result<AnswerOutcome, Error> {
        let session = self.get(quiz_id)?;

        let outcome = {
            let mut state = session.lock()?;
            let SessionState { game, tunnels, .. } = &mut *state;
            game.submit(actor, index, answer, time_taken, |id| {
                tunnels.get(&id).cloned()
            })?
        };

        session.writer.submit(Write::from(AnswerRecord {
            quiz_id,
            user: actor,
            question_id: outcome.question_id,
            answer: outcome.answer.clone(),
        }));

        Ok(outcome)
    }

    /// Handles the loss of `connection`, which `user` joined `quiz_id` over
    ///
    /// Does nothing unless `connection` is still `user`'s live connection to
    /// the session: a connection replaced by a newer join may be reported
    /// lost afterwards. Returns whether a participant was disconnected.
    pub fn disconnect(&self, quiz_id: QuizId, user: Id, connection: ConnectionId) -> bool {
        let Ok(session) = self.get(quiz_id) else {
            return false;
        };
        let Ok(mut state) = session.lock() else {
            return false;
        };

        let SessionState { game, tunnels, .. } = &mut *state;

        if tunnels.get(&user).map(Tunnel::connection) != Some(connection) {
            debug!(quiz = %quiz_id, user = %user, %connection, "stale disconnect ignored");
            return false;
        }

        tunnels.remove(&user);
        game.disconnect(user, |id| tunnels.get(&id).cloned())
    }

    /// Handles the loss of `connection` in every session it had joined
    ///
    /// Returns how many sessions `user` was disconnected from.
    pub fn disconnect_all(&self, user: Id, connection: ConnectionId) -> usize {
        let quiz_ids = self.sessions.read().keys().copied().collect_vec();

        quiz_ids
            .into_iter()
            .filter(|quiz_id| self.disconnect(*quiz_id, user, connection))
            .count()
    }

    /// Deletes the session of `quiz_id` immediately
    ///
    /// Connections are closed, timers cancelled, and queued writes flushed.
    /// Returns whether a session existed.
    pub fn abandon(&self, quiz_id: QuizId) -> bool {
        let Some(session) = self.sessions.write().remove(&quiz_id) else {
            return false;
        };

        info!(quiz = %quiz_id, "session abandoned");
        session.close();
        true
    }

    /// Removes finished sessions past their retention window, and sessions
    /// without connections idle for longer than the idle timeout
    ///
    /// Returns how many sessions were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();

        let removed = {
            let mut sessions = self.sessions.write();
            let expired = sessions
                .iter()
                .filter(|(_, session)| session.is_expired(now, &self.config))
                .map(|(quiz_id, _)| *quiz_id)
                .collect_vec();

            expired
                .into_iter()
                .filter_map(|quiz_id| sessions.remove(&quiz_id))
                .collect_vec()
        };

        for session in &removed {
            info!(quiz = %session.quiz_id, "session swept");
            session.close();
        }

        removed.len()
    }

    /// Spawns a task that calls [`SessionStore::sweep`] every
    /// `sweep_interval`, until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, "sweep finished");
                }
            }
        })
    }

    /// Handles a raw intent from `actor`'s connection
    ///
    /// Errors are sent back over `tunnel` only, and also returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the dispatched operation, or
    /// [`Error::Malformed`] if `text` is not a valid intent.
    pub async fn receive_message(&self, actor: &Actor, text: &str, tunnel: T) -> Result<(), Error> {
        let result = match IncomingMessage::from_json(text) {
            Ok(IncomingMessage::Join { quiz_id }) => {
                self.join(quiz_id, actor, tunnel.clone()).await.map(|_| ())
            }
            Ok(IncomingMessage::Start { quiz_id }) => self.start(quiz_id, actor.id),
            Ok(IncomingMessage::Advance { quiz_id }) => self.advance(quiz_id, actor.id).map(|_| ()),
            Ok(IncomingMessage::Submit {
                quiz_id,
                question_index,
                answer,
                time_taken,
            }) => self
                .submit(quiz_id, actor.id, question_index, &answer, time_taken)
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            debug!(user = %actor.id, error = %e, "intent rejected");
            tunnel.send_message(&UpdateMessage::Error(e.clone()));
        }

        result
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        memory::{MemoryRepository, MemoryRoster},
        participant::Role,
        persistence::QuizStatus,
        quiz::question::{Kind, Question},
        session::mocks::MockTunnel,
    };

    struct Fixture {
        store: Arc<SessionStore<MockTunnel>>,
        repository: Arc<MemoryRepository>,
        roster: Arc<MemoryRoster>,
        quiz_id: QuizId,
        driver: Actor,
        student: Actor,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(MemoryRepository::default());
        let roster = Arc::new(MemoryRoster::default());
        let quiz_id = QuizId::new();

        repository.insert(
            quiz_id,
            QuestionSet::new(
                "One",
                vec![Question::new(
                    "2 + 2?",
                    Kind::ShortAnswer {
                        correct: "4".to_owned(),
                    },
                    1,
                    Duration::from_secs(30),
                )],
            ),
            QuizStatus::Active,
        );

        let driver = Actor::new(Id::new(), "Teacher");
        let student = Actor::new(Id::new(), "Student");
        roster.grant(quiz_id, driver.id, Role::Driver);
        roster.grant(quiz_id, student.id, Role::Student);

        Fixture {
            store: Arc::new(SessionStore::new(
                repository.clone(),
                roster.clone(),
                Config::default(),
            )),
            repository,
            roster,
            quiz_id,
            driver,
            student,
        }
    }

    #[tokio::test]
    async fn test_create_from_loaded_set() {
        let f = fixture();
        let quiz_id = QuizId::new();
        let questions = QuestionSet::new(
            "Preloaded",
            vec![Question::new(
                "3 + 3?",
                Kind::ShortAnswer {
                    correct: "6".to_owned(),
                },
                2,
                Duration::from_secs(20),
            )],
        );

        assert!(matches!(
            f.store.create(quiz_id, QuestionSet::new("Empty", vec![])),
            Err(Error::Malformed(_))
        ));
        f.store.create(quiz_id, questions.clone()).unwrap();
        assert_eq!(f.store.create(quiz_id, questions), Err(Error::InvalidState));

        // not in the repository, yet joinable
        f.roster.grant(quiz_id, f.student.id, Role::Student);
        assert!(
            f.store
                .join(quiz_id, &f.student, MockTunnel::default())
                .await
                .is_ok()
        );
        assert_eq!(f.store.status(quiz_id), Some(Status::Lobby));
    }

    #[tokio::test]
    async fn test_join_unknown_quiz() {
        let f = fixture();
        assert!(matches!(
            f.store
                .join(QuizId::new(), &f.driver, MockTunnel::default())
                .await,
            Err(Error::NotFound)
        ));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_join_not_on_roster() {
        let f = fixture();
        let stranger = Actor::new(Id::new(), "Stranger");
        assert!(matches!(
            f.store
                .join(f.quiz_id, &stranger, MockTunnel::default())
                .await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_join_completed_quiz() {
        let f = fixture();
        let quiz_id = QuizId::new();
        f.repository.insert(
            quiz_id,
            QuestionSet::new("Done", vec![]),
            QuizStatus::Completed,
        );
        f.roster.grant(quiz_id, f.student.id, Role::Student);

        assert!(matches!(
            f.store
                .join(quiz_id, &f.student, MockTunnel::default())
                .await,
            Err(Error::InvalidState)
        ));
    }

    #[tokio::test]
    async fn test_join_invalid_stored_set() {
        let f = fixture();
        let quiz_id = QuizId::new();
        f.repository
            .insert(quiz_id, QuestionSet::new("Empty", vec![]), QuizStatus::Draft);
        f.roster.grant(quiz_id, f.student.id, Role::Student);

        assert!(matches!(
            f.store
                .join(quiz_id, &f.student, MockTunnel::default())
                .await,
            Err(Error::PersistenceFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_join_repository_unavailable() {
        let f = fixture();
        f.repository.fail_next(1);

        assert!(matches!(
            f.store
                .join(f.quiz_id, &f.student, MockTunnel::default())
                .await,
            Err(Error::PersistenceFailure(_))
        ));
        assert!(!f.store.contains(f.quiz_id));
    }

    #[tokio::test]
    async fn test_rejoin_closes_previous_tunnel() {
        let f = fixture();
        let first = MockTunnel::default();
        let second = MockTunnel::default();

        f.store
            .join(f.quiz_id, &f.student, first.clone())
            .await
            .unwrap();
        f.store
            .join(f.quiz_id, &f.student, second.clone())
            .await
            .unwrap();

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(
            f.store
                .inspect(f.quiz_id, |game| game.participants().len())
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejoin_on_same_connection_keeps_it_open() {
        let f = fixture();
        let tunnel = MockTunnel::default();

        for _ in 0..2 {
            f.store
                .join(f.quiz_id, &f.student, tunnel.clone())
                .await
                .unwrap();
        }

        assert!(!tunnel.is_closed());
        assert_eq!(tunnel.states().len(), 2);
    }

    fn question_count(tunnel: &MockTunnel) -> usize {
        tunnel
            .messages()
            .iter()
            .filter(|m| matches!(m, UpdateMessage::Question(_)))
            .count()
    }

    fn two_question_set() -> QuestionSet {
        QuestionSet::new(
            "Two",
            ["1 + 1?", "2 + 2?"]
                .into_iter()
                .map(|text| {
                    Question::new(
                        text,
                        Kind::ShortAnswer {
                            correct: "2".to_owned(),
                        },
                        1,
                        Duration::from_secs(30),
                    )
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_disconnect_from_replaced_connection_is_ignored() {
        let f = fixture();
        let quiz_id = QuizId::new();
        f.store.create(quiz_id, two_question_set()).unwrap();
        f.roster.grant(quiz_id, f.driver.id, Role::Driver);
        f.roster.grant(quiz_id, f.student.id, Role::Student);

        let stale = MockTunnel::default();
        let fresh = MockTunnel::default();
        f.store
            .join(quiz_id, &f.driver, MockTunnel::default())
            .await
            .unwrap();
        f.store
            .join(quiz_id, &f.student, stale.clone())
            .await
            .unwrap();
        f.store.start(quiz_id, f.driver.id).unwrap();
        f.store
            .join(quiz_id, &f.student, fresh.clone())
            .await
            .unwrap();

        // the transport reports the loss of the connection it was told to close
        assert!(stale.is_closed());
        assert!(!f.store.disconnect(quiz_id, f.student.id, stale.connection()));

        f.store.advance(quiz_id, f.driver.id).unwrap();
        assert_eq!(question_count(&fresh), 1);
        assert_eq!(question_count(&stale), 0);
    }

    #[tokio::test]
    async fn test_stale_disconnect_in_lobby_keeps_participant() {
        let f = fixture();
        let stale = MockTunnel::default();
        let fresh = MockTunnel::default();
        f.store
            .join(f.quiz_id, &f.student, stale.clone())
            .await
            .unwrap();
        f.store
            .join(f.quiz_id, &f.student, fresh.clone())
            .await
            .unwrap();

        assert!(!f.store.disconnect(f.quiz_id, f.student.id, stale.connection()));
        assert_eq!(
            f.store
                .inspect(f.quiz_id, |game| game.participants().contains(f.student.id)),
            Some(true)
        );

        assert!(f.store.disconnect(f.quiz_id, f.student.id, fresh.connection()));
        assert_eq!(
            f.store
                .inspect(f.quiz_id, |game| game.participants().contains(f.student.id)),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_disconnect_all_only_touches_the_lost_connection() {
        let f = fixture();
        let other = QuizId::new();
        f.store.create(other, two_question_set()).unwrap();
        f.roster.grant(other, f.driver.id, Role::Driver);
        f.roster.grant(other, f.student.id, Role::Student);

        let lost = MockTunnel::default();
        let live = MockTunnel::default();
        let driver = MockTunnel::default();
        f.store
            .join(f.quiz_id, &f.student, lost.clone())
            .await
            .unwrap();
        f.store
            .join(other, &f.driver, driver.clone())
            .await
            .unwrap();
        f.store
            .join(other, &f.student, live.clone())
            .await
            .unwrap();
        f.store.start(other, f.driver.id).unwrap();

        assert_eq!(f.store.disconnect_all(f.student.id, lost.connection()), 1);
        assert_eq!(
            f.store
                .inspect(f.quiz_id, |game| game.participants().contains(f.student.id)),
            Some(false)
        );
        assert!(
            !driver
                .messages()
                .iter()
                .any(|m| matches!(m, UpdateMessage::ParticipantLeft { .. }))
        );

        f.store.advance(other, f.driver.id).unwrap();
        assert_eq!(question_count(&live), 1);

        assert_eq!(f.store.disconnect_all(f.student.id, live.connection()), 1);
        assert!(
            driver
                .messages()
                .iter()
                .any(|m| matches!(m, UpdateMessage::ParticipantLeft { id, .. } if *id == f.student.id))
        );
    }

    #[tokio::test]
    async fn test_intents_on_missing_session() {
        let f = fixture();
        assert_eq!(f.store.start(f.quiz_id, f.driver.id), Err(Error::NotFound));
        assert_eq!(f.store.advance(f.quiz_id, f.driver.id), Err(Error::NotFound));
        assert_eq!(
            f.store
                .submit(f.quiz_id, f.student.id, 0, "4", Duration::ZERO),
            Err(Error::NotFound)
        );
        assert!(!f.store.disconnect(f.quiz_id, f.student.id, ConnectionId::new()));
    }

    #[tokio::test]
    async fn test_abandon_closes_everything() {
        let f = fixture();
        let tunnel = MockTunnel::default();
        f.store
            .join(f.quiz_id, &f.driver, tunnel.clone())
            .await
            .unwrap();
        f.store.start(f.quiz_id, f.driver.id).unwrap();

        assert!(f.store.abandon(f.quiz_id));
        assert!(!f.store.abandon(f.quiz_id));
        assert!(tunnel.is_closed());
        assert!(f.store.status(f.quiz_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_idle_session() {
        let f = fixture();
        let tunnel = MockTunnel::default();
        f.store
            .join(f.quiz_id, &f.student, tunnel.clone())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        // still connected
        assert_eq!(f.store.sweep(), 0);

        assert!(
            f.store
                .disconnect(f.quiz_id, f.student.id, tunnel.connection())
        );
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(f.store.sweep(), 0);

        tokio::time::advance(f.store.config().idle_timeout).await;
        assert_eq!(f.store.sweep(), 1);
        assert!(f.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_finished_session_after_retention() {
        let f = fixture();
        let tunnel = MockTunnel::default();
        f.store
            .join(f.quiz_id, &f.driver, tunnel.clone())
            .await
            .unwrap();
        f.store.start(f.quiz_id, f.driver.id).unwrap();
        assert!(matches!(
            f.store.advance(f.quiz_id, f.driver.id),
            Ok(Advanced::Finished(_))
        ));

        assert_eq!(f.store.sweep(), 0);
        tokio::time::advance(f.store.config().finished_retention).await;
        assert_eq!(f.store.sweep(), 1);
        assert!(tunnel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_stops_with_store() {
        let f = fixture();
        let tunnel = MockTunnel::default();
        f.store
            .join(f.quiz_id, &f.student, tunnel.clone())
            .await
            .unwrap();
        f.store
            .disconnect(f.quiz_id, f.student.id, tunnel.connection());

        let sweeper = f.store.spawn_sweeper();
        tokio::time::sleep(f.store.config().idle_timeout + f.store.config().sweep_interval * 2)
            .await;
        assert!(f.store.is_empty());

        drop(f);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn test_receive_message_reports_errors_to_sender() {
        let f = fixture();
        let tunnel = MockTunnel::default();

        let result = f
            .store
            .receive_message(&f.student, "not json", tunnel.clone())
            .await;
        assert!(matches!(result, Err(Error::Malformed(_))));

        let join = format!(r#"{{"type":"join","quiz_id":"{}"}}"#, f.quiz_id);
        f.store
            .receive_message(&f.student, &join, tunnel.clone())
            .await
            .unwrap();

        let start = format!(r#"{{"type":"start","quiz_id":"{}"}}"#, f.quiz_id);
        assert_eq!(
            f.store
                .receive_message(&f.student, &start, tunnel.clone())
                .await,
            Err(Error::Unauthorized)
        );

        let errors = tunnel
            .messages()
            .into_iter()
            .filter(|m| matches!(m, UpdateMessage::Error(_)))
            .count();
        assert_eq!(errors, 2);
        assert_eq!(tunnel.states().len(), 1);
    }
}
