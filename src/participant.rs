//! Participant registry
//!
//! This module tracks everyone who joined a session: their role, display
//! name, running score and submitted answers. Connection handles are not
//! stored here; they are looked up through a `tunnel_finder` so that a lost
//! connection never costs a participant their record.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
    time::Duration,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;
use web_time::SystemTime;

use crate::{
    Error,
    game::{SyncMessage, UpdateMessage},
    session::Tunnel,
};

/// A unique identifier for users and questions
///
/// User identifiers are assigned by the authentication layer and stay the
/// same across reconnections.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for Id {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// An authenticated user issuing intents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Identity resolved by the authentication layer
    pub id: Id,
    /// Name shown to other participants
    pub name: String,
}

impl Actor {
    /// Creates an actor from an identity and display name
    pub fn new(id: Id, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The role a participant holds in a session
///
/// Roles come from the owning group's roster: the group's teacher drives the
/// session, its students answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Authorized to start and advance the session
    Driver,
    /// Answers questions and appears on the leaderboard
    Student,
}

/// One accepted answer
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedAnswer {
    /// Index of the answered question
    pub index: usize,
    /// The answer as submitted
    pub answer: String,
    /// Whether the answer was correct
    pub correct: bool,
    /// Points awarded for it
    pub points: u64,
    /// Time the student reported taking
    #[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")]
    pub time_taken: Duration,
    /// When the answer was accepted
    pub submitted_at: SystemTime,
}

/// A user tracked within a session
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    id: Id,
    name: String,
    role: Role,
    score: u64,
    answers: Vec<SubmittedAnswer>,
    #[serde(skip)]
    join_order: usize,
}

impl Participant {
    /// Returns the participant's identity
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the participant's display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the participant's role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the cumulative score
    pub fn score(&self) -> u64 {
        self.score
    }

    /// Returns accepted answers in submission order
    pub fn answers(&self) -> &[SubmittedAnswer] {
        &self.answers
    }

    /// Returns the number of correct answers
    pub fn correct_count(&self) -> usize {
        self.answers.iter().filter(|a| a.correct).count()
    }

    /// Returns the answer recorded for question `index`, if any
    pub fn answer_for(&self, index: usize) -> Option<&SubmittedAnswer> {
        self.answers.iter().find(|a| a.index == index)
    }

    /// Returns the position in which this participant first joined
    pub fn join_order(&self) -> usize {
        self.join_order
    }

    /// Appends an answer and adds its points to the score
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSubmission`] if an answer for the same
    /// question index is already recorded. The record is left unchanged.
    pub fn record(&mut self, answer: SubmittedAnswer) -> Result<u64, Error> {
        if self.answer_for(answer.index).is_some() {
            return Err(Error::DuplicateSubmission);
        }

        self.score += answer.points;
        self.answers.push(answer);

        debug_assert_eq!(
            self.score,
            self.answers.iter().map(|a| a.points).sum::<u64>()
        );

        Ok(self.score)
    }
}

/// Outcome of [`Participants::join`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joined {
    /// A new record was created
    New,
    /// The user already had a record, which was kept as is
    Returning,
}

/// Manages all participants in a session
///
/// Keeps the primary mapping from identity to record, plus a reverse
/// mapping by role for efficient filtering.
#[derive(Debug, Default)]
pub struct Participants {
    /// Primary mapping from identity to participant record
    mapping: HashMap<Id, Participant>,
    /// Identities grouped by role
    reverse_mapping: EnumMap<Role, HashSet<Id>>,
    /// Join position handed to the next new participant
    next_join_order: usize,
}

impl Participants {
    /// Adds a participant, or resolves to the existing record for `id`
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionFull`] if a new record would exceed the
    /// maximum number of participants.
    pub fn join(&mut self, id: Id, name: &str, role: Role) -> Result<Joined, Error> {
        if self.mapping.contains_key(&id) {
            return Ok(Joined::Returning);
        }

        if self.mapping.len() >= crate::constants::quiz::MAX_PARTICIPANT_COUNT {
            return Err(Error::SessionFull);
        }

        self.mapping.insert(
            id,
            Participant {
                id,
                name: name.to_owned(),
                role,
                score: 0,
                answers: Vec::new(),
                join_order: self.next_join_order,
            },
        );
        self.reverse_mapping[role].insert(id);
        self.next_join_order += 1;

        Ok(Joined::New)
    }

    /// Removes a participant's record entirely
    pub fn remove(&mut self, id: Id) -> Option<Participant> {
        let participant = self.mapping.remove(&id)?;
        self.reverse_mapping[participant.role].remove(&id);
        Some(participant)
    }

    /// Gets a participant's record
    pub fn get(&self, id: Id) -> Option<&Participant> {
        self.mapping.get(&id)
    }

    /// Gets a participant's record for mutation
    pub fn get_mut(&mut self, id: Id) -> Option<&mut Participant> {
        self.mapping.get_mut(&id)
    }

    /// Gets a participant's role
    pub fn role(&self, id: Id) -> Option<Role> {
        self.mapping.get(&id).map(Participant::role)
    }

    /// Checks if `id` has joined
    pub fn contains(&self, id: Id) -> bool {
        self.mapping.contains_key(&id)
    }

    /// Number of participants with `role`
    pub fn count(&self, role: Role) -> usize {
        self.reverse_mapping[role].len()
    }

    /// Number of participants of any role
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Checks if nobody has joined
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Participants with `role`, in the order they first joined
    pub fn in_join_order(&self, role: Role) -> Vec<&Participant> {
        self.reverse_mapping[role]
            .iter()
            .filter_map(|id| self.mapping.get(id))
            .sorted_by_key(|p| p.join_order)
            .collect_vec()
    }

    /// Gets all participants that currently have a live tunnel
    ///
    /// # Returns
    ///
    /// Vector of tuples containing (ID, Tunnel, Role) for every participant
    /// whose connection could be found
    pub fn vec<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) -> Vec<(Id, T, Role)> {
        self.mapping
            .values()
            .filter_map(|p| tunnel_finder(p.id).map(|t| (p.id, t, p.role)))
            .collect_vec()
    }

    /// Sends an update message to a specific participant
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(tunnel) = tunnel_finder(id) else {
            return;
        };

        tunnel.send_message(message);
    }

    /// Sends a state synchronization message to a specific participant
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &SyncMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(tunnel) = tunnel_finder(id) else {
            return;
        };

        tunnel.send_state(message);
    }

    /// Sends personalized messages to all connected participants
    ///
    /// The sender function is called for each participant with their
    /// identity and role and can return `None` to skip them.
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id, Role) -> Option<UpdateMessage>,
    {
        for (id, tunnel, role) in self.vec(tunnel_finder) {
            let Some(message) = sender(id, role) else {
                continue;
            };

            tunnel.send_message(&message);
        }
    }

    /// Broadcasts an update message to all connected participants
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        self.announce_with(|_, _| Some(message.to_owned()), tunnel_finder);
    }

    /// Broadcasts an update message to everyone except `excluded`
    pub fn announce_except<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        excluded: Id,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        self.announce_with(
            |id, _| (id != excluded).then(|| message.to_owned()),
            tunnel_finder,
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::session::mocks::MockTunnel;

    fn answer(index: usize, points: u64) -> SubmittedAnswer {
        SubmittedAnswer {
            index,
            answer: "A".to_owned(),
            correct: points > 0,
            points,
            time_taken: Duration::from_secs(5),
            submitted_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_join_creates_once() {
        let mut participants = Participants::default();
        let id = Id::new();

        assert_eq!(participants.join(id, "Ada", Role::Student), Ok(Joined::New));
        assert_eq!(
            participants.join(id, "Ada", Role::Student),
            Ok(Joined::Returning)
        );
        assert_eq!(participants.len(), 1);
        assert_eq!(participants.count(Role::Student), 1);
        assert_eq!(participants.count(Role::Driver), 0);
    }

    #[test]
    fn test_rejoin_keeps_role_and_score() {
        let mut participants = Participants::default();
        let id = Id::new();
        participants.join(id, "Ada", Role::Student).unwrap();
        participants.get_mut(id).unwrap().record(answer(0, 7)).unwrap();

        participants.join(id, "Ada again", Role::Driver).unwrap();

        let record = participants.get(id).unwrap();
        assert_eq!(record.role(), Role::Student);
        assert_eq!(record.name(), "Ada");
        assert_eq!(record.score(), 7);
        assert_eq!(record.answers().len(), 1);
    }

    #[test]
    fn test_record_rejects_duplicate() {
        let mut participants = Participants::default();
        let id = Id::new();
        participants.join(id, "Grace", Role::Student).unwrap();
        let record = participants.get_mut(id).unwrap();

        assert_eq!(record.record(answer(0, 10)), Ok(10));
        assert_eq!(record.record(answer(1, 0)), Ok(10));
        assert_eq!(record.record(answer(0, 12)), Err(Error::DuplicateSubmission));
        assert_eq!(record.score(), 10);
        assert_eq!(record.answers().len(), 2);
        assert_eq!(record.correct_count(), 1);
    }

    #[test]
    fn test_score_is_sum_of_answers() {
        let mut participants = Participants::default();
        let id = Id::new();
        participants.join(id, "Linus", Role::Student).unwrap();
        let record = participants.get_mut(id).unwrap();

        for (index, points) in [3, 0, 12, 5].into_iter().enumerate() {
            record.record(answer(index, points)).unwrap();
            let sum: u64 = record.answers().iter().map(|a| a.points).sum();
            assert_eq!(record.score(), sum);
        }
    }

    #[test]
    fn test_in_join_order() {
        let mut participants = Participants::default();
        let ids = (0..5).map(|_| Id::new()).collect_vec();
        for (i, id) in ids.iter().enumerate() {
            participants
                .join(*id, &format!("Student {i}"), Role::Student)
                .unwrap();
        }
        participants.join(Id::new(), "Teacher", Role::Driver).unwrap();

        let ordered = participants
            .in_join_order(Role::Student)
            .into_iter()
            .map(Participant::id)
            .collect_vec();
        assert_eq!(ordered, ids);
    }

    #[test]
    fn test_remove_updates_reverse_mapping() {
        let mut participants = Participants::default();
        let id = Id::new();
        participants.join(id, "Ada", Role::Student).unwrap();

        assert!(participants.remove(id).is_some());
        assert!(!participants.contains(id));
        assert_eq!(participants.count(Role::Student), 0);
        assert!(participants.is_empty());
    }

    #[test]
    fn test_maximum_participants() {
        let mut participants = Participants::default();
        for _ in 0..crate::constants::quiz::MAX_PARTICIPANT_COUNT {
            participants.join(Id::new(), "x", Role::Student).unwrap();
        }
        assert_eq!(
            participants.join(Id::new(), "late", Role::Student),
            Err(Error::SessionFull)
        );
    }

    #[test]
    fn test_announce_skips_disconnected() {
        let mut participants = Participants::default();
        let online = Id::new();
        let offline = Id::new();
        participants.join(online, "Online", Role::Student).unwrap();
        participants.join(offline, "Offline", Role::Student).unwrap();

        let tunnel = MockTunnel::default();
        let finder = |id: Id| (id == online).then(|| tunnel.clone());

        participants.announce(
            &UpdateMessage::ParticipantLeft {
                id: offline,
                name: "Offline".to_owned(),
            },
            finder,
        );

        assert_eq!(tunnel.messages().len(), 1);
    }

    #[test]
    fn test_announce_except() {
        let mut participants = Participants::default();
        let first = Id::new();
        let second = Id::new();
        participants.join(first, "First", Role::Student).unwrap();
        participants.join(second, "Second", Role::Driver).unwrap();

        let first_tunnel = MockTunnel::default();
        let second_tunnel = MockTunnel::default();
        let finder = |id: Id| {
            if id == first {
                Some(first_tunnel.clone())
            } else {
                Some(second_tunnel.clone())
            }
        };

        participants.announce_except(
            first,
            &UpdateMessage::ParticipantLeft {
                id: first,
                name: "First".to_owned(),
            },
            finder,
        );

        assert!(first_tunnel.messages().is_empty());
        assert_eq!(second_tunnel.messages().len(), 1);
    }

    #[test]
    fn test_id_parse() {
        let id = Id::new();
        assert_eq!(id.to_string().parse::<Id>().unwrap(), id);
        assert!("nope".parse::<Id>().is_err());
    }
}
