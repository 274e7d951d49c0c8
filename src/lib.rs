//! # Live Quiz Session Engine
//!
//! This library turns a static set of quiz questions into a synchronized,
//! real-time session: one driver (the class teacher) starts the quiz and moves it
//! from question to question, students answer concurrently, and scores and
//! leaderboards are broadcast live to every connected participant.
//!
//! The in-memory session is authoritative while the quiz runs. A
//! [`Repository`](persistence::Repository) receives a record of starts,
//! answers and final results in the background, and a
//! [`Roster`](persistence::Roster) decides who may join which quiz.
//!
//! The entry point is [`SessionStore`]: it creates sessions on first join,
//! routes intents to them and removes them once finished or idle.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::missing_panics_doc)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::Serialize;

pub mod config;
pub mod constants;
mod error;
pub mod game;
pub mod leaderboard;
pub mod memory;
pub mod participant;
pub mod persistence;
pub mod quiz;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::Error;
pub use game::{IncomingMessage, SyncMessage, UpdateMessage};
pub use participant::{Actor, Id, Role};
pub use quiz::{QuestionSet, QuizId};
pub use session::{ConnectionId, Tunnel};
pub use store::SessionStore;

/// A truncated vector that maintains the exact count while limiting displayed items
///
/// This structure is useful for displaying a limited number of items while
/// still showing the total count. For example, showing "40 students" but only
/// listing the top 10.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The exact total count of items
    exact_count: usize,
    /// The truncated list of items (up to the limit)
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Creates a new truncated vector from an iterator
    ///
    /// # Arguments
    ///
    /// * `list` - An iterator over items to include
    /// * `limit` - Maximum number of items to include in the truncated vector
    /// * `exact_count` - The exact total count of items (may be larger than limit)
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Returns the exact count of items
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// Returns the truncated items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_vec_new() {
        let truncated = TruncatedVec::new([1, 2, 3, 4, 5].into_iter(), 3, 5);

        assert_eq!(truncated.exact_count(), 5);
        assert_eq!(truncated.items(), &[1, 2, 3]);
    }

    #[test]
    fn test_truncated_vec_limit_larger_than_items() {
        let truncated = TruncatedVec::new([1, 2, 3].into_iter(), 5, 3);

        assert_eq!(truncated.exact_count(), 3);
        assert_eq!(truncated.items(), &[1, 2, 3]);
    }

    #[test]
    fn test_truncated_vec_default_is_empty() {
        let truncated = TruncatedVec::<String>::default();

        assert_eq!(truncated.exact_count(), 0);
        assert!(truncated.items().is_empty());
    }

    #[test]
    fn test_sync_message_to_message() {
        let students = TruncatedVec::new(["Ada".to_owned(), "Grace".to_owned()].into_iter(), 10, 2);
        let json = SyncMessage::Lobby {
            title: "Capitals".to_owned(),
            count: 3,
            students,
        }
        .to_message();

        assert!(json.contains("Lobby"));
        assert!(json.contains("Grace"));
        assert!(json.contains("\"exact_count\":2"));
    }

    #[test]
    fn test_update_message_to_message() {
        let json = UpdateMessage::Error(Error::StaleQuestion).to_message();

        assert!(json.contains("Error"));
        assert!(json.contains("StaleQuestion"));
    }
}
