//! Domain layer for the poll service.
//!
//! Everything in this crate is synchronous and free of I/O: the poll store,
//! the identity rules voters must satisfy, and the bookkeeping that keeps
//! per-option tallies consistent with the recorded votes. Persistence and
//! locking are layered on top by the storage and app crates.

pub mod identity;
pub mod store;
pub mod types;

pub use store::{PollStore, QuestionError, VoteError};
pub use types::{Ballot, Question, QuestionId, QuestionView, Vote};
