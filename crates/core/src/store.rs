use std::collections::BTreeMap;

use thiserror::Error;

use crate::identity;
use crate::types::{Ballot, Question, QuestionId, Vote};

/// In-memory collection of questions keyed by identifier.
///
/// `next_id` is kept strictly greater than every stored identifier, so
/// identifiers handed out by [`PollStore::create_question`] are unique and
/// increasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStore {
    questions: BTreeMap<QuestionId, Question>,
    next_id: QuestionId,
}

impl Default for PollStore {
    fn default() -> Self {
        Self {
            questions: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl PollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from previously persisted questions.
    ///
    /// A later question with the same identifier replaces an earlier one.
    /// Questions whose identifier leaves no successor are dropped so that
    /// `next_id` stays above every stored identifier.
    pub fn from_questions<I>(questions: I) -> Self
    where
        I: IntoIterator<Item = Question>,
    {
        let mut store = Self::new();
        for question in questions {
            let Some(successor) = question.id().checked_add(1) else {
                continue;
            };
            store.next_id = store.next_id.max(successor);
            store.questions.insert(question.id(), question);
        }
        store
    }

    pub fn next_id(&self) -> QuestionId {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.get(&id)
    }

    /// Iterates questions in identifier order.
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.questions.values()
    }

    /// The active question: the one with the highest identifier.
    pub fn latest(&self) -> Option<&Question> {
        self.questions.last_key_value().map(|(_, question)| question)
    }

    /// Inserts a new question and returns its identifier.
    ///
    /// Option labels are kept as given; repeated labels share one tally.
    pub fn create_question(
        &mut self,
        text: impl Into<String>,
        options: Vec<String>,
    ) -> Result<QuestionId, QuestionError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }
        if options.is_empty() {
            return Err(QuestionError::NoOptions);
        }

        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(QuestionError::IdsExhausted)?;
        self.questions.insert(id, Question::new(id, text, options));
        Ok(id)
    }

    /// Validates and appends a vote, returning the stored record.
    ///
    /// Gates run in order: identity plausibility, question existence,
    /// one vote per email and per USN, declared option. The store is left
    /// untouched when any gate fails.
    pub fn record_vote(&mut self, ballot: Ballot) -> Result<&Vote, VoteError> {
        if !identity::validate(&ballot.email, &ballot.usn) {
            return Err(VoteError::InvalidIdentity);
        }

        let question = self
            .questions
            .get_mut(&ballot.question_id)
            .ok_or(VoteError::QuestionNotFound(ballot.question_id))?;

        if question.has_voted(&ballot.email, &ballot.usn) {
            return Err(VoteError::DuplicateIdentity);
        }

        if !question.has_option(&ballot.option) {
            return Err(VoteError::UnknownOption(ballot.option));
        }

        Ok(question.push_vote(ballot.into_vote()))
    }
}

/// Reasons a vote is turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("email prefix and USN do not match")]
    InvalidIdentity,
    #[error("question {0} does not exist")]
    QuestionNotFound(QuestionId),
    #[error("this identity has already voted")]
    DuplicateIdentity,
    #[error("option {0:?} is not offered by this question")]
    UnknownOption(String),
}

impl VoteError {
    /// Short label used in metrics and problem types.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidIdentity => "invalid_identity",
            Self::QuestionNotFound(_) => "not_found",
            Self::DuplicateIdentity => "duplicate",
            Self::UnknownOption(_) => "unknown_option",
        }
    }
}

/// Reasons a question cannot be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionError {
    #[error("question text must not be empty")]
    EmptyText,
    #[error("a question needs at least one option")]
    NoOptions,
    #[error("no question identifiers are left")]
    IdsExhausted,
}
