use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::identity;

/// Identifier assigned to a question by the poll store. Always positive.
pub type QuestionId = u64;

/// A single recorded vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub fingerprint: String,
    pub email: String,
    pub usn: String,
    pub year: String,
    pub option: String,
}

/// A vote request as received from a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub question_id: QuestionId,
    pub email: String,
    pub usn: String,
    pub year: String,
    pub option: String,
}

impl Ballot {
    pub(crate) fn into_vote(self) -> Vote {
        Vote {
            fingerprint: identity::fingerprint(&self.email, &self.usn),
            email: self.email,
            usn: self.usn,
            year: self.year,
            option: self.option,
        }
    }
}

/// A poll question with its options, votes and derived tallies.
///
/// Tallies are never set directly: they start at zero for every declared
/// option and are bumped once per appended vote, so each count always equals
/// the number of stored votes choosing that option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    text: String,
    options: Vec<String>,
    tallies: HashMap<String, u64>,
    votes: Vec<Vote>,
}

impl Question {
    pub(crate) fn new(id: QuestionId, text: String, options: Vec<String>) -> Self {
        let tallies = options.iter().map(|option| (option.clone(), 0)).collect();
        Self {
            id,
            text,
            options,
            tallies,
            votes: Vec::new(),
        }
    }

    /// Rebuilds a question from persisted parts, replaying `votes` in order to
    /// derive the tallies.
    ///
    /// Votes for options that were never declared get their own bucket.
    pub fn restore(id: QuestionId, text: String, options: Vec<String>, votes: Vec<Vote>) -> Self {
        let mut question = Self::new(id, text, options);
        for vote in votes {
            question.push_vote(vote);
        }
        question
    }

    pub fn id(&self) -> QuestionId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Declared options in creation order. May contain repeated labels.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Votes in arrival order.
    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn tallies(&self) -> &HashMap<String, u64> {
        &self.tallies
    }

    /// Returns the current count for `option`, zero when nobody chose it.
    pub fn tally(&self, option: &str) -> u64 {
        self.tallies.get(option).copied().unwrap_or(0)
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|declared| declared == option)
    }

    /// Returns `true` if a prior vote used the same email or the same USN.
    ///
    /// Deviation from exact field equality: both fields are compared
    /// case-insensitively, so `1MS22CS001` and `1ms22cs001` count as the same
    /// voter, in line with the case-insensitive identity rule.
    pub fn has_voted(&self, email: &str, usn: &str) -> bool {
        self.votes.iter().any(|vote| {
            identity::same_identity_field(&vote.email, email)
                || identity::same_identity_field(&vote.usn, usn)
        })
    }

    pub(crate) fn push_vote(&mut self, vote: Vote) -> &Vote {
        *self.tallies.entry(vote.option.clone()).or_insert(0) += 1;
        self.votes.push(vote);
        &self.votes[self.votes.len() - 1]
    }

    /// Public projection used by the `/latest` endpoint.
    pub fn view(&self) -> QuestionView {
        let results = self
            .options
            .iter()
            .map(|option| (option.clone(), self.tally(option)))
            .collect();

        QuestionView {
            id: self.id,
            question: self.text.clone(),
            options: self.options.clone(),
            results,
        }
    }
}

/// Serializable summary of a question and its live results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub question: String,
    pub options: Vec<String>,
    pub results: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(email: &str, usn: &str, option: &str) -> Vote {
        Vote {
            fingerprint: identity::fingerprint(email, usn),
            email: email.to_string(),
            usn: usn.to_string(),
            year: "2026".to_string(),
            option: option.to_string(),
        }
    }

    #[test]
    fn restore_derives_tallies_from_votes() {
        let question = Question::restore(
            3,
            "Best language?".to_string(),
            vec!["Go".to_string(), "Rust".to_string()],
            vec![
                vote("1ms22cs001@x.com", "1ms22cs001", "Rust"),
                vote("1ms22cs002@x.com", "1ms22cs002", "Rust"),
                vote("1ms22cs003@x.com", "1ms22cs003", "Go"),
            ],
        );

        assert_eq!(question.tally("Rust"), 2);
        assert_eq!(question.tally("Go"), 1);
        assert_eq!(question.votes().len(), 3);
        assert_eq!(question.votes()[0].option, "Rust");
    }

    #[test]
    fn restore_keeps_votes_for_undeclared_options() {
        let question = Question::restore(
            1,
            "Pick".to_string(),
            vec!["A".to_string()],
            vec![vote("1ms22cs001@x.com", "1ms22cs001", "Z")],
        );

        assert_eq!(question.tally("Z"), 1);
        assert_eq!(question.tally("A"), 0);
        assert!(!question.has_option("Z"));
        assert!(!question.view().results.contains_key("Z"));
    }

    #[test]
    fn has_voted_ignores_case_on_either_field() {
        let mut question = Question::new(1, "Pick".to_string(), vec!["A".to_string()]);
        question.push_vote(vote("1ms22cs001@x.com", "1ms22cs001", "A"));

        assert!(question.has_voted("1MS22CS001@X.COM", "1ms22cs999"));
        assert!(question.has_voted("1ms22cs999@x.com", "1MS22CS001"));
        assert!(!question.has_voted("1ms22cs999@x.com", "1ms22cs999"));
    }

    #[test]
    fn duplicate_labels_share_one_tally() {
        let question = Question::new(
            1,
            "Pick".to_string(),
            vec!["A".to_string(), "A".to_string(), "B".to_string()],
        );

        assert_eq!(question.options().len(), 3);
        assert_eq!(question.tallies().len(), 2);
    }

    #[test]
    fn view_serializes_results_by_option() {
        let mut question = Question::new(
            7,
            "Best language?".to_string(),
            vec!["Go".to_string(), "Rust".to_string()],
        );
        question.push_vote(vote("1ms22cs001@x.com", "1ms22cs001", "Go"));

        let json = serde_json::to_value(question.view()).expect("serialize view");
        assert_eq!(json["id"].as_u64(), Some(7));
        assert_eq!(json["question"].as_str(), Some("Best language?"));
        assert_eq!(json["options"][1].as_str(), Some("Rust"));
        assert_eq!(json["results"]["Go"].as_u64(), Some(1));
        assert_eq!(json["results"]["Rust"].as_u64(), Some(0));
    }
}
