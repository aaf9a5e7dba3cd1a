use std::{
    collections::BTreeMap,
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use quickpoll_core::{PollStore, Question, QuestionId, Vote};

/// Handle to the JSON snapshot file holding every question and vote.
///
/// The file is rewritten wholesale on every save. Writes go to a temporary
/// file in the same directory which is then renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot and rebuilds the poll store from it.
    ///
    /// A missing, blank or unparseable file yields an empty store. Unparseable
    /// files are moved aside first so the next save does not overwrite them.
    /// Tallies are always recomputed from the stored votes.
    pub fn load(&self) -> Result<LoadedSnapshot, SnapshotError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(LoadedSnapshot::empty(LoadStatus::Missing));
            }
            Err(source) => {
                return Err(SnapshotError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(LoadedSnapshot::empty(LoadStatus::Empty));
        }

        let document: BTreeMap<String, Value> = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(_) => {
                let mut loaded = LoadedSnapshot::empty(LoadStatus::Corrupt);
                loaded.report.quarantined = self.quarantine();
                return Ok(loaded);
            }
        };

        let mut report = LoadReport {
            status: LoadStatus::Loaded,
            ..LoadReport::default()
        };
        let mut questions = Vec::with_capacity(document.len());

        for (_, entry) in document {
            let record = match serde_json::from_value::<QuestionRecord>(entry) {
                Ok(record) if record.id > 0 && record.id < QuestionId::MAX => record,
                _ => {
                    report.skipped_entries += 1;
                    continue;
                }
            };

            let (question, skipped_votes) = record.into_domain();
            report.skipped_votes += skipped_votes;
            questions.push(question);
        }

        report.questions = questions.len();
        Ok(LoadedSnapshot {
            store: PollStore::from_questions(questions),
            report,
        })
    }

    /// Serializes the full store and atomically replaces the snapshot file.
    pub fn save(&self, store: &PollStore) -> Result<(), SnapshotError> {
        let document: BTreeMap<String, QuestionRecordRef<'_>> = store
            .questions()
            .map(|question| (question.id().to_string(), QuestionRecordRef::from(question)))
            .collect();

        let mut temp = NamedTempFile::new_in(self.directory()).map_err(|source| {
            SnapshotError::Write {
                path: self.path.clone(),
                source,
            }
        })?;

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, &document).map_err(SnapshotError::Encode)?;
            writer.flush().map_err(|source| SnapshotError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        temp.as_file()
            .sync_all()
            .map_err(|source| SnapshotError::Write {
                path: self.path.clone(),
                source,
            })?;

        temp.persist(&self.path)
            .map_err(|err| SnapshotError::Persist {
                path: self.path.clone(),
                source: err.error,
            })?;

        Ok(())
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn quarantine(&self) -> Option<PathBuf> {
        let file_name = self.path.file_name()?.to_string_lossy().into_owned();
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let target = self
            .path
            .with_file_name(format!("{file_name}.corrupt-{stamp}"));
        fs::rename(&self.path, &target).ok()?;
        Some(target)
    }
}

/// Store rebuilt from disk together with what happened while reading it.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub store: PollStore,
    pub report: LoadReport,
}

impl LoadedSnapshot {
    fn empty(status: LoadStatus) -> Self {
        Self {
            store: PollStore::new(),
            report: LoadReport {
                status,
                ..LoadReport::default()
            },
        }
    }
}

/// Outcome of reading the snapshot file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadStatus {
    #[default]
    Missing,
    Empty,
    Corrupt,
    Loaded,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Empty => "empty",
            Self::Corrupt => "corrupt",
            Self::Loaded => "loaded",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub status: LoadStatus,
    pub questions: usize,
    /// Question entries that could not be decoded, or whose id was 0 or
    /// left no successor.
    pub skipped_entries: usize,
    /// Votes missing `hash`, `email` or `usn`.
    pub skipped_votes: usize,
    /// Where an unparseable snapshot was moved to, if it could be moved.
    pub quarantined: Option<PathBuf>,
}

/// Errors raised while reading or writing the snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write snapshot {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to replace snapshot {path:?}: {source}")]
    Persist { path: PathBuf, source: io::Error },
}

#[derive(Debug, Deserialize)]
struct QuestionRecord {
    id: QuestionId,
    text: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    votes: Vec<VoteRecord>,
}

impl QuestionRecord {
    fn into_domain(self) -> (Question, usize) {
        let total = self.votes.len();
        let votes: Vec<Vote> = self
            .votes
            .into_iter()
            .filter_map(VoteRecord::into_domain)
            .collect();
        let skipped = total - votes.len();
        (
            Question::restore(self.id, self.text, self.options, votes),
            skipped,
        )
    }
}

#[derive(Debug, Deserialize)]
struct VoteRecord {
    hash: Option<String>,
    email: Option<String>,
    usn: Option<String>,
    #[serde(default)]
    year: String,
    #[serde(default)]
    option: String,
}

impl VoteRecord {
    fn into_domain(self) -> Option<Vote> {
        Some(Vote {
            fingerprint: self.hash?,
            email: self.email?,
            usn: self.usn?,
            year: self.year,
            option: self.option,
        })
    }
}

#[derive(Serialize)]
struct QuestionRecordRef<'a> {
    id: QuestionId,
    text: &'a str,
    options: &'a [String],
    votes: Vec<VoteRecordRef<'a>>,
}

impl<'a> From<&'a Question> for QuestionRecordRef<'a> {
    fn from(question: &'a Question) -> Self {
        Self {
            id: question.id(),
            text: question.text(),
            options: question.options(),
            votes: question.votes().iter().map(VoteRecordRef::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct VoteRecordRef<'a> {
    hash: &'a str,
    email: &'a str,
    usn: &'a str,
    year: &'a str,
    option: &'a str,
}

impl<'a> From<&'a Vote> for VoteRecordRef<'a> {
    fn from(vote: &'a Vote) -> Self {
        Self {
            hash: &vote.fingerprint,
            email: &vote.email,
            usn: &vote.usn,
            year: &vote.year,
            option: &vote.option,
        }
    }
}
