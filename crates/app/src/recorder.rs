use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use chrono::{DateTime, Datelike, Utc};
use metrics::{counter, gauge, histogram};
use tracing::{info, warn};

use quickpoll_core::{
    Ballot, PollStore, QuestionError, QuestionId, QuestionView, VoteError,
};
use quickpoll_storage::{SnapshotError, SnapshotStore};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Owns the poll store and serializes every operation on it.
///
/// A single lock spans validation, duplicate detection, the append and the
/// snapshot write, so two requests from the same identity cannot both pass
/// the duplicate check. When a snapshot write fails the in-memory change is
/// kept and the store is flagged dirty until a later write succeeds.
#[derive(Clone)]
pub struct PollService {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<PollState>,
    snapshots: SnapshotStore,
    clock: Clock,
}

struct PollState {
    store: PollStore,
    dirty: bool,
}

/// Vote as submitted over the API. `year` falls back to the current year.
#[derive(Debug, Clone)]
pub struct VoteRequest {
    pub question_id: QuestionId,
    pub email: String,
    pub usn: String,
    pub option: String,
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub question_id: QuestionId,
    pub fingerprint: String,
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionReceipt {
    pub id: QuestionId,
    pub persisted: bool,
}

impl PollService {
    pub fn new(store: PollStore, snapshots: SnapshotStore) -> Self {
        Self::with_clock(store, snapshots, Arc::new(Utc::now))
    }

    pub fn with_clock(store: PollStore, snapshots: SnapshotStore, clock: Clock) -> Self {
        gauge!("snapshot_dirty").set(0.0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PollState {
                    store,
                    dirty: false,
                }),
                snapshots,
                clock,
            }),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.inner.clock)()
    }

    // Every mutation completes or leaves the store untouched, so a poisoned
    // guard still protects consistent data.
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a vote and rewrites the snapshot.
    pub fn record_vote(&self, request: VoteRequest) -> Result<VoteReceipt, VoteError> {
        let year = request
            .year
            .map(|year| year.trim().to_string())
            .filter(|year| !year.is_empty())
            .unwrap_or_else(|| self.now().year().to_string());
        let question_id = request.question_id;
        let ballot = Ballot {
            question_id,
            email: request.email,
            usn: request.usn,
            year,
            option: request.option,
        };

        let mut state = self.lock();
        let fingerprint = match state.store.record_vote(ballot) {
            Ok(vote) => vote.fingerprint.clone(),
            Err(err) => {
                counter!("poll_votes_total", "result" => err.as_str()).increment(1);
                info!(stage = "vote", question_id, reason = err.as_str(), "vote rejected");
                return Err(err);
            }
        };
        let persisted = self.persist(&mut state);
        drop(state);

        counter!("poll_votes_total", "result" => "accepted").increment(1);
        info!(stage = "vote", question_id, persisted, "vote recorded");
        Ok(VoteReceipt {
            question_id,
            fingerprint,
            persisted,
        })
    }

    /// Creates a new question, which becomes the latest one.
    pub fn create_question(
        &self,
        text: String,
        options: Vec<String>,
    ) -> Result<QuestionReceipt, QuestionError> {
        let mut state = self.lock();
        let option_count = options.len();
        let id = state.store.create_question(text, options)?;
        let persisted = self.persist(&mut state);
        drop(state);

        counter!("poll_questions_created_total").increment(1);
        info!(stage = "admin", question_id = id, option_count, persisted, "question created");
        Ok(QuestionReceipt { id, persisted })
    }

    /// The question with the highest identifier and its current results.
    pub fn latest(&self) -> Option<QuestionView> {
        self.lock().store.latest().map(|question| question.view())
    }

    /// Returns `true` while the snapshot on disk lags behind memory.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Rewrites the snapshot if an earlier write failed.
    ///
    /// Returns whether a write was attempted.
    pub fn flush(&self) -> Result<bool, SnapshotError> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(false);
        }

        self.inner.snapshots.save(&state.store)?;
        state.dirty = false;
        gauge!("snapshot_dirty").set(0.0);
        info!(stage = "snapshot", path = ?self.inner.snapshots.path(), "dirty snapshot flushed");
        Ok(true)
    }

    fn persist(&self, state: &mut PollState) -> bool {
        let start = Instant::now();
        let result = self.inner.snapshots.save(&state.store);
        histogram!("snapshot_write_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                counter!("snapshot_writes_total", "result" => "ok").increment(1);
                if state.dirty {
                    info!(stage = "snapshot", "snapshot back in sync");
                }
                state.dirty = false;
                gauge!("snapshot_dirty").set(0.0);
                true
            }
            Err(err) => {
                counter!("snapshot_writes_total", "result" => "error").increment(1);
                warn!(
                    stage = "snapshot",
                    path = ?self.inner.snapshots.path(),
                    error = %err,
                    "failed to write snapshot; keeping in-memory state"
                );
                state.dirty = true;
                gauge!("snapshot_dirty").set(1.0);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::{fs, thread};
    use tempfile::tempdir;

    fn request(question_id: QuestionId, usn: &str, option: &str) -> VoteRequest {
        VoteRequest {
            question_id,
            email: format!("{usn}@college.edu"),
            usn: usn.to_string(),
            option: option.to_string(),
            year: None,
        }
    }

    fn fixed_clock(year: i32) -> Clock {
        let at = Utc
            .with_ymd_and_hms(year, 3, 14, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        Arc::new(move || at)
    }

    fn language_options() -> Vec<String> {
        vec!["Go".to_string(), "Rust".to_string()]
    }

    #[test]
    fn vote_is_persisted_to_snapshot() {
        let dir = tempdir().expect("tempdir");
        let snapshots = SnapshotStore::new(dir.path().join("data.json"));
        let service = PollService::new(PollStore::new(), snapshots.clone());

        let created = service
            .create_question("Best language?".to_string(), language_options())
            .expect("create");
        assert_eq!(created, QuestionReceipt { id: 1, persisted: true });

        let receipt = service
            .record_vote(request(1, "1ms22cs001", "Go"))
            .expect("vote");
        assert!(receipt.persisted);
        assert_eq!(receipt.fingerprint.len(), 64);

        let loaded = snapshots.load().expect("load");
        let question = loaded.store.question(1).expect("question");
        assert_eq!(question.tally("Go"), 1);
        assert_eq!(question.votes()[0].fingerprint, receipt.fingerprint);
    }

    #[test]
    fn repeat_identity_leaves_tallies_unchanged() {
        let dir = tempdir().expect("tempdir");
        let service =
            PollService::new(PollStore::new(), SnapshotStore::new(dir.path().join("data.json")));
        service
            .create_question("Best language?".to_string(), language_options())
            .expect("create");

        service
            .record_vote(request(1, "1ms22cs001", "Go"))
            .expect("first vote");
        let err = service
            .record_vote(request(1, "1ms22cs001", "Rust"))
            .expect_err("duplicate");
        assert_eq!(err, VoteError::DuplicateIdentity);

        let latest = service.latest().expect("latest");
        assert_eq!(latest.results.get("Go"), Some(&1));
        assert_eq!(latest.results.get("Rust"), Some(&0));
    }

    #[test]
    fn year_defaults_to_clock_and_respects_request() {
        let dir = tempdir().expect("tempdir");
        let snapshots = SnapshotStore::new(dir.path().join("data.json"));
        let service =
            PollService::with_clock(PollStore::new(), snapshots.clone(), fixed_clock(2031));
        service
            .create_question("Best language?".to_string(), language_options())
            .expect("create");

        service
            .record_vote(request(1, "1ms22cs001", "Go"))
            .expect("vote");
        let mut explicit = request(1, "1ms22cs002", "Rust");
        explicit.year = Some(" 2024 ".to_string());
        service.record_vote(explicit).expect("vote");
        let mut blank = request(1, "1ms22cs003", "Rust");
        blank.year = Some("   ".to_string());
        service.record_vote(blank).expect("vote");

        let loaded = snapshots.load().expect("load");
        let years: Vec<_> = loaded
            .store
            .question(1)
            .expect("question")
            .votes()
            .iter()
            .map(|vote| vote.year.clone())
            .collect();
        assert_eq!(years, vec!["2031", "2024", "2031"]);
    }

    #[test]
    fn failed_write_marks_store_dirty_until_flushed() {
        let dir = tempdir().expect("tempdir");
        let data_dir = dir.path().join("state");
        let snapshots = SnapshotStore::new(data_dir.join("data.json"));
        let service = PollService::new(PollStore::new(), snapshots.clone());

        let created = service
            .create_question("Best language?".to_string(), language_options())
            .expect("create is kept even when the write fails");
        assert!(!created.persisted);
        assert!(service.is_dirty());

        let receipt = service
            .record_vote(request(1, "1ms22cs001", "Rust"))
            .expect("vote is kept");
        assert!(!receipt.persisted);
        assert_eq!(service.latest().expect("latest").results.get("Rust"), Some(&1));

        fs::create_dir(&data_dir).expect("create data dir");
        assert!(service.flush().expect("flush"));
        assert!(!service.is_dirty());
        assert!(!service.flush().expect("second flush is a no-op"));

        let loaded = snapshots.load().expect("load");
        assert_eq!(loaded.store.question(1).expect("question").tally("Rust"), 1);
    }

    #[test]
    fn next_successful_write_clears_dirty_flag() {
        let dir = tempdir().expect("tempdir");
        let data_dir = dir.path().join("state");
        let service =
            PollService::new(PollStore::new(), SnapshotStore::new(data_dir.join("data.json")));

        service
            .create_question("Best language?".to_string(), language_options())
            .expect("create");
        assert!(service.is_dirty());

        fs::create_dir(&data_dir).expect("create data dir");
        let receipt = service
            .record_vote(request(1, "1ms22cs001", "Go"))
            .expect("vote");
        assert!(receipt.persisted);
        assert!(!service.is_dirty());
    }

    #[test]
    fn concurrent_votes_from_one_identity_accept_exactly_one() {
        let dir = tempdir().expect("tempdir");
        let service =
            PollService::new(PollStore::new(), SnapshotStore::new(dir.path().join("data.json")));
        service
            .create_question("Best language?".to_string(), language_options())
            .expect("create");

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let service = service.clone();
                thread::spawn(move || {
                    let option = if n % 2 == 0 { "Go" } else { "Rust" };
                    service.record_vote(request(1, "1ms22cs001", option))
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(Result::is_ok)
            .count();
        assert_eq!(accepted, 1);

        let latest = service.latest().expect("latest");
        assert_eq!(latest.results.values().sum::<u64>(), 1);
    }

    #[test]
    fn concurrent_distinct_voters_are_all_counted() {
        let dir = tempdir().expect("tempdir");
        let snapshots = SnapshotStore::new(dir.path().join("data.json"));
        let service = PollService::new(PollStore::new(), snapshots.clone());
        service
            .create_question("Best language?".to_string(), language_options())
            .expect("create");

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let service = service.clone();
                thread::spawn(move || {
                    let usn = format!("1ms22cs{n:03}");
                    service.record_vote(request(1, &usn, "Rust"))
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread").expect("vote accepted");
        }

        assert_eq!(service.latest().expect("latest").results.get("Rust"), Some(&16));
        let loaded = snapshots.load().expect("load");
        assert_eq!(loaded.store.question(1).expect("question").votes().len(), 16);
    }
}
