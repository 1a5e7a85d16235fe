// Persistence port for the session tracker, plus the two shipped
// implementations: an in-memory store and a CSV-file store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed record in {file}: {reason}")]
    Malformed { file: String, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A closed study session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySession {
    pub id: String,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Rounded to the nearest minute, never below 1.
    pub duration_minutes: u32,
}

/// The single open-session marker a user may have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
}

/// Durable backend for session records, scoped per user id.
///
/// `save_study_session` is an append that must be idempotent on the
/// session id; `save_active_session` upserts (or clears, with `None`)
/// the one active-session marker.
#[allow(async_fn_in_trait)]
pub trait SessionStore {
    async fn save_study_session(
        &self,
        user_id: &str,
        session: &StudySession,
    ) -> Result<(), StoreError>;

    async fn save_active_session(
        &self,
        user_id: &str,
        active: Option<&ActiveSession>,
    ) -> Result<(), StoreError>;

    async fn get_active_session(&self, user_id: &str) -> Result<Option<ActiveSession>, StoreError>;

    async fn load_study_sessions(&self, user_id: &str) -> Result<Vec<StudySession>, StoreError>;
}

impl<S: SessionStore> SessionStore for &S {
    async fn save_study_session(
        &self,
        user_id: &str,
        session: &StudySession,
    ) -> Result<(), StoreError> {
        (**self).save_study_session(user_id, session).await
    }

    async fn save_active_session(
        &self,
        user_id: &str,
        active: Option<&ActiveSession>,
    ) -> Result<(), StoreError> {
        (**self).save_active_session(user_id, active).await
    }

    async fn get_active_session(&self, user_id: &str) -> Result<Option<ActiveSession>, StoreError> {
        (**self).get_active_session(user_id).await
    }

    async fn load_study_sessions(&self, user_id: &str) -> Result<Vec<StudySession>, StoreError> {
        (**self).load_study_sessions(user_id).await
    }
}

// -- In-memory store --

/// In-memory store, used in tests and anywhere durability is not needed.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, Vec<StudySession>>,
    active: HashMap<String, ActiveSession>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl SessionStore for MemoryStore {
    async fn save_study_session(
        &self,
        user_id: &str,
        session: &StudySession,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let sessions = inner.sessions.entry(user_id.to_string()).or_default();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        Ok(())
    }

    async fn save_active_session(
        &self,
        user_id: &str,
        active: Option<&ActiveSession>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match active {
            Some(a) => {
                inner.active.insert(user_id.to_string(), a.clone());
            }
            None => {
                inner.active.remove(user_id);
            }
        }
        Ok(())
    }

    async fn get_active_session(&self, user_id: &str) -> Result<Option<ActiveSession>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.active.get(user_id).cloned())
    }

    async fn load_study_sessions(&self, user_id: &str) -> Result<Vec<StudySession>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(user_id).cloned().unwrap_or_default())
    }
}

// -- CSV-file store --

/// Store backed by per-user CSV files under a data directory:
/// `<user>-sessions.csv` holds closed sessions, `<user>-active.csv`
/// holds the open-session marker (absent file means no marker).
///
/// Files are small enough that each write rereads and rewrites the
/// whole file, which also makes `save_study_session` idempotent.
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<CsvStore, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(CsvStore { root })
    }

    fn sessions_path(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{user_id}-sessions.csv"))
    }

    fn active_path(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{user_id}-active.csv"))
    }
}

fn parse_datetime(s: &str, file: &Path) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed {
            file: file.display().to_string(),
            reason: format!("bad timestamp {s:?}: {e}"),
        })
}

fn field(record: &csv::StringRecord, index: usize) -> String {
    record.get(index).unwrap_or("").to_string()
}

fn read_sessions(path: &Path) -> Result<Vec<StudySession>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut sessions = Vec::new();
    for result in reader.records() {
        let record = result?;
        let minutes = field(&record, 4);
        sessions.push(StudySession {
            id: field(&record, 0),
            subject_id: field(&record, 1),
            started_at: parse_datetime(&field(&record, 2), path)?,
            ended_at: parse_datetime(&field(&record, 3), path)?,
            duration_minutes: minutes.trim().parse().map_err(|e| StoreError::Malformed {
                file: path.display().to_string(),
                reason: format!("bad duration {minutes:?}: {e}"),
            })?,
        });
    }
    Ok(sessions)
}

fn write_sessions(path: &Path, sessions: &[StudySession]) -> Result<(), StoreError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["id", "subject_id", "started_at", "ended_at", "duration_minutes"])?;
    for s in sessions {
        writer.write_record([
            &s.id,
            &s.subject_id,
            &s.started_at.to_rfc3339(),
            &s.ended_at.to_rfc3339(),
            &s.duration_minutes.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

impl SessionStore for CsvStore {
    async fn save_study_session(
        &self,
        user_id: &str,
        session: &StudySession,
    ) -> Result<(), StoreError> {
        let path = self.sessions_path(user_id);
        let mut sessions = read_sessions(&path)?;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        write_sessions(&path, &sessions)
    }

    async fn save_active_session(
        &self,
        user_id: &str,
        active: Option<&ActiveSession>,
    ) -> Result<(), StoreError> {
        let path = self.active_path(user_id);
        match active {
            Some(a) => {
                let mut writer = csv::Writer::from_path(&path)?;
                writer.write_record(["subject_id", "started_at"])?;
                writer.write_record([&a.subject_id, &a.started_at.to_rfc3339()])?;
                writer.flush()?;
                Ok(())
            }
            None => match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn get_active_session(&self, user_id: &str) -> Result<Option<ActiveSession>, StoreError> {
        let path = self.active_path(user_id);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(&path)?;
        let Some(result) = reader.records().next() else {
            return Ok(None);
        };
        let record = result?;
        Ok(Some(ActiveSession {
            subject_id: field(&record, 0),
            started_at: parse_datetime(&field(&record, 1), &path)?,
        }))
    }

    async fn load_study_sessions(&self, user_id: &str) -> Result<Vec<StudySession>, StoreError> {
        read_sessions(&self.sessions_path(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(id: &str, minutes: u32) -> StudySession {
        let started = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        StudySession {
            id: id.to_string(),
            subject_id: "physics".to_string(),
            started_at: started,
            ended_at: started + chrono::Duration::minutes(minutes as i64),
            duration_minutes: minutes,
        }
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.save_study_session("u1", &session("a", 30)).await.unwrap();
        store.save_study_session("u1", &session("b", 45)).await.unwrap();

        let loaded = store.load_study_sessions("u1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(store.load_study_sessions("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_save_is_idempotent_on_id() {
        let store = MemoryStore::new();
        store.save_study_session("u1", &session("a", 30)).await.unwrap();
        store.save_study_session("u1", &session("a", 30)).await.unwrap();

        let loaded = store.load_study_sessions("u1").await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_active_marker() {
        let store = MemoryStore::new();
        assert!(store.get_active_session("u1").await.unwrap().is_none());

        let marker = ActiveSession {
            subject_id: "biology".to_string(),
            started_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        };
        store.save_active_session("u1", Some(&marker)).await.unwrap();
        assert_eq!(store.get_active_session("u1").await.unwrap(), Some(marker));

        store.save_active_session("u1", None).await.unwrap();
        assert!(store.get_active_session("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn csv_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();

        store.save_study_session("u1", &session("a", 30)).await.unwrap();
        store.save_study_session("u1", &session("b", 45)).await.unwrap();

        let loaded = store.load_study_sessions("u1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], session("a", 30));
        assert_eq!(loaded[1].duration_minutes, 45);
    }

    #[tokio::test]
    async fn csv_store_save_is_idempotent_on_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();

        store.save_study_session("u1", &session("a", 30)).await.unwrap();
        store.save_study_session("u1", &session("a", 30)).await.unwrap();

        assert_eq!(store.load_study_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn csv_store_active_marker_clear_is_safe_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();

        // Clearing with no marker on disk is not an error.
        store.save_active_session("u1", None).await.unwrap();

        let marker = ActiveSession {
            subject_id: "chemistry".to_string(),
            started_at: Utc.with_ymd_and_hms(2025, 3, 2, 20, 15, 0).unwrap(),
        };
        store.save_active_session("u1", Some(&marker)).await.unwrap();
        assert_eq!(store.get_active_session("u1").await.unwrap(), Some(marker));

        store.save_active_session("u1", None).await.unwrap();
        assert!(store.get_active_session("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn csv_store_scopes_by_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();

        store.save_study_session("alice", &session("a", 30)).await.unwrap();
        assert!(store.load_study_sessions("bob").await.unwrap().is_empty());
    }
}
