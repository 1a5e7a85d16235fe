// Grind session tracking: one timed study session per user, recovered
// across restarts via the store's active-session marker, rolled up into
// a power-level score.
//
// Local state is authoritative. Store writes are best-effort: failures
// are logged and never roll back a local transition.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::{ActiveSession, SessionStore, StudySession};

/// An active session older than this is assumed abandoned and is
/// auto-closed at exactly this duration.
pub const STALE_AFTER_HOURS: i64 = 24;

fn stale_after() -> Duration {
    Duration::hours(STALE_AFTER_HOURS)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GrindState {
    Idle,
    Grinding {
        subject: String,
        started_at: DateTime<Utc>,
    },
}

/// Derived score over the retained session list.
///
/// `total_minutes` sums every retained session; it is not windowed to
/// any trailing period. `average_drill_accuracy` is supplied by the
/// caller and carried through recomputes untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerLevelSummary {
    /// 0-100: one point per ten study minutes, capped.
    pub score: u32,
    pub total_minutes: u32,
    pub average_drill_accuracy: f64,
}

impl PowerLevelSummary {
    fn zero() -> PowerLevelSummary {
        PowerLevelSummary {
            score: 0,
            total_minutes: 0,
            average_drill_accuracy: 0.0,
        }
    }
}

pub struct GrindTracker<S> {
    user_id: String,
    store: S,
    state: GrindState,
    sessions: Vec<StudySession>,
    power: PowerLevelSummary,
}

fn duration_minutes(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> u32 {
    let ms = (ended_at - started_at).num_milliseconds().max(0) as f64;
    ((ms / 60_000.0).round() as u32).max(1)
}

impl<S: SessionStore> GrindTracker<S> {
    pub fn new(user_id: impl Into<String>, store: S) -> GrindTracker<S> {
        GrindTracker {
            user_id: user_id.into(),
            store,
            state: GrindState::Idle,
            sessions: Vec::new(),
            power: PowerLevelSummary::zero(),
        }
    }

    pub fn state(&self) -> &GrindState {
        &self.state
    }

    pub fn is_grinding(&self) -> bool {
        matches!(self.state, GrindState::Grinding { .. })
    }

    pub fn sessions(&self) -> &[StudySession] {
        &self.sessions
    }

    pub fn power_level(&self) -> PowerLevelSummary {
        self.power
    }

    /// Whole minutes since the open session began, 0 when idle.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        match &self.state {
            GrindState::Idle => 0,
            GrindState::Grinding { started_at, .. } => (now - *started_at).num_minutes().max(0),
        }
    }

    /// Open a session on `subject`. If one is already open it is first
    /// closed through the normal stop path, so switching subjects never
    /// discards elapsed time.
    pub async fn start_grind(&mut self, subject: &str, now: DateTime<Utc>) {
        if self.is_grinding() {
            self.stop_grind(now).await;
        }
        self.state = GrindState::Grinding {
            subject: subject.to_string(),
            started_at: now,
        };
        let marker = ActiveSession {
            subject_id: subject.to_string(),
            started_at: now,
        };
        if let Err(e) = self
            .store
            .save_active_session(&self.user_id, Some(&marker))
            .await
        {
            tracing::warn!(error = %e, user_id = %self.user_id, subject,
                "failed to persist active-session marker");
        }
    }

    /// Close the open session, recording it locally and, best-effort,
    /// in the store. No-op when idle. The recorded duration is rounded
    /// to the nearest minute with a floor of one.
    pub async fn stop_grind(&mut self, now: DateTime<Utc>) {
        let GrindState::Grinding {
            subject,
            started_at,
        } = std::mem::replace(&mut self.state, GrindState::Idle)
        else {
            return;
        };
        let session = StudySession {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject,
            started_at,
            ended_at: now,
            duration_minutes: duration_minutes(started_at, now),
        };
        self.record_session(session).await;
    }

    /// Reconcile with the store at startup. A marker younger than
    /// the staleness threshold resumes the session from its original start; an
    /// older one is auto-closed, capped at exactly 24 hours. With no
    /// marker the local state is left as is. Last write wins across
    /// devices.
    pub async fn sync_active_session(&mut self, now: DateTime<Utc>) {
        let marker = match self.store.get_active_session(&self.user_id).await {
            Ok(marker) => marker,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %self.user_id,
                    "failed to fetch active-session marker");
                return;
            }
        };
        let Some(marker) = marker else {
            return;
        };

        if now - marker.started_at > stale_after() {
            let ended_at = marker.started_at + stale_after();
            let session = StudySession {
                id: uuid::Uuid::new_v4().to_string(),
                subject_id: marker.subject_id,
                started_at: marker.started_at,
                ended_at,
                duration_minutes: duration_minutes(marker.started_at, ended_at),
            };
            self.state = GrindState::Idle;
            self.record_session(session).await;
        } else {
            self.state = GrindState::Grinding {
                subject: marker.subject_id,
                started_at: marker.started_at,
            };
        }
    }

    /// Replace the retained session list (e.g. after a store fetch) and
    /// recompute the aggregate. Leaves the grind state alone.
    pub fn load_sessions(&mut self, sessions: Vec<StudySession>) {
        self.sessions = sessions;
        self.recompute();
    }

    /// Drop all retained sessions and zero the aggregate. Used on
    /// sign-out.
    pub fn clear_sessions(&mut self) {
        self.sessions.clear();
        self.power = PowerLevelSummary::zero();
    }

    /// Drill accuracy is computed elsewhere; it rides along in the
    /// summary without affecting the score.
    pub fn set_drill_accuracy(&mut self, accuracy: f64) {
        self.power.average_drill_accuracy = accuracy;
    }

    async fn record_session(&mut self, session: StudySession) {
        self.sessions.push(session.clone());
        self.recompute();

        if let Err(e) = self.store.save_study_session(&self.user_id, &session).await {
            tracing::warn!(error = %e, user_id = %self.user_id, session_id = %session.id,
                "failed to persist study session");
        }
        if let Err(e) = self.store.save_active_session(&self.user_id, None).await {
            tracing::warn!(error = %e, user_id = %self.user_id,
                "failed to clear active-session marker");
        }
    }

    fn recompute(&mut self) {
        let total: u32 = self.sessions.iter().map(|s| s.duration_minutes).sum();
        self.power.total_minutes = total;
        self.power.score = u32::min(100, (f64::from(total) / 10.0).round() as u32);
    }
}
