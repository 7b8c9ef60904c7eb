//! In-memory merge sessions between the two workflow requests.
//!
//! # Responsibility
//! - Hold the candidate set, chosen primary and current plan of each
//!   in-progress merge.
//! - Expire sessions left idle past the configured TTL.
//!
//! # Invariants
//! - Sessions are never persisted; a process restart forgets them.
//! - `Committed` and `Abandoned` are terminal: the session leaves the
//!   registry on entering either state.
//! - An expired session answers `SessionError::Expired` until its tombstone
//!   is purged.

use crate::model::contact::ContactId;
use crate::service::merge_engine::MergePlan;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Caller-supplied session key.
pub type SessionId = String;

/// Merge workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Selecting,
    Proposed,
    Committed,
    Abandoned,
}

impl MergeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Selecting => "selecting",
            Self::Proposed => "proposed",
            Self::Committed => "committed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Abandoned)
    }
}

/// One in-progress merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSession {
    pub id: SessionId,
    /// Distinct candidate ids in submission order.
    pub candidates: Vec<ContactId>,
    pub primary: Option<ContactId>,
    pub plan: Option<MergePlan>,
    pub state: MergeState,
    pub last_touched: Instant,
}

impl MergeSession {
    pub fn new(id: impl Into<SessionId>, candidates: Vec<ContactId>) -> Self {
        Self {
            id: id.into(),
            candidates,
            primary: None,
            plan: None,
            state: MergeState::Selecting,
            last_touched: Instant::now(),
        }
    }
}

/// Registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("merge session `{0}` not found")]
    NotFound(SessionId),
    #[error("merge session `{0}` expired")]
    Expired(SessionId),
    #[error("merge session `{0}` already exists")]
    AlreadyExists(SessionId),
}

#[derive(Default)]
struct Sessions {
    live: HashMap<SessionId, MergeSession>,
    // Expired session ids and when they expired.
    tombstones: HashMap<SessionId, Instant>,
}

/// Thread-safe session store with idle expiry.
pub struct SessionRegistry {
    ttl: Duration,
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers a new session. Idle sessions are swept first, so sessions
    /// nobody looks up again do not accumulate.
    pub fn insert(&self, mut session: MergeSession) -> Result<(), SessionError> {
        let now = Instant::now();
        let mut sessions = self.lock();
        sweep(&mut sessions, now, self.ttl);
        if sessions.live.contains_key(&session.id) {
            return Err(SessionError::AlreadyExists(session.id));
        }
        sessions.tombstones.remove(&session.id);
        session.last_touched = now;
        sessions.live.insert(session.id.clone(), session);
        Ok(())
    }

    /// Returns a snapshot of a live session and refreshes its idle timer.
    pub fn get(&self, id: &str) -> Result<MergeSession, SessionError> {
        self.update(id, |session| Ok::<_, SessionError>(session.clone()))
    }

    /// Runs `apply` on a live session under the registry lock.
    pub fn update<T, E>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut MergeSession) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<SessionError>,
    {
        let now = Instant::now();
        let mut sessions = self.lock();
        let session = self.live_session(&mut sessions, id, now)?;
        session.last_touched = now;
        apply(session)
    }

    /// Removes a session that reached a terminal state.
    pub fn finish(&self, id: &str, state: MergeState) -> Result<MergeSession, SessionError> {
        let now = Instant::now();
        let mut sessions = self.lock();
        self.live_session(&mut sessions, id, now)?;
        let mut session = sessions
            .live
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.state = state;
        Ok(session)
    }

    /// Drops sessions idle past the TTL. Returns how many were dropped.
    pub fn expire_sessions(&self) -> usize {
        self.expire_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire_at(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        sweep(&mut sessions, now, self.ttl)
    }

    fn live_session<'s>(
        &self,
        sessions: &'s mut Sessions,
        id: &str,
        now: Instant,
    ) -> Result<&'s mut MergeSession, SessionError> {
        let idle = match sessions.live.get(id) {
            Some(session) => idle_past(session.last_touched, now, self.ttl),
            None if sessions.tombstones.contains_key(id) => {
                return Err(SessionError::Expired(id.to_string()))
            }
            None => return Err(SessionError::NotFound(id.to_string())),
        };
        if idle {
            sessions.live.remove(id);
            sessions.tombstones.insert(id.to_string(), now);
            return Err(SessionError::Expired(id.to_string()));
        }
        sessions
            .live
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Moves idle sessions to tombstones and purges old tombstones.
fn sweep(sessions: &mut Sessions, now: Instant, ttl: Duration) -> usize {
    let expired: Vec<SessionId> = sessions
        .live
        .values()
        .filter(|session| idle_past(session.last_touched, now, ttl))
        .map(|session| session.id.clone())
        .collect();
    for id in &expired {
        sessions.live.remove(id);
        sessions.tombstones.insert(id.clone(), now);
    }
    sessions
        .tombstones
        .retain(|_, expired_at| !idle_past(*expired_at, now, ttl));
    expired.len()
}

fn idle_past(since: Instant, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(since) > ttl
}

#[cfg(test)]
mod tests {
    use super::{MergeSession, MergeState, SessionError, SessionRegistry};
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    fn session(id: &str) -> MergeSession {
        MergeSession::new(id, vec![Uuid::new_v4(), Uuid::new_v4()])
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.insert(session("s1")).unwrap();
        assert_eq!(
            registry.insert(session("s1")),
            Err(SessionError::AlreadyExists("s1".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn update_mutates_in_place() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.insert(session("s1")).unwrap();

        registry
            .update("s1", |session| {
                session.state = MergeState::Proposed;
                Ok::<_, SessionError>(())
            })
            .unwrap();
        assert_eq!(registry.get("s1").unwrap().state, MergeState::Proposed);
    }

    #[test]
    fn finish_removes_and_marks_terminal() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.insert(session("s1")).unwrap();

        let finished = registry.finish("s1", MergeState::Abandoned).unwrap();
        assert_eq!(finished.state, MergeState::Abandoned);
        assert!(finished.state.is_terminal());
        assert!(registry.is_empty());
        assert_eq!(
            registry.get("s1"),
            Err(SessionError::NotFound("s1".to_string()))
        );
    }

    #[test]
    fn idle_sessions_expire() {
        let registry = SessionRegistry::new(Duration::from_secs(30));
        registry.insert(session("old")).unwrap();

        assert_eq!(registry.expire_at(Instant::now()), 0);
        assert_eq!(
            registry.expire_at(Instant::now() + Duration::from_secs(31)),
            1
        );
        assert_eq!(
            registry.get("old"),
            Err(SessionError::Expired("old".to_string()))
        );

        registry.insert(session("old")).unwrap();
        assert_eq!(registry.get("old").unwrap().state, MergeState::Selecting);
    }

    #[test]
    fn tombstones_are_purged_after_another_ttl() {
        let registry = SessionRegistry::new(Duration::from_secs(30));
        registry.insert(session("old")).unwrap();

        let expired_at = Instant::now() + Duration::from_secs(31);
        registry.expire_at(expired_at);
        registry.expire_at(expired_at + Duration::from_secs(31));

        assert_eq!(
            registry.get("old"),
            Err(SessionError::NotFound("old".to_string()))
        );
    }

    #[test]
    fn insert_sweeps_idle_sessions() {
        let registry = SessionRegistry::new(Duration::from_millis(50));
        for index in 0..20 {
            registry.insert(session(&format!("idle-{index}"))).unwrap();
        }
        assert_eq!(registry.len(), 20);

        std::thread::sleep(Duration::from_millis(120));
        registry.insert(session("fresh")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("idle-0"),
            Err(SessionError::Expired("idle-0".to_string()))
        );
        assert!(registry.get("fresh").is_ok());
    }
}
