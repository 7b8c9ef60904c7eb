//! Merge workflow orchestration.
//!
//! # Responsibility
//! - Validate candidate sets and open merge sessions.
//! - Build merge plans through the conflict resolver.
//! - Commit a resolved plan atomically through the record store, under
//!   merge locks covering every contact the commit touches.
//!
//! # Invariants
//! - `begin_merge` and `propose_merge` never write to the store.
//! - `commit_merge` either applies the whole merge or nothing.
//! - Merge locks taken by a commit are released on every exit path.
//! - Only ids and counts are logged; contact field values never are.

use crate::model::contact::{Contact, ContactId};
use crate::model::field::{ContactField, FieldKindMismatch, FieldValue};
use crate::repo::contact_repo::RepoError;
use crate::repo::merge_repo::{MergeApplied, MergeCommit, MergeStore};
use crate::repo::reference_repo::{ContactReference, ReferenceEntity};
use crate::service::conflict_resolver::{resolve_fields, FieldResolution, ResolutionPolicy};
use crate::service::merge_session::{
    MergeSession, MergeState, SessionError, SessionId, SessionRegistry,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

/// Chosen values for conflicting fields.
pub type FieldResolutions = BTreeMap<ContactField, FieldValue>;

pub type MergeResult<T> = Result<T, MergeError>;

/// Default idle lifetime of a merge session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Proposed merge of one candidate set into one primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    pub session_id: SessionId,
    pub primary_id: ContactId,
    /// Remaining candidates, in submission order.
    pub secondary_ids: Vec<ContactId>,
    #[serde(flatten)]
    pub fields: FieldResolution,
    /// Candidate revisions the plan was built against.
    pub revisions: BTreeMap<ContactId, i64>,
}

impl MergePlan {
    pub fn conflict_fields(&self) -> Vec<ContactField> {
        self.fields.conflict_fields()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.fields.conflicts.is_empty()
    }
}

/// Merge use-case errors.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("invalid candidate selection: {0}")]
    InvalidSelection(String),
    #[error("primary {0} is not one of the merge candidates")]
    InvalidPrimary(ContactId),
    #[error("unresolved conflicts on: {}", join_fields(.fields))]
    UnresolvedConflict { fields: Vec<ContactField> },
    #[error("invalid resolution: {0}")]
    InvalidResolution(#[from] FieldKindMismatch),
    #[error("cannot rewrite {entity} references: {reason}")]
    ReferenceRewriteFailed {
        entity: ReferenceEntity,
        reason: String,
    },
    #[error("contacts are being merged or were modified concurrently: {}", join_ids(.contacts))]
    ConcurrentMergeConflict { contacts: Vec<ContactId> },
    #[error("contact not found: {0}")]
    NotFound(ContactId),
    #[error("merge session `{0}` not found")]
    SessionNotFound(SessionId),
    #[error("merge session `{0}` expired")]
    SessionExpired(SessionId),
    #[error("invalid merge session state: {0}")]
    InvalidSessionState(String),
    #[error("{0}")]
    Repo(RepoError),
}

impl MergeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSelection(_) => "invalid_selection",
            Self::InvalidPrimary(_) => "invalid_primary",
            Self::UnresolvedConflict { .. } => "unresolved_conflict",
            Self::InvalidResolution(_) => "invalid_resolution",
            Self::ReferenceRewriteFailed { .. } => "reference_rewrite_failed",
            Self::ConcurrentMergeConflict { .. } => "concurrent_merge_conflict",
            Self::NotFound(_) => "not_found",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExpired(_) => "session_expired",
            Self::InvalidSessionState(_) => "invalid_session_state",
            Self::Repo(_) => "storage_error",
        }
    }

    /// Whether the caller may retry within the same session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedConflict { .. } | Self::ConcurrentMergeConflict { .. }
        )
    }
}

impl From<RepoError> for MergeError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::StaleContact(id) | RepoError::AlreadySecondary(id) => {
                Self::ConcurrentMergeConflict { contacts: vec![id] }
            }
            RepoError::LockUnavailable { held } => Self::ConcurrentMergeConflict { contacts: held },
            RepoError::ReferenceRewrite { entity, reason } => {
                Self::ReferenceRewriteFailed { entity, reason }
            }
            other => Self::Repo(other),
        }
    }
}

impl From<SessionError> for MergeError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::NotFound(id) => Self::SessionNotFound(id),
            SessionError::Expired(id) => Self::SessionExpired(id),
            SessionError::AlreadyExists(id) => {
                Self::InvalidSelection(format!("merge session `{id}` already exists"))
            }
        }
    }
}

/// Two-step merge workflow over a record store.
pub struct MergeEngine<S: MergeStore> {
    store: S,
    sessions: SessionRegistry,
    policy: ResolutionPolicy,
}

impl<S: MergeStore> MergeEngine<S> {
    /// Creates an engine with the default session TTL and resolution policy.
    pub fn new(store: S) -> Self {
        Self::with_settings(store, DEFAULT_SESSION_TTL, ResolutionPolicy::default())
    }

    pub fn with_settings(store: S, session_ttl: Duration, policy: ResolutionPolicy) -> Self {
        Self {
            store,
            sessions: SessionRegistry::new(session_ttl),
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a session over `candidate_ids`.
    ///
    /// # Contract
    /// - Duplicate ids are dropped, keeping first occurrence.
    /// - Fails with `InvalidSelection` for fewer than two distinct ids, an
    ///   unknown id, a secondary candidate, or a taken `session_id`.
    pub fn begin_merge(
        &self,
        session_id: impl Into<SessionId>,
        candidate_ids: &[ContactId],
    ) -> MergeResult<MergeSession> {
        let session_id = session_id.into();
        let candidates = distinct_in_order(candidate_ids);
        if candidates.len() < 2 {
            return Err(MergeError::InvalidSelection(format!(
                "need at least two distinct contacts, got {}",
                candidates.len()
            )));
        }

        for id in &candidates {
            let contact = self
                .store
                .load_contact(*id)?
                .ok_or_else(|| MergeError::InvalidSelection(format!("contact {id} does not exist")))?;
            if let Some(main) = contact.main_contact {
                return Err(MergeError::InvalidSelection(format!(
                    "contact {id} was merged into {main}; select {main} instead"
                )));
            }
        }

        let session = MergeSession::new(session_id, candidates);
        self.sessions.insert(session.clone())?;
        debug!(
            "event=merge_begin module=service status=ok session={} candidates={}",
            session.id,
            session.candidates.len()
        );
        Ok(session)
    }

    /// Builds the plan for merging the session's candidates into
    /// `primary_id`. Calling it again replaces the previous plan.
    pub fn propose_merge(&self, session_id: &str, primary_id: ContactId) -> MergeResult<MergePlan> {
        let session = self.sessions.get(session_id)?;
        if !session.candidates.contains(&primary_id) {
            return Err(MergeError::InvalidPrimary(primary_id));
        }

        let mut primary = None;
        let mut secondaries = Vec::with_capacity(session.candidates.len() - 1);
        for id in &session.candidates {
            let contact = self.store.load_contact(*id)?.ok_or(MergeError::NotFound(*id))?;
            if contact.is_secondary {
                return Err(MergeError::InvalidSelection(format!(
                    "contact {id} was merged by another session"
                )));
            }
            if *id == primary_id {
                primary = Some(contact);
            } else {
                secondaries.push(contact);
            }
        }
        let primary = primary.ok_or(MergeError::InvalidPrimary(primary_id))?;

        let plan = MergePlan {
            session_id: session.id.clone(),
            primary_id,
            secondary_ids: secondaries.iter().map(|contact| contact.id).collect(),
            fields: resolve_fields(&primary, &secondaries, self.policy),
            revisions: std::iter::once(&primary)
                .chain(secondaries.iter())
                .map(|contact| (contact.id, contact.revision))
                .collect(),
        };

        let stored = plan.clone();
        self.sessions.update(session_id, move |session| {
            if session.state.is_terminal() {
                return Err(MergeError::InvalidSessionState(format!(
                    "session `{}` is {}",
                    session.id,
                    session.state.as_str()
                )));
            }
            session.primary = Some(stored.primary_id);
            session.plan = Some(stored);
            session.state = MergeState::Proposed;
            Ok(())
        })?;

        debug!(
            "event=merge_propose module=service status=ok session={} conflicts={}",
            plan.session_id,
            plan.fields.conflicts.len()
        );
        Ok(plan)
    }

    /// Returns the session's current plan.
    pub fn current_plan(&self, session_id: &str) -> MergeResult<MergePlan> {
        let session = self.sessions.get(session_id)?;
        session.plan.ok_or_else(|| {
            MergeError::InvalidSessionState(format!("session `{session_id}` has no plan yet"))
        })
    }

    /// Commits `plan` with `resolutions` and returns the updated primary.
    ///
    /// # Contract
    /// - `plan` must be the session's current plan.
    /// - Fails with `UnresolvedConflict` iff a conflict field is missing
    ///   from `resolutions`; extra entries are ignored.
    /// - A retryable failure keeps the session; a storage-level failure
    ///   abandons it.
    pub fn commit_merge(
        &self,
        plan: &MergePlan,
        resolutions: &FieldResolutions,
    ) -> MergeResult<Contact> {
        let started_at = Instant::now();
        let session = self.sessions.get(&plan.session_id)?;
        if session.state != MergeState::Proposed || session.plan.as_ref() != Some(plan) {
            return Err(MergeError::InvalidSessionState(format!(
                "plan is not the current plan of session `{}`",
                plan.session_id
            )));
        }

        let missing: Vec<ContactField> = plan
            .conflict_fields()
            .into_iter()
            .filter(|field| !resolutions.contains_key(field))
            .collect();
        if !missing.is_empty() {
            return Err(MergeError::UnresolvedConflict { fields: missing });
        }
        for field in plan.conflict_fields() {
            if let Some(value) = resolutions.get(&field) {
                if value.kind() != field.kind() {
                    return Err(MergeError::InvalidResolution(FieldKindMismatch {
                        field,
                        expected: field.kind(),
                        actual: value.kind(),
                    }));
                }
            }
        }

        info!(
            "event=merge_commit module=service status=start session={} primary={} secondaries={}",
            plan.session_id,
            plan.primary_id,
            plan.secondary_ids.len()
        );

        match self.apply_plan(plan, resolutions) {
            Ok(applied) => {
                // The merge is durable even if the session expired meanwhile.
                let _ = self
                    .sessions
                    .finish(&plan.session_id, MergeState::Committed);
                info!(
                    "event=merge_commit module=service status=ok session={} primary={} secondaries={} moved={} deduplicated={} collapsed={} duration_ms={}",
                    plan.session_id,
                    plan.primary_id,
                    plan.secondary_ids.len(),
                    applied.rewrites.total_moved(),
                    applied.rewrites.total_deduplicated(),
                    applied.rewrites.collapsed(),
                    started_at.elapsed().as_millis()
                );
                Ok(applied.primary)
            }
            Err(err) => {
                error!(
                    "event=merge_commit module=service status=error session={} primary={} duration_ms={} error_code={} error={}",
                    plan.session_id,
                    plan.primary_id,
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                if !err.is_retryable() {
                    let _ = self
                        .sessions
                        .finish(&plan.session_id, MergeState::Abandoned);
                }
                Err(err)
            }
        }
    }

    /// Drops the session without touching the store.
    pub fn abandon_merge(&self, session_id: &str) -> MergeResult<()> {
        self.sessions.finish(session_id, MergeState::Abandoned)?;
        debug!("event=merge_abandon module=service status=ok session={session_id}");
        Ok(())
    }

    /// Drops sessions idle past the session TTL.
    pub fn expire_sessions(&self) -> usize {
        let expired = self.sessions.expire_sessions();
        if expired > 0 {
            info!("event=merge_session_expire module=service status=ok expired={expired}");
        }
        expired
    }

    /// Returns the live primary for any known contact id.
    pub fn resolve_primary(&self, id: ContactId) -> MergeResult<ContactId> {
        let contact = self.store.load_contact(id)?.ok_or(MergeError::NotFound(id))?;
        Ok(contact.live_id())
    }

    pub fn list_references_to(&self, id: ContactId) -> MergeResult<Vec<ContactReference>> {
        Ok(self.store.list_references_to(id)?)
    }

    fn apply_plan(
        &self,
        plan: &MergePlan,
        resolutions: &FieldResolutions,
    ) -> MergeResult<MergeApplied> {
        let primary = self
            .store
            .load_contact(plan.primary_id)?
            .ok_or(MergeError::NotFound(plan.primary_id))?;
        if plan.revisions.get(&primary.id) != Some(&primary.revision) || primary.is_secondary {
            return Err(MergeError::ConcurrentMergeConflict {
                contacts: vec![primary.id],
            });
        }

        let merged = plan.fields.merged_contact(&primary, resolutions)?;
        let mut secondaries = Vec::with_capacity(plan.secondary_ids.len());
        for id in &plan.secondary_ids {
            let revision = plan.revisions.get(id).copied().ok_or_else(|| {
                MergeError::InvalidSessionState(format!("plan has no revision for {id}"))
            })?;
            secondaries.push((*id, revision));
        }
        let commit = MergeCommit {
            primary: merged,
            secondaries,
        };

        let mut lock_ids = vec![plan.primary_id];
        lock_ids.extend(plan.secondary_ids.iter().copied());
        lock_ids.extend(self.store.list_chain_members(&plan.secondary_ids)?);
        let lock_ids = distinct_in_order(&lock_ids);

        let token = self.store.acquire_locks(&lock_ids)?;
        let applied = self.store.apply_merge(&commit);
        if let Err(err) = self.store.release_locks(&token) {
            warn!(
                "event=merge_lock_release module=service status=error session={} error={}",
                plan.session_id, err
            );
        }
        Ok(applied?)
    }
}

fn distinct_in_order(ids: &[ContactId]) -> Vec<ContactId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn join_fields(fields: &[ContactField]) -> String {
    fields
        .iter()
        .map(|field| field.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_ids(ids: &[ContactId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
