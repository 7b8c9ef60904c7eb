//! Two-request merge protocol for presentation layers.
//!
//! # Responsibility
//! - Map candidate submission and conflict resolution requests onto the
//!   merge engine.
//! - Report failures as stable, serializable envelopes.
//!
//! # Invariants
//! - Envelopes are plain serde types; no engine handle leaks to callers.
//! - A failed candidate submission leaves no session behind.

use crate::model::contact::ContactId;
use crate::model::field::ContactField;
use crate::repo::duplicate_repo::DuplicateGroup;
use crate::repo::merge_repo::MergeStore;
use crate::service::merge_engine::{FieldResolutions, MergeEngine, MergeError, MergePlan};
use crate::service::merge_session::SessionId;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// First request: the contacts to merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCandidatesRequest {
    /// Reusing a token restarts that session. A new token is generated when
    /// absent.
    #[serde(default)]
    pub session_token: Option<SessionId>,
    pub candidate_ids: Vec<ContactId>,
    /// Defaults to the first candidate.
    #[serde(default)]
    pub primary_id: Option<ContactId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitCandidatesResponse {
    pub session_token: SessionId,
    pub plan: MergePlan,
}

/// Second request: the chosen primary and conflict choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResolutionRequest {
    pub session_token: SessionId,
    pub primary_id: ContactId,
    #[serde(default)]
    pub resolutions: FieldResolutions,
}

/// Serializable view of a `MergeError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFailure {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Set for `unresolved_conflict`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<ContactField>,
}

impl From<&MergeError> for MergeFailure {
    fn from(value: &MergeError) -> Self {
        let missing_fields = match value {
            MergeError::UnresolvedConflict { fields } => fields.clone(),
            _ => Vec::new(),
        };
        Self {
            code: value.code().to_string(),
            message: value.to_string(),
            retryable: value.is_retryable(),
            missing_fields,
        }
    }
}

/// Response to the second request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<ContactId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MergeFailure>,
}

impl MergeOutcome {
    pub fn committed(primary_id: ContactId) -> Self {
        Self {
            ok: true,
            primary_id: Some(primary_id),
            error: None,
        }
    }

    pub fn failed(error: &MergeError) -> Self {
        Self {
            ok: false,
            primary_id: None,
            error: Some(MergeFailure::from(error)),
        }
    }
}

/// Request/response facade over a `MergeEngine`.
pub struct MergeApi<S: MergeStore> {
    engine: MergeEngine<S>,
}

impl<S: MergeStore> MergeApi<S> {
    pub fn new(engine: MergeEngine<S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &MergeEngine<S> {
        &self.engine
    }

    /// Opens (or restarts) a session and returns its first plan.
    pub fn submit_candidates(
        &self,
        request: SubmitCandidatesRequest,
    ) -> Result<SubmitCandidatesResponse, MergeFailure> {
        let session_token = match request.session_token {
            Some(token) => {
                // Restarting a session discards its previous selection.
                let _ = self.engine.abandon_merge(&token);
                token
            }
            None => Uuid::new_v4().to_string(),
        };

        let session = self
            .engine
            .begin_merge(session_token.clone(), &request.candidate_ids)
            .map_err(|err| MergeFailure::from(&err))?;
        let primary_id = match request.primary_id {
            Some(primary_id) => primary_id,
            None => session.candidates[0],
        };

        match self.engine.propose_merge(&session_token, primary_id) {
            Ok(plan) => {
                debug!(
                    "event=api_submit_candidates module=api status=ok session={} conflicts={}",
                    session_token,
                    plan.fields.conflicts.len()
                );
                Ok(SubmitCandidatesResponse {
                    session_token,
                    plan,
                })
            }
            Err(err) => {
                let _ = self.engine.abandon_merge(&session_token);
                Err(MergeFailure::from(&err))
            }
        }
    }

    /// Opens a session over a possible-duplicate group.
    ///
    /// Dismissed groups may still be merged; dismissal only hides them from
    /// review.
    pub fn submit_duplicate_group(
        &self,
        group: &DuplicateGroup,
        primary_id: Option<ContactId>,
    ) -> Result<SubmitCandidatesResponse, MergeFailure> {
        self.submit_candidates(SubmitCandidatesRequest {
            session_token: None,
            candidate_ids: group.contact_ids.clone(),
            primary_id,
        })
    }

    /// Commits the session, re-proposing first when `primary_id` differs
    /// from the proposed primary.
    pub fn submit_resolution(&self, request: SubmitResolutionRequest) -> MergeOutcome {
        match self.resolve_and_commit(&request) {
            Ok(primary_id) => MergeOutcome::committed(primary_id),
            Err(err) => MergeOutcome::failed(&err),
        }
    }

    /// Drops a session without merging.
    pub fn cancel(&self, session_token: &str) -> Result<(), MergeFailure> {
        self.engine
            .abandon_merge(session_token)
            .map_err(|err| MergeFailure::from(&err))
    }

    fn resolve_and_commit(&self, request: &SubmitResolutionRequest) -> Result<ContactId, MergeError> {
        let mut plan = self.engine.current_plan(&request.session_token)?;
        if plan.primary_id != request.primary_id {
            plan = self
                .engine
                .propose_merge(&request.session_token, request.primary_id)?;
        }
        let primary = self.engine.commit_merge(&plan, &request.resolutions)?;
        Ok(primary.id)
    }
}
