//! Study status workflow.
//!
//! ```text
//! draft -> submitted -> reviewed -> active -> closed
//!            |             |
//!            +--> draft <--+   (returned for revisions)
//! ```
//!
//! [`plan_transition`] is pure: it validates a requested move and returns the
//! [`StudyTransition`] the store applies, conditional on the study still
//! being in the planned `from` status.

use chrono::Utc;
use service_core::error::AppError;
use thiserror::Error;

use super::permissions::{Actor, Permission};
use crate::models::{Role, Study, StudyStatus, StudyTransition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Cannot move a study from {from} to {to}")]
    InvalidTransition { from: StudyStatus, to: StudyStatus },

    #[error("Study is already {0}")]
    NoOp(StudyStatus),

    #[error("{0}")]
    Forbidden(String),

    #[error("The principal investigator cannot review or approve their own study")]
    ConflictOfInterest,

    #[error("Notes are required when moving a study from {from} to {to}")]
    MissingNotes { from: StudyStatus, to: StudyStatus },
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::InvalidTransition { .. } | WorkflowError::NoOp(_) => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            WorkflowError::Forbidden(_) | WorkflowError::ConflictOfInterest => {
                AppError::Forbidden(anyhow::Error::new(err))
            }
            WorkflowError::MissingNotes { .. } => AppError::BadRequest(anyhow::Error::new(err)),
        }
    }
}

pub fn allowed_transitions(from: StudyStatus) -> &'static [StudyStatus] {
    match from {
        StudyStatus::Draft => &[StudyStatus::Submitted],
        StudyStatus::Submitted => &[StudyStatus::Reviewed, StudyStatus::Draft],
        StudyStatus::Reviewed => &[StudyStatus::Active, StudyStatus::Draft],
        StudyStatus::Active => &[StudyStatus::Closed],
        StudyStatus::Closed => &[],
    }
}

/// Permission needed for a move; `None` if the move is not in the table.
pub fn required_permission(from: StudyStatus, to: StudyStatus) -> Option<Permission> {
    if !allowed_transitions(from).contains(&to) {
        return None;
    }
    let permission = match (from, to) {
        (_, StudyStatus::Submitted) => Permission::StudySubmit,
        (StudyStatus::Submitted, _) => Permission::StudyReview,
        (StudyStatus::Reviewed, _) => Permission::StudyApprove,
        (StudyStatus::Active, StudyStatus::Closed) => Permission::StudyClose,
        _ => return None,
    };
    Some(permission)
}

fn requires_notes(from: StudyStatus, to: StudyStatus) -> bool {
    to == StudyStatus::Reviewed
        || (to == StudyStatus::Draft
            && matches!(from, StudyStatus::Submitted | StudyStatus::Reviewed))
}

/// Validate everything about a move except the notes requirement.
fn authorize(study: &Study, to: StudyStatus, actor: &Actor) -> Result<Permission, WorkflowError> {
    let from = study.status;
    if from == to {
        return Err(WorkflowError::NoOp(from));
    }
    let permission =
        required_permission(from, to).ok_or(WorkflowError::InvalidTransition { from, to })?;

    if !actor.has(permission) {
        return Err(WorkflowError::Forbidden(format!(
            "Role '{}' cannot move a study from {} to {}",
            actor.role, from, to
        )));
    }

    match permission {
        Permission::StudySubmit if !actor.leads(study) && !actor.is_admin() => {
            return Err(WorkflowError::Forbidden(
                "Only the principal investigator can submit this study".to_string(),
            ));
        }
        Permission::StudyClose
            if !actor.leads(study) && !matches!(actor.role, Role::Admin | Role::IrbChair) =>
        {
            return Err(WorkflowError::Forbidden(
                "Only the principal investigator or the IRB can close this study".to_string(),
            ));
        }
        Permission::StudyReview | Permission::StudyApprove if actor.leads(study) => {
            return Err(WorkflowError::ConflictOfInterest);
        }
        _ => {}
    }

    Ok(permission)
}

pub fn plan_transition(
    study: &Study,
    to: StudyStatus,
    actor: &Actor,
    notes: Option<&str>,
) -> Result<StudyTransition, WorkflowError> {
    authorize(study, to, actor)?;

    let from = study.status;
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());
    if requires_notes(from, to) && notes.is_none() {
        return Err(WorkflowError::MissingNotes { from, to });
    }

    Ok(StudyTransition {
        study_id: study.study_id,
        from,
        to,
        actor_id: actor.user_id,
        notes: notes.map(str::to_string),
        at: Utc::now(),
    })
}

/// Next statuses this actor may move the study to (notes aside).
pub fn available_transitions(study: &Study, actor: &Actor) -> Vec<StudyStatus> {
    allowed_transitions(study.status)
        .iter()
        .copied()
        .filter(|to| authorize(study, *to, actor).is_ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewStudy, RiskLevel};
    use uuid::Uuid;

    fn study(pi: Uuid, status: StudyStatus) -> Study {
        let mut study = Study::new(NewStudy {
            protocol_number: "IRB-7".to_string(),
            title: "Workflow".to_string(),
            description: String::new(),
            principal_investigator_id: pi,
            risk_level: RiskLevel::Moderate,
            start_date: None,
            end_date: None,
            target_enrollment: 10,
            created_by: pi,
        });
        study.status = status;
        study
    }

    fn actor(role: Role) -> Actor {
        Actor::new(Uuid::new_v4(), role)
    }

    #[test]
    fn transition_table() {
        assert_eq!(allowed_transitions(StudyStatus::Draft), &[StudyStatus::Submitted]);
        assert!(allowed_transitions(StudyStatus::Closed).is_empty());
        assert_eq!(
            required_permission(StudyStatus::Reviewed, StudyStatus::Draft),
            Some(Permission::StudyApprove)
        );
        assert_eq!(
            required_permission(StudyStatus::Submitted, StudyStatus::Draft),
            Some(Permission::StudyReview)
        );
        assert_eq!(required_permission(StudyStatus::Draft, StudyStatus::Active), None);
    }

    #[test]
    fn full_lifecycle_plans() {
        let pi = actor(Role::Researcher);
        let reviewer = actor(Role::Reviewer);
        let chair = actor(Role::IrbChair);
        let mut s = study(pi.user_id, StudyStatus::Draft);

        let steps = [
            (StudyStatus::Submitted, pi, None),
            (StudyStatus::Reviewed, reviewer, Some("Looks sound")),
            (StudyStatus::Active, chair, None),
            (StudyStatus::Closed, pi, None),
        ];
        for (to, who, notes) in steps {
            let plan = plan_transition(&s, to, &who, notes).unwrap();
            assert_eq!(plan.from, s.status);
            s.apply_transition(&plan);
            assert_eq!(s.status, to);
        }
        assert!(s.submitted_utc.is_some());
        assert_eq!(s.reviewed_by, Some(reviewer.user_id));
        assert!(s.approved_utc.is_some());
        assert!(s.closed_utc.is_some());
    }

    #[test]
    fn rejects_skips_and_noops() {
        let admin = actor(Role::Admin);
        let s = study(Uuid::new_v4(), StudyStatus::Draft);
        assert_eq!(
            plan_transition(&s, StudyStatus::Active, &admin, None).unwrap_err(),
            WorkflowError::InvalidTransition {
                from: StudyStatus::Draft,
                to: StudyStatus::Active
            }
        );
        assert_eq!(
            plan_transition(&s, StudyStatus::Draft, &admin, None).unwrap_err(),
            WorkflowError::NoOp(StudyStatus::Draft)
        );
        let closed = study(Uuid::new_v4(), StudyStatus::Closed);
        let err: AppError = plan_transition(&closed, StudyStatus::Active, &admin, None)
            .unwrap_err()
            .into();
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn reviewer_cannot_review_own_study() {
        let reviewer = actor(Role::Reviewer);
        let s = study(reviewer.user_id, StudyStatus::Submitted);
        let err = plan_transition(&s, StudyStatus::Reviewed, &reviewer, Some("ok")).unwrap_err();
        assert_eq!(err, WorkflowError::ConflictOfInterest);
        let err: AppError = err.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn review_requires_notes() {
        let reviewer = actor(Role::Reviewer);
        let s = study(Uuid::new_v4(), StudyStatus::Submitted);
        let err = plan_transition(&s, StudyStatus::Reviewed, &reviewer, Some("   ")).unwrap_err();
        assert!(matches!(err, WorkflowError::MissingNotes { .. }));
        let err: AppError = err.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

        let returned = plan_transition(&s, StudyStatus::Draft, &reviewer, Some("Fix consent"))
            .unwrap();
        assert_eq!(returned.notes.as_deref(), Some("Fix consent"));
    }

    #[test]
    fn researcher_cannot_submit_someone_elses_study() {
        let s = study(Uuid::new_v4(), StudyStatus::Draft);
        let err = plan_transition(&s, StudyStatus::Submitted, &actor(Role::Researcher), None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
        assert!(plan_transition(&s, StudyStatus::Submitted, &actor(Role::Admin), None).is_ok());
    }

    #[test]
    fn reviewer_cannot_approve() {
        let s = study(Uuid::new_v4(), StudyStatus::Reviewed);
        let err =
            plan_transition(&s, StudyStatus::Active, &actor(Role::Reviewer), None).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn available_transitions_follow_role() {
        let s = study(Uuid::new_v4(), StudyStatus::Reviewed);
        assert_eq!(
            available_transitions(&s, &actor(Role::IrbChair)),
            vec![StudyStatus::Active, StudyStatus::Draft]
        );
        assert!(available_transitions(&s, &actor(Role::Coordinator)).is_empty());
    }
}
