//! Role based permission policy.
//!
//! Every handler goes through [`Policy`] rather than checking roles itself.
//! Study-scoped resources answer 404 when the caller cannot see the study,
//! so the existence of other teams' studies is not revealed.

use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{Role, Study, StudyScope, StudyStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Permission {
    StudyCreate,
    StudyReadAll,
    StudyEdit,
    StudyDelete,
    StudySubmit,
    StudyReview,
    StudyApprove,
    StudyClose,
    ParticipantRead,
    ParticipantManage,
    DocumentRead,
    DocumentManage,
    UserManage,
    AuditRead,
    DataExport,
    AutomationRead,
}

use Permission::*;

const ADMIN: &[Permission] = &[
    StudyCreate,
    StudyReadAll,
    StudyEdit,
    StudyDelete,
    StudySubmit,
    StudyReview,
    StudyApprove,
    StudyClose,
    ParticipantRead,
    ParticipantManage,
    DocumentRead,
    DocumentManage,
    UserManage,
    AuditRead,
    DataExport,
    AutomationRead,
];

const IRB_CHAIR: &[Permission] = &[
    StudyReadAll,
    StudyEdit,
    StudySubmit,
    StudyReview,
    StudyApprove,
    StudyClose,
    ParticipantRead,
    DocumentRead,
    AuditRead,
    DataExport,
    AutomationRead,
];

const REVIEWER: &[Permission] = &[StudyReadAll, StudyReview, ParticipantRead, DocumentRead];

const RESEARCHER: &[Permission] = &[
    StudyCreate,
    StudyEdit,
    StudySubmit,
    StudyClose,
    ParticipantRead,
    ParticipantManage,
    DocumentRead,
    DocumentManage,
    DataExport,
];

const COORDINATOR: &[Permission] = &[
    ParticipantRead,
    ParticipantManage,
    DocumentRead,
    DocumentManage,
];

impl Role {
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Admin => ADMIN,
            Role::IrbChair => IRB_CHAIR,
            Role::Reviewer => REVIEWER,
            Role::Researcher => RESEARCHER,
            Role::Coordinator => COORDINATOR,
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// The authenticated caller as seen by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.role.has(permission)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn leads(&self, study: &Study) -> bool {
        study.principal_investigator_id == self.user_id
    }
}

pub struct Policy;

impl Policy {
    pub fn require(actor: &Actor, permission: Permission) -> Result<(), AppError> {
        if actor.has(permission) {
            Ok(())
        } else {
            tracing::debug!(actor = %actor.user_id, role = %actor.role, ?permission, "Permission denied");
            Err(AppError::forbidden(format!(
                "Role '{}' is not permitted to perform this action",
                actor.role
            )))
        }
    }

    pub fn can_view_study(actor: &Actor, study: &Study) -> bool {
        Self::study_scope(actor).includes(study)
    }

    /// 404 when the study is not visible to the caller.
    pub fn ensure_can_view_study(actor: &Actor, study: &Study) -> Result<(), AppError> {
        if Self::can_view_study(actor, study) {
            Ok(())
        } else {
            Err(AppError::not_found(format!("Study {} not found", study.study_id)))
        }
    }

    /// Visibility scope used to narrow study listings and exports.
    pub fn study_scope(actor: &Actor) -> StudyScope {
        if actor.has(StudyReadAll) {
            StudyScope::All
        } else if actor.role == Role::Coordinator {
            StudyScope::LedByOrActive(actor.user_id)
        } else {
            StudyScope::LedBy(actor.user_id)
        }
    }

    /// Edit/delete check: 403 when the caller does not own the study, 409
    /// when it owns it but the study has left `draft`.
    pub fn ensure_can_modify_study(actor: &Actor, study: &Study) -> Result<(), AppError> {
        if !Self::owns_study(actor, study) {
            return Err(AppError::forbidden(
                "Only the principal investigator or an admin may modify this study",
            ));
        }
        if study.status != StudyStatus::Draft {
            return Err(AppError::conflict(format!(
                "Study is {}; only draft studies can be modified",
                study.status
            )));
        }
        Ok(())
    }

    fn owns_study(actor: &Actor, study: &Study) -> bool {
        actor.is_admin() || (actor.leads(study) && actor.has(StudyEdit))
    }

    /// Whether the caller may name a principal investigator other than
    /// themselves when creating or editing a study.
    pub fn can_assign_investigator(actor: &Actor) -> bool {
        actor.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewStudy, RiskLevel};

    fn study_led_by(pi: Uuid, status: StudyStatus) -> Study {
        let mut study = Study::new(NewStudy {
            protocol_number: "P-1".to_string(),
            title: "T".to_string(),
            description: String::new(),
            principal_investigator_id: pi,
            risk_level: RiskLevel::Minimal,
            start_date: None,
            end_date: None,
            target_enrollment: 0,
            created_by: pi,
        });
        study.status = status;
        study
    }

    #[test]
    fn admin_has_every_permission() {
        for permission in ADMIN {
            assert!(Role::Admin.has(*permission));
        }
        assert_eq!(ADMIN.len(), 16);
    }

    #[test]
    fn chair_cannot_create_or_delete() {
        assert!(!Role::IrbChair.has(StudyCreate));
        assert!(!Role::IrbChair.has(StudyDelete));
        assert!(Role::IrbChair.has(StudyApprove));
        assert!(!Role::IrbChair.has(ParticipantManage));
    }

    #[test]
    fn reviewer_and_coordinator_tables() {
        assert!(Role::Reviewer.has(StudyReview));
        assert!(!Role::Reviewer.has(StudyApprove));
        assert!(!Role::Reviewer.has(DataExport));
        assert!(Role::Coordinator.has(ParticipantManage));
        assert!(!Role::Coordinator.has(StudyReadAll));
        assert!(!Role::Researcher.has(UserManage));
    }

    #[test]
    fn require_maps_to_forbidden() {
        let actor = Actor::new(Uuid::new_v4(), Role::Reviewer);
        let err = Policy::require(&actor, UserManage).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert!(Policy::require(&actor, StudyReview).is_ok());
    }

    #[test]
    fn researcher_sees_only_own_studies() {
        let me = Actor::new(Uuid::new_v4(), Role::Researcher);
        let mine = study_led_by(me.user_id, StudyStatus::Active);
        let theirs = study_led_by(Uuid::new_v4(), StudyStatus::Active);
        assert!(Policy::can_view_study(&me, &mine));
        assert!(!Policy::can_view_study(&me, &theirs));
        let err = Policy::ensure_can_view_study(&me, &theirs).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn coordinator_sees_active_studies_only() {
        let coordinator = Actor::new(Uuid::new_v4(), Role::Coordinator);
        let pi = Uuid::new_v4();
        assert!(Policy::can_view_study(
            &coordinator,
            &study_led_by(pi, StudyStatus::Active)
        ));
        assert!(!Policy::can_view_study(
            &coordinator,
            &study_led_by(pi, StudyStatus::Draft)
        ));
        assert!(!Policy::can_view_study(
            &coordinator,
            &study_led_by(pi, StudyStatus::Closed)
        ));
    }

    #[test]
    fn only_draft_studies_are_modifiable() {
        let me = Actor::new(Uuid::new_v4(), Role::Researcher);
        let admin = Actor::new(Uuid::new_v4(), Role::Admin);
        let draft = study_led_by(me.user_id, StudyStatus::Draft);
        let submitted = study_led_by(me.user_id, StudyStatus::Submitted);

        assert!(Policy::ensure_can_modify_study(&me, &draft).is_ok());
        assert!(Policy::ensure_can_modify_study(&admin, &draft).is_ok());
        assert_eq!(
            Policy::ensure_can_modify_study(&me, &submitted)
                .unwrap_err()
                .status_code(),
            axum::http::StatusCode::CONFLICT
        );

        let other = Actor::new(Uuid::new_v4(), Role::Researcher);
        assert_eq!(
            Policy::ensure_can_modify_study(&other, &draft)
                .unwrap_err()
                .status_code(),
            axum::http::StatusCode::FORBIDDEN
        );
    }
}
