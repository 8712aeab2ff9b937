//! Storage abstraction shared by the PostgreSQL and in-memory backends.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{
    AuditFilter, AuditLog, AutomationLog, Document, NewDocument, Page, PageRequest, Participant,
    ParticipantFilter, ParticipantUpdate, Study, StudyFilter, StudyTransition, StudyUpdate, User,
    UserFilter, UserUpdate,
};

/// Aggregate counts for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub studies_by_status: BTreeMap<String, i64>,
    pub participants_by_status: BTreeMap<String, i64>,
    pub total_documents: i64,
    pub total_users: i64,
    pub active_users: i64,
}

/// Every list method returns newest first.
#[async_trait]
pub trait IrbStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Users
    async fn create_user(&self, user: User) -> Result<User, AppError>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>, AppError>;
    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, AppError>;
    async fn count_users(&self) -> Result<i64, AppError>;

    // Studies
    async fn create_study(&self, study: Study) -> Result<Study, AppError>;
    async fn get_study(&self, study_id: Uuid) -> Result<Option<Study>, AppError>;
    async fn list_studies(
        &self,
        filter: &StudyFilter,
        page: PageRequest,
    ) -> Result<Page<Study>, AppError>;
    /// Updates a study that is still in `draft`; 409 otherwise.
    async fn update_study(&self, study_id: Uuid, update: StudyUpdate) -> Result<Study, AppError>;
    /// Deletes a study that is still in `draft`; 409 otherwise.
    async fn delete_study(&self, study_id: Uuid) -> Result<(), AppError>;
    /// Applies the transition only if the study is still in `transition.from`.
    async fn apply_transition(&self, transition: &StudyTransition) -> Result<Study, AppError>;
    /// Active studies whose end date is before `today`.
    async fn expired_active_studies(&self, today: NaiveDate) -> Result<Vec<Study>, AppError>;

    // Participants
    async fn create_participant(&self, participant: Participant) -> Result<Participant, AppError>;
    async fn get_participant(&self, participant_id: Uuid) -> Result<Option<Participant>, AppError>;
    async fn list_participants(
        &self,
        study_id: Uuid,
        filter: &ParticipantFilter,
        page: PageRequest,
    ) -> Result<Page<Participant>, AppError>;
    async fn update_participant(
        &self,
        participant_id: Uuid,
        update: ParticipantUpdate,
    ) -> Result<Participant, AppError>;
    async fn delete_participant(&self, participant_id: Uuid) -> Result<(), AppError>;

    // Documents
    /// Stores the upload as the next version of its (study, kind, title) series.
    async fn create_document(&self, upload: NewDocument) -> Result<Document, AppError>;
    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>, AppError>;
    async fn get_document_content(&self, document_id: Uuid) -> Result<Option<Vec<u8>>, AppError>;
    async fn list_documents(
        &self,
        study_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Document>, AppError>;
    async fn delete_document(&self, document_id: Uuid) -> Result<(), AppError>;

    // Audit and automation logs
    async fn insert_audit_log(&self, entry: AuditLog) -> Result<(), AppError>;
    async fn list_audit_logs(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLog>, AppError>;
    async fn insert_automation_log(&self, entry: AutomationLog) -> Result<(), AppError>;
    async fn list_automation_logs(&self, page: PageRequest) -> Result<Page<AutomationLog>, AppError>;

    async fn dashboard_stats(&self) -> Result<DashboardStats, AppError>;
}
