//! In-memory [`IrbStore`] used by tests and `STORAGE_BACKEND=memory` runs.
//!
//! Enforces the same uniqueness and foreign-key rules as the SQL schema so
//! handlers behave identically on either backend.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{DashboardStats, IrbStore};
use crate::models::{
    AuditFilter, AuditLog, AutomationLog, Document, EnrollmentStatus, NewDocument, Page,
    PageRequest, Participant, ParticipantFilter, ParticipantUpdate, Study, StudyFilter,
    StudyStatus, StudyTransition, StudyUpdate, User, UserFilter, UserUpdate,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    studies: HashMap<Uuid, Study>,
    participants: HashMap<Uuid, Participant>,
    documents: HashMap<Uuid, Document>,
    contents: HashMap<Uuid, Vec<u8>>,
    audit_logs: Vec<AuditLog>,
    automation_logs: Vec<AutomationLog>,
}

impl State {
    fn require_user(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(AppError::bad_request(format!("User {} does not exist", user_id)))
        }
    }

    fn study_status(&self, study_id: Uuid) -> Result<StudyStatus, AppError> {
        self.studies
            .get(&study_id)
            .map(|s| s.status)
            .ok_or_else(|| AppError::bad_request(format!("Study {} does not exist", study_id)))
    }

    /// Documents of a closed study are part of the permanent record.
    fn require_open_study(&self, study_id: Uuid) -> Result<(), AppError> {
        if self.study_status(study_id)? == StudyStatus::Closed {
            return Err(AppError::conflict("Documents of a closed study are read-only"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(mut items: Vec<T>, created: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(created(item)));
    items
}

#[async_trait]
impl IrbStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_user(&self, user: User) -> Result<User, AppError> {
        let mut state = self.state.write().await;
        let email = user.email.to_lowercase();
        if state.users.values().any(|u| u.email.to_lowercase() == email) {
            return Err(AppError::conflict(format!(
                "A user with email {} already exists",
                user.email
            )));
        }
        state.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let email = email.trim().to_lowercase();
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>, AppError> {
        let state = self.state.read().await;
        let matching = state
            .users
            .values()
            .filter(|u| filter.role.map_or(true, |role| u.role == role))
            .filter(|u| filter.is_active.map_or(true, |active| u.is_active == active))
            .cloned()
            .collect();
        Ok(Page::from_vec(newest_first(matching, |u| u.created_utc), page))
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, AppError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found(format!("User {} not found", user_id)))?;
        if let Some(full_name) = update.full_name {
            user.full_name = full_name;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        if let Some(hash) = update.password_hash {
            user.password_hash = hash;
        }
        user.updated_utc = Utc::now();
        Ok(user.clone())
    }

    async fn count_users(&self) -> Result<i64, AppError> {
        Ok(self.state.read().await.users.len() as i64)
    }

    async fn create_study(&self, study: Study) -> Result<Study, AppError> {
        let mut state = self.state.write().await;
        state.require_user(study.principal_investigator_id)?;
        state.require_user(study.created_by)?;
        if state
            .studies
            .values()
            .any(|s| s.protocol_number == study.protocol_number)
        {
            return Err(AppError::conflict(format!(
                "Protocol number {} is already registered",
                study.protocol_number
            )));
        }
        state.studies.insert(study.study_id, study.clone());
        Ok(study)
    }

    async fn get_study(&self, study_id: Uuid) -> Result<Option<Study>, AppError> {
        Ok(self.state.read().await.studies.get(&study_id).cloned())
    }

    async fn list_studies(
        &self,
        filter: &StudyFilter,
        page: PageRequest,
    ) -> Result<Page<Study>, AppError> {
        let state = self.state.read().await;
        let matching = state
            .studies
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        Ok(Page::from_vec(newest_first(matching, |s| s.created_utc), page))
    }

    async fn update_study(&self, study_id: Uuid, update: StudyUpdate) -> Result<Study, AppError> {
        let mut state = self.state.write().await;
        if let Some(pi) = update.principal_investigator_id {
            state.require_user(pi)?;
        }
        let study = state
            .studies
            .get_mut(&study_id)
            .ok_or_else(|| AppError::not_found(format!("Study {} not found", study_id)))?;
        if study.status != StudyStatus::Draft {
            return Err(AppError::conflict("Only draft studies can be modified"));
        }
        let mut updated = study.clone();
        updated.apply_update(&update);
        updated.validate_dates()?;
        *study = updated.clone();
        Ok(updated)
    }

    async fn delete_study(&self, study_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let study = state
            .studies
            .get(&study_id)
            .ok_or_else(|| AppError::not_found(format!("Study {} not found", study_id)))?;
        if study.status != StudyStatus::Draft {
            return Err(AppError::conflict("Only draft studies can be deleted"));
        }
        state.studies.remove(&study_id);
        state.participants.retain(|_, p| p.study_id != study_id);
        let removed: Vec<Uuid> = state
            .documents
            .values()
            .filter(|d| d.study_id == study_id)
            .map(|d| d.document_id)
            .collect();
        for document_id in removed {
            state.documents.remove(&document_id);
            state.contents.remove(&document_id);
        }
        Ok(())
    }

    async fn apply_transition(&self, transition: &StudyTransition) -> Result<Study, AppError> {
        let mut state = self.state.write().await;
        let study = state
            .studies
            .get_mut(&transition.study_id)
            .ok_or_else(|| AppError::not_found(format!("Study {} not found", transition.study_id)))?;
        if study.status != transition.from {
            return Err(AppError::conflict(format!(
                "Study status changed concurrently (now {})",
                study.status
            )));
        }
        study.apply_transition(transition);
        Ok(study.clone())
    }

    async fn expired_active_studies(&self, today: NaiveDate) -> Result<Vec<Study>, AppError> {
        let state = self.state.read().await;
        let mut expired: Vec<Study> = state
            .studies
            .values()
            .filter(|s| s.status == StudyStatus::Active)
            .filter(|s| s.end_date.map_or(false, |end| end < today))
            .cloned()
            .collect();
        expired.sort_by_key(|s| s.end_date);
        Ok(expired)
    }

    async fn create_participant(&self, participant: Participant) -> Result<Participant, AppError> {
        let mut state = self.state.write().await;
        let status = state.study_status(participant.study_id)?;
        if status != StudyStatus::Active {
            return Err(AppError::conflict(format!(
                "Study is {}; participants can only be added to active studies",
                status
            )));
        }
        state.require_user(participant.enrolled_by)?;
        if state.participants.values().any(|p| {
            p.study_id == participant.study_id && p.subject_code == participant.subject_code
        }) {
            return Err(AppError::conflict(format!(
                "Subject code {} is already used in this study",
                participant.subject_code
            )));
        }
        state
            .participants
            .insert(participant.participant_id, participant.clone());
        Ok(participant)
    }

    async fn get_participant(&self, participant_id: Uuid) -> Result<Option<Participant>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .participants
            .get(&participant_id)
            .cloned())
    }

    async fn list_participants(
        &self,
        study_id: Uuid,
        filter: &ParticipantFilter,
        page: PageRequest,
    ) -> Result<Page<Participant>, AppError> {
        let state = self.state.read().await;
        let matching = state
            .participants
            .values()
            .filter(|p| p.study_id == study_id && filter.matches(p))
            .cloned()
            .collect();
        Ok(Page::from_vec(newest_first(matching, |p| p.created_utc), page))
    }

    async fn update_participant(
        &self,
        participant_id: Uuid,
        update: ParticipantUpdate,
    ) -> Result<Participant, AppError> {
        let mut state = self.state.write().await;
        let participant = state
            .participants
            .get_mut(&participant_id)
            .ok_or_else(|| AppError::not_found(format!("Participant {} not found", participant_id)))?;
        let mut updated = participant.clone();
        updated.apply_update(&update)?;
        *participant = updated.clone();
        Ok(updated)
    }

    async fn delete_participant(&self, participant_id: Uuid) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .participants
            .remove(&participant_id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(format!("Participant {} not found", participant_id)))
    }

    async fn create_document(&self, upload: NewDocument) -> Result<Document, AppError> {
        let mut state = self.state.write().await;
        state.require_open_study(upload.study_id)?;
        state.require_user(upload.uploaded_by)?;
        let version = state
            .documents
            .values()
            .filter(|d| d.is_same_series(&upload))
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1;
        let document = Document::new(&upload, version);
        state.contents.insert(document.document_id, upload.content);
        state.documents.insert(document.document_id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(self.state.read().await.documents.get(&document_id).cloned())
    }

    async fn get_document_content(&self, document_id: Uuid) -> Result<Option<Vec<u8>>, AppError> {
        Ok(self.state.read().await.contents.get(&document_id).cloned())
    }

    async fn list_documents(
        &self,
        study_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Document>, AppError> {
        let state = self.state.read().await;
        let matching = state
            .documents
            .values()
            .filter(|d| d.study_id == study_id)
            .cloned()
            .collect();
        Ok(Page::from_vec(newest_first(matching, |d| d.created_utc), page))
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let study_id = state
            .documents
            .get(&document_id)
            .map(|d| d.study_id)
            .ok_or_else(|| AppError::not_found(format!("Document {} not found", document_id)))?;
        state.require_open_study(study_id)?;
        state.documents.remove(&document_id);
        state.contents.remove(&document_id);
        Ok(())
    }

    async fn insert_audit_log(&self, entry: AuditLog) -> Result<(), AppError> {
        self.state.write().await.audit_logs.push(entry);
        Ok(())
    }

    async fn list_audit_logs(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLog>, AppError> {
        let state = self.state.read().await;
        let matching = state
            .audit_logs
            .iter()
            .rev()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();
        Ok(Page::from_vec(matching, page))
    }

    async fn insert_automation_log(&self, entry: AutomationLog) -> Result<(), AppError> {
        self.state.write().await.automation_logs.push(entry);
        Ok(())
    }

    async fn list_automation_logs(&self, page: PageRequest) -> Result<Page<AutomationLog>, AppError> {
        let state = self.state.read().await;
        let all = state.automation_logs.iter().rev().cloned().collect();
        Ok(Page::from_vec(all, page))
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        let state = self.state.read().await;
        let mut stats = DashboardStats::default();
        for status in StudyStatus::ALL {
            stats.studies_by_status.insert(status.as_str().to_string(), 0);
        }
        for status in EnrollmentStatus::ALL {
            stats
                .participants_by_status
                .insert(status.as_str().to_string(), 0);
        }
        for study in state.studies.values() {
            *stats
                .studies_by_status
                .entry(study.status.as_str().to_string())
                .or_default() += 1;
        }
        for participant in state.participants.values() {
            *stats
                .participants_by_status
                .entry(participant.enrollment_status.as_str().to_string())
                .or_default() += 1;
        }
        stats.total_documents = state.documents.len() as i64;
        stats.total_users = state.users.len() as i64;
        stats.active_users = state.users.values().filter(|u| u.is_active).count() as i64;
        Ok(stats)
    }
}
