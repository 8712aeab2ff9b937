//! Append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserLogin,
    UserLogout,
    UserLoginFailed,
    UserCreated,
    UserUpdated,
    UserDeactivated,
    StudyCreated,
    StudyUpdated,
    StudyDeleted,
    StudyStatusChanged,
    ParticipantCreated,
    ParticipantUpdated,
    ParticipantDeleted,
    DocumentUploaded,
    DocumentDeleted,
    DataExported,
}

impl AuditAction {
    pub const ALL: [AuditAction; 16] = [
        AuditAction::UserLogin,
        AuditAction::UserLogout,
        AuditAction::UserLoginFailed,
        AuditAction::UserCreated,
        AuditAction::UserUpdated,
        AuditAction::UserDeactivated,
        AuditAction::StudyCreated,
        AuditAction::StudyUpdated,
        AuditAction::StudyDeleted,
        AuditAction::StudyStatusChanged,
        AuditAction::ParticipantCreated,
        AuditAction::ParticipantUpdated,
        AuditAction::ParticipantDeleted,
        AuditAction::DocumentUploaded,
        AuditAction::DocumentDeleted,
        AuditAction::DataExported,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserLogin => "user_login",
            AuditAction::UserLogout => "user_logout",
            AuditAction::UserLoginFailed => "user_login_failed",
            AuditAction::UserCreated => "user_created",
            AuditAction::UserUpdated => "user_updated",
            AuditAction::UserDeactivated => "user_deactivated",
            AuditAction::StudyCreated => "study_created",
            AuditAction::StudyUpdated => "study_updated",
            AuditAction::StudyDeleted => "study_deleted",
            AuditAction::StudyStatusChanged => "study_status_changed",
            AuditAction::ParticipantCreated => "participant_created",
            AuditAction::ParticipantUpdated => "participant_updated",
            AuditAction::ParticipantDeleted => "participant_deleted",
            AuditAction::DocumentUploaded => "document_uploaded",
            AuditAction::DocumentDeleted => "document_deleted",
            AuditAction::DataExported => "data_exported",
        }
    }
}

impl FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("audit action", s))
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored audit entry. `action` stays text so rows written by newer
/// releases still load.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub audit_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(entry: NewAuditLog) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            actor_user_id: entry.actor_user_id,
            action: entry.action.as_str().to_string(),
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            details: entry.details,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            created_utc: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub actor_user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_user_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        if self.actor_user_id.is_some() && log.actor_user_id != self.actor_user_id {
            return false;
        }
        if let Some(action) = self.action {
            if log.action != action.as_str() {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if &log.entity_type != entity_type {
                return false;
            }
        }
        if self.entity_id.is_some() && log.entity_id != self.entity_id {
            return false;
        }
        if let Some(from) = self.from_utc {
            if log.created_utc < from {
                return false;
            }
        }
        if let Some(to) = self.to_utc {
            if log.created_utc > to {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_codes_are_unique() {
        let mut codes: Vec<_> = AuditAction::ALL.iter().map(|a| a.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), AuditAction::ALL.len());
        assert_eq!(
            "study_status_changed".parse::<AuditAction>().unwrap(),
            AuditAction::StudyStatusChanged
        );
    }

    #[test]
    fn filter_by_action_and_window() {
        let log = AuditLog::new(NewAuditLog {
            actor_user_id: None,
            action: AuditAction::UserLoginFailed,
            entity_type: "user".to_string(),
            entity_id: None,
            details: None,
            ip_address: None,
            user_agent: None,
        });
        let hit = AuditFilter {
            action: Some(AuditAction::UserLoginFailed),
            from_utc: Some(log.created_utc - chrono::Duration::minutes(1)),
            ..Default::default()
        };
        let miss = AuditFilter {
            action: Some(AuditAction::UserLogin),
            ..Default::default()
        };
        assert!(hit.matches(&log));
        assert!(!miss.matches(&log));
    }
}
