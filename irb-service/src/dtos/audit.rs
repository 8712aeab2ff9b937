use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{AuditAction, AuditFilter, PageRequest};

#[derive(Debug, Default, Deserialize)]
pub struct AuditListQuery {
    pub actor_user_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl AuditListQuery {
    pub fn filter(&self) -> AuditFilter {
        AuditFilter {
            actor_user_id: self.actor_user_id,
            action: self.action,
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id,
            from_utc: self.from_utc,
            to_utc: self.to_utc,
        }
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}
