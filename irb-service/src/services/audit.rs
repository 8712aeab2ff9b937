//! Audit trail recorder.
//!
//! Entries are written after the mutation they describe has been committed.
//! A failed write is logged and counted but never fails the request.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::USER_AGENT, request::Parts},
};
use serde_json::Value;
use service_core::middleware::rate_limit::client_ip;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use super::metrics::record_audit_write_failure;
use super::store::IrbStore;
use crate::models::{AuditAction, AuditLog, NewAuditLog};

const MAX_USER_AGENT_LEN: usize = 512;

/// Where a request came from, captured for the audit trail.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = client_ip(&parts.headers, &parts.extensions).map(|ip| ip.to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());
        Ok(ClientInfo {
            ip_address,
            user_agent,
        })
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn IrbStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn IrbStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, details, client), fields(action = %action))]
    pub async fn record(
        &self,
        actor: Option<Uuid>,
        action: AuditAction,
        entity_type: &str,
        entity_id: Option<Uuid>,
        details: Option<Value>,
        client: &ClientInfo,
    ) {
        let entry = AuditLog::new(NewAuditLog {
            actor_user_id: actor,
            action,
            entity_type: entity_type.to_string(),
            entity_id,
            details,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        if let Err(e) = self.store.insert_audit_log(entry).await {
            record_audit_write_failure();
            tracing::error!(
                error = %e,
                action = %action,
                entity_type,
                ?entity_id,
                "Failed to write audit log entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditFilter, PageRequest};
    use crate::services::memory::MemoryStore;
    use axum::http::Request;

    #[tokio::test]
    async fn client_info_reads_forwarded_ip_and_agent() {
        let (mut parts, _) = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header("user-agent", "curl/8.0")
            .body(())
            .unwrap()
            .into_parts();
        let info = ClientInfo::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(info.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn record_writes_entry() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AuditRecorder::new(store.clone());
        let study_id = Uuid::new_v4();
        recorder
            .record(
                None,
                AuditAction::StudyDeleted,
                "study",
                Some(study_id),
                Some(serde_json::json!({"protocol_number": "P-1"})),
                &ClientInfo::default(),
            )
            .await;

        let page = store
            .list_audit_logs(&AuditFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].action, "study_deleted");
        assert_eq!(page.items[0].entity_id, Some(study_id));
    }
}
