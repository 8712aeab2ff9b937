//! Background automation worker.
//!
//! Runs rule passes on a fixed interval until the shutdown signal fires.
//! Each pass writes its outcome to `automation_logs`.

use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::metrics::{record_automation_pass, record_study_transition};
use super::stats_cache::StatsCache;
use super::store::IrbStore;
use crate::models::{AutomationLog, AutomationOutcome, StudyStatus, StudyTransition};

pub const CLOSE_EXPIRED_STUDIES: &str = "close_expired_studies";

/// Result of one pass, mostly for tests and logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub closed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct AutomationWorker {
    store: Arc<dyn IrbStore>,
    stats_cache: Arc<StatsCache>,
}

impl AutomationWorker {
    pub fn new(store: Arc<dyn IrbStore>, stats_cache: Arc<StatsCache>) -> Self {
        Self { store, stats_cache }
    }

    /// Run every rule once, as of `today`.
    pub async fn run_once(&self, today: NaiveDate) -> Result<PassSummary, AppError> {
        let summary = self.close_expired_studies(today).await?;
        record_automation_pass(summary.closed, summary.failed);
        if summary.closed > 0 {
            self.stats_cache.invalidate();
        }
        Ok(summary)
    }

    #[tracing::instrument(skip(self))]
    async fn close_expired_studies(&self, today: NaiveDate) -> Result<PassSummary, AppError> {
        let expired = self.store.expired_active_studies(today).await?;
        let mut summary = PassSummary::default();

        for study in expired {
            let transition = StudyTransition {
                study_id: study.study_id,
                from: StudyStatus::Active,
                to: StudyStatus::Closed,
                actor_id: study.principal_investigator_id,
                notes: None,
                at: Utc::now(),
            };

            let log = match self.store.apply_transition(&transition).await {
                Ok(_) => {
                    summary.closed += 1;
                    record_study_transition(transition.from, transition.to, "automation");
                    tracing::info!(
                        study_id = %study.study_id,
                        protocol_number = %study.protocol_number,
                        "Closed study past its end date"
                    );
                    AutomationLog::new(
                        CLOSE_EXPIRED_STUDIES,
                        Some(study.study_id),
                        AutomationOutcome::Success,
                        format!(
                            "Closed {}: end date {} has passed",
                            study.protocol_number,
                            study
                                .end_date
                                .map(|d| d.to_string())
                                .unwrap_or_default()
                        ),
                    )
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(study_id = %study.study_id, error = %e, "Failed to close expired study");
                    AutomationLog::new(
                        CLOSE_EXPIRED_STUDIES,
                        Some(study.study_id),
                        AutomationOutcome::Failure,
                        e.to_string(),
                    )
                }
            };
            self.store.insert_automation_log(log).await?;
        }

        if summary.closed == 0 && summary.failed == 0 {
            self.store
                .insert_automation_log(AutomationLog::new(
                    CLOSE_EXPIRED_STUDIES,
                    None,
                    AutomationOutcome::Skipped,
                    "No active studies past their end date",
                ))
                .await?;
        }

        Ok(summary)
    }

    /// Spawn the interval loop. It exits when `shutdown` flips to `true`.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_seconds = interval.as_secs(), "Automation worker started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let today = Utc::now().date_naive();
                        match self.run_once(today).await {
                            Ok(summary) => tracing::info!(closed = summary.closed, failed = summary.failed, "Automation pass complete"),
                            Err(e) => tracing::error!(error = %e, "Automation pass failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Automation worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewStudy, NewUser, PageRequest, RiskLevel, Role, Study, User};
    use crate::services::memory::MemoryStore;

    async fn active_study(store: &MemoryStore, pi: &User, code: &str, end: NaiveDate) -> Study {
        let mut study = Study::new(NewStudy {
            protocol_number: code.to_string(),
            title: code.to_string(),
            description: String::new(),
            principal_investigator_id: pi.user_id,
            risk_level: RiskLevel::Minimal,
            start_date: None,
            end_date: Some(end),
            target_enrollment: 1,
            created_by: pi.user_id,
        });
        study.status = StudyStatus::Active;
        store.create_study(study).await.unwrap()
    }

    #[tokio::test]
    async fn closes_only_expired_studies() {
        let store = Arc::new(MemoryStore::new());
        let pi = store
            .create_user(User::new(NewUser {
                email: "pi@x.org".to_string(),
                full_name: "PI".to_string(),
                role: Role::Researcher,
                password_hash: String::new(),
            }))
            .await
            .unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let expired = active_study(&store, &pi, "OLD", today.pred_opt().unwrap()).await;
        let ongoing = active_study(&store, &pi, "NOW", today).await;

        let worker = AutomationWorker::new(store.clone(), Arc::new(StatsCache::new(Duration::from_secs(30))));
        let summary = worker.run_once(today).await.unwrap();
        assert_eq!(summary, PassSummary { closed: 1, failed: 0 });

        let closed = store.get_study(expired.study_id).await.unwrap().unwrap();
        assert_eq!(closed.status, StudyStatus::Closed);
        assert!(closed.closed_utc.is_some());
        let untouched = store.get_study(ongoing.study_id).await.unwrap().unwrap();
        assert_eq!(untouched.status, StudyStatus::Active);

        let logs = store.list_automation_logs(PageRequest::default()).await.unwrap();
        assert_eq!(logs.total, 1);
        assert_eq!(logs.items[0].outcome, AutomationOutcome::Success);
        assert_eq!(logs.items[0].study_id, Some(expired.study_id));

        let again = worker.run_once(today).await.unwrap();
        assert_eq!(again, PassSummary::default());
        let logs = store.list_automation_logs(PageRequest::default()).await.unwrap();
        assert_eq!(logs.items[0].outcome, AutomationOutcome::Skipped);
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let worker = AutomationWorker::new(store, Arc::new(StatsCache::new(Duration::from_secs(30))));
        let (tx, rx) = watch::channel(false);
        let handle = worker.spawn(Duration::from_secs(3600), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
