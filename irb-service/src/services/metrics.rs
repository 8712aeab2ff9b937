//! Prometheus export and the domain counters recorded by the service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::models::StudyStatus;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it again is a no-op.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_study_transition(from: StudyStatus, to: StudyStatus, source: &'static str) {
    metrics::counter!(
        "irb_study_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str(),
        "source" => source
    )
    .increment(1);
}

pub fn record_login(outcome: &'static str) {
    metrics::counter!("irb_logins_total", "outcome" => outcome).increment(1);
}

pub fn record_document_upload(size_bytes: usize) {
    metrics::counter!("irb_documents_uploaded_total").increment(1);
    metrics::histogram!("irb_document_upload_bytes").record(size_bytes as f64);
}

pub fn record_audit_write_failure() {
    metrics::counter!("irb_audit_write_failures_total").increment(1);
}

pub fn record_automation_pass(closed: usize, failed: usize) {
    metrics::counter!("irb_automation_runs_total").increment(1);
    metrics::counter!("irb_automation_studies_closed_total").increment(closed as u64);
    metrics::counter!("irb_automation_failures_total").increment(failed as u64);
}
