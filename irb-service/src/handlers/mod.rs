pub mod audit;
pub mod auth;
pub mod automation;
pub mod dashboard;
pub mod documents;
pub mod health;
pub mod metrics;
pub mod participants;
pub mod studies;
pub mod users;

use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    models::Study,
    services::{Actor, Policy},
    AppState,
};

/// Load a study the caller may see; invisible studies are reported as missing.
pub(crate) async fn load_visible_study(
    state: &AppState,
    actor: &Actor,
    study_id: Uuid,
) -> Result<Study, AppError> {
    let study = state
        .store
        .get_study(study_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Study {} not found", study_id)))?;
    Policy::ensure_can_view_study(actor, &study)?;
    Ok(study)
}
