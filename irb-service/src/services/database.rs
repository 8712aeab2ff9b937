//! PostgreSQL implementation of [`IrbStore`].
//!
//! Queries are runtime-checked (`sqlx::query_as`) so the crate builds without
//! a live database. Enum columns are text and convert through the `*Row` types.

use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::store::{DashboardStats, IrbStore};
use crate::config::StorageConfig;
use crate::models::automation_log::AutomationLogRow;
use crate::models::document::DocumentRow;
use crate::models::participant::ParticipantRow;
use crate::models::study::StudyRow;
use crate::models::user::UserRow;
use crate::models::{
    corrupt_row, AuditFilter, AuditLog, AutomationLog, Document, EnrollmentStatus, NewDocument, Page,
    PageRequest, Participant, ParticipantFilter, ParticipantUpdate, Study, StudyFilter,
    StudyScope, StudyStatus, StudyTransition, StudyUpdate, User, UserFilter, UserUpdate,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations.
    pub async fn connect(config: &StorageConfig) -> Result<Self, AppError> {
        tracing::info!(max_connections = config.max_connections, "Connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to PostgreSQL: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Failed to connect to database: {}", e))
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;

        tracing::info!("Database migrations applied");
        Ok(Self::new(pool))
    }

    async fn exists(&self, table_sql: &'static str, id: Uuid) -> Result<bool, AppError> {
        let found: Option<i32> = sqlx::query_scalar(table_sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

/// Lock the study row for the rest of the transaction and read its status.
/// Status changes go through a conditional UPDATE, so they wait on this lock.
async fn lock_study_status(
    tx: &mut Transaction<'_, Postgres>,
    study_id: Uuid,
) -> Result<StudyStatus, AppError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM studies WHERE study_id = $1 FOR UPDATE")
            .bind(study_id)
            .fetch_optional(&mut **tx)
            .await?;
    let status =
        status.ok_or_else(|| AppError::bad_request(format!("Study {} does not exist", study_id)))?;
    status.parse::<StudyStatus>().map_err(corrupt_row)
}

fn ensure_open(status: StudyStatus) -> Result<(), AppError> {
    if status == StudyStatus::Closed {
        return Err(AppError::conflict("Documents of a closed study are read-only"));
    }
    Ok(())
}

fn rows_into<R, T>(rows: Vec<R>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Escape `%`, `_` and `\` so user input matches literally inside ILIKE.
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_user_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
}

fn push_study_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &StudyFilter) {
    qb.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(pi) = filter.principal_investigator_id {
        qb.push(" AND principal_investigator_id = ").push_bind(pi);
    }
    match filter.scope {
        StudyScope::All => {}
        StudyScope::LedBy(user_id) => {
            qb.push(" AND principal_investigator_id = ").push_bind(user_id);
        }
        StudyScope::LedByOrActive(user_id) => {
            qb.push(" AND (principal_investigator_id = ")
                .push_bind(user_id)
                .push(" OR status = 'active')");
        }
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR protocol_number ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_audit_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    qb.push(" WHERE TRUE");
    if let Some(actor) = filter.actor_user_id {
        qb.push(" AND actor_user_id = ").push_bind(actor);
    }
    if let Some(action) = filter.action {
        qb.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(entity_type) = &filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = filter.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id);
    }
    if let Some(from) = filter.from_utc {
        qb.push(" AND created_utc >= ").push_bind(from);
    }
    if let Some(to) = filter.to_utc {
        qb.push(" AND created_utc <= ").push_bind(to);
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: PageRequest) {
    qb.push(" LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());
}

#[async_trait]
impl IrbStore for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    // ==================== Users ====================

    #[tracing::instrument(skip(self, user), fields(user_id = %user.user_id))]
    async fn create_user(&self, user: User) -> Result<User, AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, full_name, role, password_hash, is_active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::conflict(format!(
                "A user with email {} already exists",
                user.email
            )),
            other => other,
        })?;
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>, AppError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_user_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new("SELECT * FROM users");
        push_user_filters(&mut query, filter);
        query.push(" ORDER BY created_utc DESC");
        push_page(&mut query, page);
        let rows = query.build_query_as::<UserRow>().fetch_all(&self.pool).await?;

        Ok(Page::new(rows_into(rows)?, total, page))
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users SET
                full_name = COALESCE($2, full_name),
                role = COALESCE($3, role),
                is_active = COALESCE($4, is_active),
                password_hash = COALESCE($5, password_hash),
                updated_utc = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(update.full_name)
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.is_active)
        .bind(update.password_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User {} not found", user_id)))?;
        User::try_from(row)
    }

    async fn count_users(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ==================== Studies ====================

    #[tracing::instrument(skip(self, study), fields(study_id = %study.study_id))]
    async fn create_study(&self, study: Study) -> Result<Study, AppError> {
        sqlx::query(
            r#"
            INSERT INTO studies (
                study_id, protocol_number, title, description, principal_investigator_id,
                status, risk_level, start_date, end_date, target_enrollment,
                created_by, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(study.study_id)
        .bind(&study.protocol_number)
        .bind(&study.title)
        .bind(&study.description)
        .bind(study.principal_investigator_id)
        .bind(study.status.as_str())
        .bind(study.risk_level.as_str())
        .bind(study.start_date)
        .bind(study.end_date)
        .bind(study.target_enrollment)
        .bind(study.created_by)
        .bind(study.created_utc)
        .bind(study.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::conflict(format!(
                "Protocol number {} is already registered",
                study.protocol_number
            )),
            other => other,
        })?;
        Ok(study)
    }

    async fn get_study(&self, study_id: Uuid) -> Result<Option<Study>, AppError> {
        sqlx::query_as::<_, StudyRow>("SELECT * FROM studies WHERE study_id = $1")
            .bind(study_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Study::try_from)
            .transpose()
    }

    async fn list_studies(
        &self,
        filter: &StudyFilter,
        page: PageRequest,
    ) -> Result<Page<Study>, AppError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM studies");
        push_study_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new("SELECT * FROM studies");
        push_study_filters(&mut query, filter);
        query.push(" ORDER BY created_utc DESC");
        push_page(&mut query, page);
        let rows = query.build_query_as::<StudyRow>().fetch_all(&self.pool).await?;

        Ok(Page::new(rows_into(rows)?, total, page))
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_study(&self, study_id: Uuid, update: StudyUpdate) -> Result<Study, AppError> {
        let row = sqlx::query_as::<_, StudyRow>(
            r#"
            UPDATE studies SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                principal_investigator_id = COALESCE($4, principal_investigator_id),
                risk_level = COALESCE($5, risk_level),
                start_date = CASE WHEN $6 THEN $7 ELSE start_date END,
                end_date = CASE WHEN $8 THEN $9 ELSE end_date END,
                target_enrollment = COALESCE($10, target_enrollment),
                updated_utc = NOW()
            WHERE study_id = $1 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(study_id)
        .bind(update.title)
        .bind(update.description)
        .bind(update.principal_investigator_id)
        .bind(update.risk_level.map(|r| r.as_str()))
        .bind(update.start_date.is_some())
        .bind(update.start_date.flatten())
        .bind(update.end_date.is_some())
        .bind(update.end_date.flatten())
        .bind(update.target_enrollment)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Study::try_from(row);
        }
        if self
            .exists("SELECT 1 FROM studies WHERE study_id = $1", study_id)
            .await?
        {
            Err(AppError::conflict("Only draft studies can be modified"))
        } else {
            Err(AppError::not_found(format!("Study {} not found", study_id)))
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete_study(&self, study_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM studies WHERE study_id = $1 AND status = 'draft'")
            .bind(study_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            Ok(())
        } else if self
            .exists("SELECT 1 FROM studies WHERE study_id = $1", study_id)
            .await?
        {
            Err(AppError::conflict("Only draft studies can be deleted"))
        } else {
            Err(AppError::not_found(format!("Study {} not found", study_id)))
        }
    }

    #[tracing::instrument(skip(self, transition), fields(study_id = %transition.study_id, from = %transition.from, to = %transition.to))]
    async fn apply_transition(&self, transition: &StudyTransition) -> Result<Study, AppError> {
        let row = sqlx::query_as::<_, StudyRow>(
            r#"
            UPDATE studies SET
                status = $3,
                updated_utc = $4,
                review_notes = COALESCE($5, review_notes),
                submitted_utc = CASE WHEN $3 = 'submitted' THEN $4 ELSE submitted_utc END,
                reviewed_utc = CASE WHEN $3 = 'reviewed' THEN $4 ELSE reviewed_utc END,
                reviewed_by = CASE WHEN $3 = 'reviewed' THEN $6 ELSE reviewed_by END,
                approved_utc = CASE WHEN $3 = 'active' THEN $4 ELSE approved_utc END,
                closed_utc = CASE WHEN $3 = 'closed' THEN $4 ELSE closed_utc END
            WHERE study_id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(transition.study_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.at)
        .bind(&transition.notes)
        .bind(transition.actor_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Study::try_from(row);
        }
        if self
            .exists("SELECT 1 FROM studies WHERE study_id = $1", transition.study_id)
            .await?
        {
            Err(AppError::conflict(
                "Study status changed concurrently; reload and retry",
            ))
        } else {
            Err(AppError::not_found(format!(
                "Study {} not found",
                transition.study_id
            )))
        }
    }

    async fn expired_active_studies(&self, today: NaiveDate) -> Result<Vec<Study>, AppError> {
        let rows = sqlx::query_as::<_, StudyRow>(
            "SELECT * FROM studies WHERE status = 'active' AND end_date < $1 ORDER BY end_date",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        rows_into(rows)
    }

    // ==================== Participants ====================

    #[tracing::instrument(skip(self, participant), fields(study_id = %participant.study_id))]
    async fn create_participant(&self, participant: Participant) -> Result<Participant, AppError> {
        let mut tx = self.pool.begin().await?;

        let status = lock_study_status(&mut tx, participant.study_id).await?;
        if status != StudyStatus::Active {
            return Err(AppError::conflict(format!(
                "Study is {}; participants can only be added to active studies",
                status
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO participants (
                participant_id, study_id, subject_code, enrollment_status, consent_signed,
                consent_date, date_of_birth, sex, notes, enrolled_by, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(participant.participant_id)
        .bind(participant.study_id)
        .bind(&participant.subject_code)
        .bind(participant.enrollment_status.as_str())
        .bind(participant.consent_signed)
        .bind(participant.consent_date)
        .bind(participant.date_of_birth)
        .bind(&participant.sex)
        .bind(&participant.notes)
        .bind(participant.enrolled_by)
        .bind(participant.created_utc)
        .bind(participant.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::conflict(format!(
                "Subject code {} is already used in this study",
                participant.subject_code
            )),
            other => other,
        })?;

        tx.commit().await?;
        Ok(participant)
    }

    async fn get_participant(&self, participant_id: Uuid) -> Result<Option<Participant>, AppError> {
        sqlx::query_as::<_, ParticipantRow>("SELECT * FROM participants WHERE participant_id = $1")
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Participant::try_from)
            .transpose()
    }

    async fn list_participants(
        &self,
        study_id: Uuid,
        filter: &ParticipantFilter,
        page: PageRequest,
    ) -> Result<Page<Participant>, AppError> {
        let status = filter.enrollment_status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM participants WHERE study_id = $1 AND ($2::TEXT IS NULL OR enrollment_status = $2)",
        )
        .bind(study_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT * FROM participants
            WHERE study_id = $1 AND ($2::TEXT IS NULL OR enrollment_status = $2)
            ORDER BY created_utc DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(study_id)
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(rows_into(rows)?, total, page))
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_participant(
        &self,
        participant_id: Uuid,
        update: ParticipantUpdate,
    ) -> Result<Participant, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ParticipantRow>(
            "SELECT * FROM participants WHERE participant_id = $1 FOR UPDATE",
        )
        .bind(participant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Participant {} not found", participant_id)))?;

        let mut participant = Participant::try_from(row)?;
        participant.apply_update(&update)?;

        sqlx::query(
            r#"
            UPDATE participants SET
                enrollment_status = $2,
                consent_signed = $3,
                consent_date = $4,
                date_of_birth = $5,
                sex = $6,
                notes = $7,
                updated_utc = $8
            WHERE participant_id = $1
            "#,
        )
        .bind(participant.participant_id)
        .bind(participant.enrollment_status.as_str())
        .bind(participant.consent_signed)
        .bind(participant.consent_date)
        .bind(participant.date_of_birth)
        .bind(&participant.sex)
        .bind(&participant.notes)
        .bind(participant.updated_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(participant)
    }

    async fn delete_participant(&self, participant_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM participants WHERE participant_id = $1")
            .bind(participant_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!(
                "Participant {} not found",
                participant_id
            )));
        }
        Ok(())
    }

    // ==================== Documents ====================

    #[tracing::instrument(skip(self, upload), fields(study_id = %upload.study_id, kind = %upload.kind))]
    async fn create_document(&self, upload: NewDocument) -> Result<Document, AppError> {
        let mut tx = self.pool.begin().await?;

        // The study lock also serialises concurrent uploads so versions stay gapless.
        ensure_open(lock_study_status(&mut tx, upload.study_id).await?)?;

        let current: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM documents WHERE study_id = $1 AND kind = $2 AND title = $3",
        )
        .bind(upload.study_id)
        .bind(upload.kind.as_str())
        .bind(&upload.title)
        .fetch_one(&mut *tx)
        .await?;

        let document = Document::new(&upload, current + 1);

        sqlx::query(
            r#"
            INSERT INTO documents (
                document_id, study_id, kind, title, file_name, content_type,
                size_bytes, version, checksum_sha256, uploaded_by, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(document.document_id)
        .bind(document.study_id)
        .bind(document.kind.as_str())
        .bind(&document.title)
        .bind(&document.file_name)
        .bind(&document.content_type)
        .bind(document.size_bytes)
        .bind(document.version)
        .bind(&document.checksum_sha256)
        .bind(document.uploaded_by)
        .bind(document.created_utc)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO document_contents (document_id, content) VALUES ($1, $2)")
            .bind(document.document_id)
            .bind(&upload.content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(document)
    }

    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>, AppError> {
        sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Document::try_from)
            .transpose()
    }

    async fn get_document_content(&self, document_id: Uuid) -> Result<Option<Vec<u8>>, AppError> {
        let content: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT content FROM document_contents WHERE document_id = $1")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(content)
    }

    async fn list_documents(
        &self,
        study_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Document>, AppError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE study_id = $1")
            .bind(study_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE study_id = $1 ORDER BY created_utc DESC LIMIT $2 OFFSET $3",
        )
        .bind(study_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(rows_into(rows)?, total, page))
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let study_id: Uuid =
            sqlx::query_scalar("SELECT study_id FROM documents WHERE document_id = $1")
                .bind(document_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Document {} not found", document_id)))?;
        ensure_open(lock_study_status(&mut tx, study_id).await?)?;

        sqlx::query("DELETE FROM documents WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== Audit & automation ====================

    async fn insert_audit_log(&self, entry: AuditLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                audit_id, actor_user_id, action, entity_type, entity_id,
                details, ip_address, user_agent, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.audit_id)
        .bind(entry.actor_user_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit_logs(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLog>, AppError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_audit_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new("SELECT * FROM audit_logs");
        push_audit_filters(&mut query, filter);
        query.push(" ORDER BY created_utc DESC");
        push_page(&mut query, page);
        let items = query.build_query_as::<AuditLog>().fetch_all(&self.pool).await?;

        Ok(Page::new(items, total, page))
    }

    async fn insert_automation_log(&self, entry: AutomationLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO automation_logs (automation_id, rule_name, study_id, outcome, message, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.automation_id)
        .bind(&entry.rule_name)
        .bind(entry.study_id)
        .bind(entry.outcome.as_str())
        .bind(&entry.message)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_automation_logs(&self, page: PageRequest) -> Result<Page<AutomationLog>, AppError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM automation_logs")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query_as::<_, AutomationLogRow>(
            "SELECT * FROM automation_logs ORDER BY created_utc DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(rows_into(rows)?, total, page))
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        let mut stats = DashboardStats::default();
        for status in StudyStatus::ALL {
            stats.studies_by_status.insert(status.as_str().to_string(), 0);
        }
        for status in EnrollmentStatus::ALL {
            stats
                .participants_by_status
                .insert(status.as_str().to_string(), 0);
        }

        let studies: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM studies GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        stats.studies_by_status.extend(studies);

        let participants: Vec<(String, i64)> = sqlx::query_as(
            "SELECT enrollment_status, COUNT(*) FROM participants GROUP BY enrollment_status",
        )
        .fetch_all(&self.pool)
        .await?;
        stats.participants_by_status.extend(participants);

        let (documents, users, active): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents),
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM users WHERE is_active)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        stats.total_documents = documents;
        stats.total_users = users;
        stats.active_users = active;

        Ok(stats)
    }
}
