use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::ChangeRequestRepo,
    },
    models::{
        Attachment, AuditEntry, ChangeRequest, ChangeStatus, CreateAttachment, CreateAuditEntry,
        NewChangeRequest, UpdateChangeRequest,
    },
};

const CHANGE_REQUEST_COLUMNS: &str = "id, requestor_name, requestor_email, title, description, \
     service_affected, change_type, priority, proposed_start, risk_assessment, backout_plan, \
     status, created_at, updated_at, updated_by, approver_name, approver_email, approved_at";

pub struct PostgresChangeRequestRepo {
    pool: PgPool,
}

impl PostgresChangeRequestRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &sqlx::postgres::PgRow) -> DbResult<ChangeRequest> {
        let change_type: String = row.get("change_type");
        let priority: String = row.get("priority");
        let status: String = row.get("status");

        Ok(ChangeRequest {
            id: row.get("id"),
            requestor_name: row.get("requestor_name"),
            requestor_email: row.get("requestor_email"),
            title: row.get("title"),
            description: row.get("description"),
            service_affected: row.get("service_affected"),
            change_type: change_type.parse().map_err(DbError::Internal)?,
            priority: priority.parse().map_err(DbError::Internal)?,
            proposed_start: row.get("proposed_start"),
            risk_assessment: row.get("risk_assessment"),
            backout_plan: row.get("backout_plan"),
            status: status.parse().map_err(DbError::Internal)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            updated_by: row.get("updated_by"),
            approver_name: row.get("approver_name"),
            approver_email: row.get("approver_email"),
            approved_at: row.get("approved_at"),
        })
    }

    fn row_to_attachment(row: &sqlx::postgres::PgRow) -> DbResult<Attachment> {
        Ok(Attachment {
            id: row.get("id"),
            change_request_id: row.get("change_request_id"),
            file_name: row.get("file_name"),
            storage_key: row.get("storage_key"),
            content_type: row.get("content_type"),
            size_bytes: row.get("size_bytes"),
            uploaded_at: row.get("uploaded_at"),
        })
    }

    fn row_to_audit(row: &sqlx::postgres::PgRow) -> DbResult<AuditEntry> {
        let action: String = row.get("action");
        let old_status: Option<String> = row.get("old_status");
        let new_status: Option<String> = row.get("new_status");

        Ok(AuditEntry {
            id: row.get("id"),
            change_request_id: row.get("change_request_id"),
            action: action.parse().map_err(DbError::Internal)?,
            old_status: old_status
                .map(|s| s.parse().map_err(DbError::Internal))
                .transpose()?,
            new_status: new_status
                .map(|s| s.parse().map_err(DbError::Internal))
                .transpose()?,
            actor: row.get("actor"),
            recorded_at: row.get("recorded_at"),
            comment: row.get("comment"),
        })
    }

    async fn insert_audit(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        change_request_id: Uuid,
        entry: &CreateAuditEntry,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                id, change_request_id, action, old_status, new_status,
                actor, recorded_at, comment
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(change_request_id)
        .bind(entry.action.as_str())
        .bind(entry.old_status.map(|s| s.as_str()))
        .bind(entry.new_status.map(|s| s.as_str()))
        .bind(&entry.actor)
        .bind(chrono::Utc::now())
        .bind(&entry.comment)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ChangeRequestRepo for PostgresChangeRequestRepo {
    async fn create(
        &self,
        input: NewChangeRequest,
        attachments: Vec<CreateAttachment>,
        audit: CreateAuditEntry,
    ) -> DbResult<ChangeRequest> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO change_requests (
                id, requestor_name, requestor_email, title, description,
                service_affected, change_type, priority, proposed_start,
                risk_assessment, backout_plan, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            CHANGE_REQUEST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&input.requestor_name)
            .bind(&input.requestor_email)
            .bind(&input.title)
            .bind(&input.description)
            .bind(&input.service_affected)
            .bind(input.change_type.as_str())
            .bind(input.priority.as_str())
            .bind(input.proposed_start)
            .bind(&input.risk_assessment)
            .bind(&input.backout_plan)
            .bind(ChangeStatus::New.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        for attachment in attachments {
            sqlx::query(
                r#"
                INSERT INTO attachments (
                    id, change_request_id, file_name, storage_key,
                    content_type, size_bytes, uploaded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(&attachment.file_name)
            .bind(&attachment.storage_key)
            .bind(&attachment.content_type)
            .bind(attachment.size_bytes)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        Self::insert_audit(&mut tx, id, &audit).await?;

        tx.commit().await?;

        Self::row_to_request(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ChangeRequest>> {
        let sql = format!(
            "SELECT {} FROM change_requests WHERE id = $1",
            CHANGE_REQUEST_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.map(|r| Self::row_to_request(&r)).transpose()
    }

    async fn list(&self) -> DbResult<Vec<ChangeRequest>> {
        let sql = format!(
            "SELECT {} FROM change_requests ORDER BY created_at DESC",
            CHANGE_REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn list_by_email(&self, email: &str) -> DbResult<Vec<ChangeRequest>> {
        let sql = format!(
            "SELECT {} FROM change_requests \
             WHERE LOWER(requestor_email) = LOWER($1) ORDER BY created_at DESC",
            CHANGE_REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(email).fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn list_by_status(&self, status: ChangeStatus) -> DbResult<Vec<ChangeRequest>> {
        let sql = format!(
            "SELECT {} FROM change_requests WHERE status = $1 ORDER BY created_at DESC",
            CHANGE_REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn update_details(
        &self,
        id: Uuid,
        input: UpdateChangeRequest,
        updated_by: &str,
        audit: CreateAuditEntry,
    ) -> DbResult<bool> {
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE change_requests
            SET title = $1, description = $2, service_affected = $3, change_type = $4,
                priority = $5, proposed_start = $6, risk_assessment = $7, backout_plan = $8,
                updated_at = $9, updated_by = $10
            WHERE id = $11
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.service_affected)
        .bind(input.change_type.as_str())
        .bind(input.priority.as_str())
        .bind(input.proposed_start)
        .bind(&input.risk_assessment)
        .bind(&input.backout_plan)
        .bind(now)
        .bind(updated_by)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        Self::insert_audit(&mut tx, id, &audit).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ChangeStatus,
        updated_by: &str,
        audit: CreateAuditEntry,
    ) -> DbResult<bool> {
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE change_requests
            SET status = $1, updated_at = $2, updated_by = $3
            WHERE id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(updated_by)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        Self::insert_audit(&mut tx, id, &audit).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn set_approval(
        &self,
        id: Uuid,
        approver_name: &str,
        approver_email: &str,
        audit: CreateAuditEntry,
    ) -> DbResult<bool> {
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE change_requests
            SET status = $1, approver_name = $2, approver_email = $3, approved_at = $4,
                updated_at = $5, updated_by = $6
            WHERE id = $7
            "#,
        )
        .bind(ChangeStatus::Approved.as_str())
        .bind(approver_name)
        .bind(approver_email)
        .bind(now)
        .bind(now)
        .bind(approver_email)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        Self::insert_audit(&mut tx, id, &audit).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        // Attachment and audit rows go with the request via FK cascade
        let result = sqlx::query("DELETE FROM change_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_attachments(&self, change_request_id: Uuid) -> DbResult<Vec<Attachment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, change_request_id, file_name, storage_key,
                   content_type, size_bytes, uploaded_at
            FROM attachments
            WHERE change_request_id = $1
            ORDER BY uploaded_at, id
            "#,
        )
        .bind(change_request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_attachment).collect()
    }

    async fn get_attachment(
        &self,
        change_request_id: Uuid,
        attachment_id: Uuid,
    ) -> DbResult<Option<Attachment>> {
        let row = sqlx::query(
            r#"
            SELECT id, change_request_id, file_name, storage_key,
                   content_type, size_bytes, uploaded_at
            FROM attachments
            WHERE change_request_id = $1 AND id = $2
            "#,
        )
        .bind(change_request_id)
        .bind(attachment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_attachment(&r)).transpose()
    }

    async fn delete_attachment(
        &self,
        change_request_id: Uuid,
        attachment_id: Uuid,
    ) -> DbResult<bool> {
        let result =
            sqlx::query("DELETE FROM attachments WHERE change_request_id = $1 AND id = $2")
                .bind(change_request_id)
                .bind(attachment_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_audit(&self, change_request_id: Uuid) -> DbResult<Vec<AuditEntry>> {
        // seq breaks ties between entries recorded in the same microsecond
        let rows = sqlx::query(
            r#"
            SELECT id, change_request_id, action, old_status, new_status,
                   actor, recorded_at, comment
            FROM audit_entries
            WHERE change_request_id = $1
            ORDER BY recorded_at, seq
            "#,
        )
        .bind(change_request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_audit).collect()
    }
}
