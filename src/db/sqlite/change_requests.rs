use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
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

pub struct SqliteChangeRequestRepo {
    pool: SqlitePool,
}

impl SqliteChangeRequestRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_uuid(s: &str) -> DbResult<Uuid> {
        Uuid::parse_str(s)
            .map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
    }

    fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> DbResult<ChangeRequest> {
        let change_type: String = row.get("change_type");
        let priority: String = row.get("priority");
        let status: String = row.get("status");

        Ok(ChangeRequest {
            id: Self::parse_uuid(&row.get::<String, _>("id"))?,
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

    fn row_to_attachment(row: &sqlx::sqlite::SqliteRow) -> DbResult<Attachment> {
        Ok(Attachment {
            id: Self::parse_uuid(&row.get::<String, _>("id"))?,
            change_request_id: Self::parse_uuid(&row.get::<String, _>("change_request_id"))?,
            file_name: row.get("file_name"),
            storage_key: row.get("storage_key"),
            content_type: row.get("content_type"),
            size_bytes: row.get("size_bytes"),
            uploaded_at: row.get("uploaded_at"),
        })
    }

    fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> DbResult<AuditEntry> {
        let action: String = row.get("action");
        let old_status: Option<String> = row.get("old_status");
        let new_status: Option<String> = row.get("new_status");

        Ok(AuditEntry {
            id: Self::parse_uuid(&row.get::<String, _>("id"))?,
            change_request_id: Self::parse_uuid(&row.get::<String, _>("change_request_id"))?,
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
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        change_request_id: Uuid,
        entry: &CreateAuditEntry,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                id, change_request_id, action, old_status, new_status,
                actor, recorded_at, comment
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(change_request_id.to_string())
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
impl ChangeRequestRepo for SqliteChangeRequestRepo {
    async fn create(
        &self,
        input: NewChangeRequest,
        attachments: Vec<CreateAttachment>,
        audit: CreateAuditEntry,
    ) -> DbResult<ChangeRequest> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO change_requests (
                id, requestor_name, requestor_email, title, description,
                service_affected, change_type, priority, proposed_start,
                risk_assessment, backout_plan, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
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
        .execute(&mut *tx)
        .await?;

        for attachment in attachments {
            sqlx::query(
                r#"
                INSERT INTO attachments (
                    id, change_request_id, file_name, storage_key,
                    content_type, size_bytes, uploaded_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(id.to_string())
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

        Ok(ChangeRequest {
            id,
            requestor_name: input.requestor_name,
            requestor_email: input.requestor_email,
            title: input.title,
            description: input.description,
            service_affected: input.service_affected,
            change_type: input.change_type,
            priority: input.priority,
            proposed_start: input.proposed_start,
            risk_assessment: input.risk_assessment,
            backout_plan: input.backout_plan,
            status: ChangeStatus::New,
            created_at: now,
            updated_at: None,
            updated_by: None,
            approver_name: None,
            approver_email: None,
            approved_at: None,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ChangeRequest>> {
        let sql = format!(
            "SELECT {} FROM change_requests WHERE id = ?",
            CHANGE_REQUEST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

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
             WHERE LOWER(requestor_email) = LOWER(?) ORDER BY created_at DESC",
            CHANGE_REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(email).fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn list_by_status(&self, status: ChangeStatus) -> DbResult<Vec<ChangeRequest>> {
        let sql = format!(
            "SELECT {} FROM change_requests WHERE status = ? ORDER BY created_at DESC",
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
            SET title = ?, description = ?, service_affected = ?, change_type = ?,
                priority = ?, proposed_start = ?, risk_assessment = ?, backout_plan = ?,
                updated_at = ?, updated_by = ?
            WHERE id = ?
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
        .bind(id.to_string())
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
            SET status = ?, updated_at = ?, updated_by = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(updated_by)
        .bind(id.to_string())
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
            SET status = ?, approver_name = ?, approver_email = ?, approved_at = ?,
                updated_at = ?, updated_by = ?
            WHERE id = ?
            "#,
        )
        .bind(ChangeStatus::Approved.as_str())
        .bind(approver_name)
        .bind(approver_email)
        .bind(now)
        .bind(now)
        .bind(approver_email)
        .bind(id.to_string())
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
        let result = sqlx::query("DELETE FROM change_requests WHERE id = ?")
            .bind(id.to_string())
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
            WHERE change_request_id = ?
            ORDER BY uploaded_at, rowid
            "#,
        )
        .bind(change_request_id.to_string())
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
            WHERE change_request_id = ? AND id = ?
            "#,
        )
        .bind(change_request_id.to_string())
        .bind(attachment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_attachment(&r)).transpose()
    }

    async fn delete_attachment(
        &self,
        change_request_id: Uuid,
        attachment_id: Uuid,
    ) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM attachments WHERE change_request_id = ? AND id = ?")
            .bind(change_request_id.to_string())
            .bind(attachment_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_audit(&self, change_request_id: Uuid) -> DbResult<Vec<AuditEntry>> {
        // rowid breaks ties between entries recorded in the same millisecond
        let rows = sqlx::query(
            r#"
            SELECT id, change_request_id, action, old_status, new_status,
                   actor, recorded_at, comment
            FROM audit_entries
            WHERE change_request_id = ?
            ORDER BY recorded_at, rowid
            "#,
        )
        .bind(change_request_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_audit).collect()
    }
}
