use super::*;

impl PostgresAccessRepository {
    pub(super) async fn create_access_request_impl(
        &self,
        request: NewAccessRequest,
    ) -> AppResult<AccessRequest> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO dataset_access_requests (
                dataset_id, subject, owner, expires, polly_documentation_id
            )
            VALUES ($1, $2, LOWER($3), $4, $5)
            RETURNING id
            "#,
        )
        .bind(request.dataset_id.as_uuid())
        .bind(request.subject.to_string())
        .bind(request.owner.as_str())
        .bind(request.expires)
        .bind(request.polly_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| database_error("create access request", error))?;

        self.find_access_request_impl(AccessRequestId::from_uuid(id))
            .await
    }

    pub(super) async fn find_access_request_impl(
        &self,
        request_id: AccessRequestId,
    ) -> AppResult<AccessRequest> {
        let row = sqlx::query_as::<_, AccessRequestRow>(
            format!("{ACCESS_REQUEST_SELECT} WHERE r.id = $1").as_str(),
        )
        .bind(request_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| database_error("find access request", error))?
        .ok_or_else(|| AppError::NotExist(format!("access request '{request_id}'")))?;

        AccessRequest::try_from(row)
    }

    pub(super) async fn list_access_requests_for_dataset_impl(
        &self,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<AccessRequest>> {
        let rows = sqlx::query_as::<_, AccessRequestRow>(
            format!("{ACCESS_REQUEST_SELECT} WHERE r.dataset_id = $1 ORDER BY r.created DESC")
                .as_str(),
        )
        .bind(dataset_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| database_error("list access requests", error))?;

        rows.into_iter().map(AccessRequest::try_from).collect()
    }

    pub(super) async fn update_access_request_impl(
        &self,
        record: UpdateAccessRequestRecord,
    ) -> AppResult<AccessRequest> {
        let result = sqlx::query(
            r#"
            UPDATE dataset_access_requests
            SET owner = LOWER($2), expires = $3, polly_documentation_id = $4
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.owner.as_str())
        .bind(record.expires)
        .bind(record.polly_id)
        .execute(&self.pool)
        .await
        .map_err(|error| database_error("update access request", error))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotExist(format!("access request '{}'", record.id)));
        }

        self.find_access_request_impl(record.id).await
    }

    pub(super) async fn delete_access_request_impl(
        &self,
        request_id: AccessRequestId,
    ) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM dataset_access_requests WHERE id = $1")
            .bind(request_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| database_error("delete access request", error))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotExist(format!("access request '{request_id}'")));
        }

        Ok(())
    }

    /// Closes the request and inserts its access in one transaction.
    pub(super) async fn approve_access_request_impl(
        &self,
        request_id: AccessRequestId,
        granter: &str,
    ) -> AppResult<Access> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| database_error("begin approve transaction", error))?;

        let approved = sqlx::query_as::<_, (Uuid, String, Option<DateTime<Utc>>)>(
            r#"
            UPDATE dataset_access_requests
            SET status = 'approved', granter = LOWER($2), closed = now()
            WHERE id = $1 AND status = 'pending'
            RETURNING dataset_id, subject, expires
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(granter)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| database_error("approve access request", error))?;

        let Some((dataset_id, subject, expires)) = approved else {
            return Err(AppError::NotExist(format!(
                "pending access request '{request_id}'"
            )));
        };

        sqlx::query(
            r#"
            UPDATE dataset_access
            SET revoked = now()
            WHERE dataset_id = $1 AND subject = $2 AND revoked IS NULL
            "#,
        )
        .bind(dataset_id)
        .bind(subject.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| database_error("revoke previous access", error))?;

        let row = sqlx::query_as::<_, AccessRow>(
            format!(
                r#"
                INSERT INTO dataset_access (
                    dataset_id, subject, granter, expires, access_request_id
                )
                VALUES ($1, $2, LOWER($3), $4, $5)
                RETURNING {ACCESS_COLUMNS}
                "#
            )
            .as_str(),
        )
        .bind(dataset_id)
        .bind(subject.as_str())
        .bind(granter)
        .bind(expires)
        .bind(request_id.as_uuid())
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| database_error("insert approved access", error))?;

        transaction
            .commit()
            .await
            .map_err(|error| database_error("commit approve transaction", error))?;

        Access::try_from(row)
    }

    pub(super) async fn deny_access_request_impl(
        &self,
        request_id: AccessRequestId,
        granter: &str,
        reason: Option<&str>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dataset_access_requests
            SET status = 'denied', granter = LOWER($2), reason = $3, closed = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(granter)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|error| database_error("deny access request", error))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotExist(format!(
                "pending access request '{request_id}'"
            )));
        }

        Ok(())
    }
}
