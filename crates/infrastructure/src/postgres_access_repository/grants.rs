use super::*;

impl PostgresAccessRepository {
    pub(super) async fn find_access_impl(&self, access_id: AccessId) -> AppResult<Access> {
        let row = sqlx::query_as::<_, AccessRow>(
            format!("SELECT {ACCESS_COLUMNS} FROM dataset_access WHERE id = $1").as_str(),
        )
        .bind(access_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| database_error("find access", error))?
        .ok_or_else(|| AppError::NotExist(format!("access '{access_id}'")))?;

        Access::try_from(row)
    }

    pub(super) async fn list_active_access_to_dataset_impl(
        &self,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<Access>> {
        let rows = sqlx::query_as::<_, AccessRow>(
            format!(
                r#"
                SELECT {ACCESS_COLUMNS}
                FROM dataset_access
                WHERE dataset_id = $1
                  AND revoked IS NULL
                  AND (expires IS NULL OR expires > now())
                ORDER BY created
                "#
            )
            .as_str(),
        )
        .bind(dataset_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| database_error("list active accesses", error))?;

        rows.into_iter().map(Access::try_from).collect()
    }

    /// Revokes the subject's active accesses and inserts the new one in one
    /// transaction, so at most one active row exists per dataset and subject.
    pub(super) async fn grant_access_to_dataset_and_renew_impl(
        &self,
        record: GrantAccessRecord,
    ) -> AppResult<Access> {
        let subject = record.subject.to_string();
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| database_error("begin grant transaction", error))?;

        sqlx::query(
            r#"
            UPDATE dataset_access
            SET revoked = now()
            WHERE dataset_id = $1 AND subject = $2 AND revoked IS NULL
            "#,
        )
        .bind(record.dataset_id.as_uuid())
        .bind(subject.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| database_error("revoke previous access", error))?;

        let row = sqlx::query_as::<_, AccessRow>(
            format!(
                r#"
                INSERT INTO dataset_access (dataset_id, subject, granter, expires)
                VALUES ($1, $2, LOWER($3), $4)
                RETURNING {ACCESS_COLUMNS}
                "#
            )
            .as_str(),
        )
        .bind(record.dataset_id.as_uuid())
        .bind(subject.as_str())
        .bind(record.granter.as_str())
        .bind(record.expires)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| database_error("insert access", error))?;

        transaction
            .commit()
            .await
            .map_err(|error| database_error("commit grant transaction", error))?;

        Access::try_from(row)
    }

    pub(super) async fn revoke_access_to_dataset_impl(&self, access_id: AccessId) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dataset_access
            SET revoked = COALESCE(revoked, now())
            WHERE id = $1
            "#,
        )
        .bind(access_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| database_error("revoke access", error))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotExist(format!("access '{access_id}'")));
        }

        Ok(())
    }
}
