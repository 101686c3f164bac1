use chrono::{DateTime, Utc};
use sqlx::Row;
use study_core::model::{LearningPath, PathId, PathKey, UserId, Versioned};
use tracing::debug;

use super::SqliteRepository;
use super::mapping::{
    conn, difficulty_to_str, id_to_i64, map_path_row, path_id_from_i64, ser, to_json,
};
use crate::repository::{PathRepository, StorageError};
use crate::versioned::{InsertOutcome, VersionedStore, WriteOutcome};

fn key_params(key: &PathKey) -> Result<(i64, i64), StorageError> {
    Ok((
        id_to_i64("path_id", key.path_id.value())?,
        id_to_i64("user_id", key.user_id.value())?,
    ))
}

#[async_trait::async_trait]
impl VersionedStore<PathKey, LearningPath> for SqliteRepository {
    async fn read(&self, key: &PathKey) -> Result<Option<Versioned<LearningPath>>, StorageError> {
        let (path_id, user_id) = key_params(key)?;
        let row = sqlx::query(
            r"
            SELECT subject, difficulty_level, content, progress, version
            FROM learning_paths
            WHERE id = ?1 AND user_id = ?2
            ",
        )
        .bind(path_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("version").map_err(ser)?;
                Ok(Some(Versioned::new(map_path_row(&row)?, version)))
            }
            None => Ok(None),
        }
    }

    async fn try_write(
        &self,
        key: &PathKey,
        payload: &LearningPath,
        expected_version: i64,
    ) -> Result<WriteOutcome, StorageError> {
        let (path_id, user_id) = key_params(key)?;
        let res = sqlx::query(
            r"
            UPDATE learning_paths
            SET subject = ?1,
                difficulty_level = ?2,
                content = ?3,
                progress = ?4,
                version = version + 1,
                last_updated = ?5
            WHERE id = ?6 AND user_id = ?7 AND version = ?8
            ",
        )
        .bind(payload.subject())
        .bind(difficulty_to_str(payload.difficulty()))
        .bind(to_json(payload.topics())?)
        .bind(payload.progress())
        .bind(Utc::now())
        .bind(path_id)
        .bind(user_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 1 {
            debug!(%key, version = expected_version + 1, "path updated");
            Ok(WriteOutcome::Applied {
                version: expected_version + 1,
            })
        } else {
            Ok(WriteOutcome::Stale)
        }
    }

    async fn insert_if_absent(
        &self,
        key: &PathKey,
        payload: &LearningPath,
    ) -> Result<InsertOutcome, StorageError> {
        let (path_id, user_id) = key_params(key)?;
        let now = Utc::now();
        let res = sqlx::query(
            r"
            INSERT INTO learning_paths
                (id, user_id, subject, difficulty_level, content, progress, version,
                 created_at, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(path_id)
        .bind(user_id)
        .bind(payload.subject())
        .bind(difficulty_to_str(payload.difficulty()))
        .bind(to_json(payload.topics())?)
        .bind(payload.progress())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(if res.rows_affected() == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }
}

#[async_trait::async_trait]
impl PathRepository for SqliteRepository {
    async fn insert_path(
        &self,
        user_id: UserId,
        path: &LearningPath,
        created_at: DateTime<Utc>,
    ) -> Result<PathId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO learning_paths
                (user_id, subject, difficulty_level, content, progress, version,
                 created_at, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            ",
        )
        .bind(id_to_i64("user_id", user_id.value())?)
        .bind(path.subject())
        .bind(difficulty_to_str(path.difficulty()))
        .bind(to_json(path.topics())?)
        .bind(path.progress())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        path_id_from_i64(res.last_insert_rowid())
    }

    async fn list_paths(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(PathId, Versioned<LearningPath>)>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, subject, difficulty_level, content, progress, version
            FROM learning_paths
            WHERE user_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(id_to_i64("user_id", user_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = path_id_from_i64(row.try_get("id").map_err(ser)?)?;
            let version: i64 = row.try_get("version").map_err(ser)?;
            out.push((id, Versioned::new(map_path_row(&row)?, version)));
        }
        Ok(out)
    }

    async fn delete_path(&self, key: &PathKey) -> Result<bool, StorageError> {
        let (path_id, user_id) = key_params(key)?;
        let res = sqlx::query("DELETE FROM learning_paths WHERE id = ?1 AND user_id = ?2")
            .bind(path_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(res.rows_affected() > 0)
    }
}
