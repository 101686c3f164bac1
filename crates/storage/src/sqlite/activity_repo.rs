use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use study_core::model::{Activity, ActivityKey, PathKey, TopicName, UserId, Versioned};
use tracing::debug;

use super::SqliteRepository;
use super::mapping::{
    conn, id_to_i64, map_activity_row, path_id_from_i64, ser, to_json, user_id_from_i64,
};
use crate::repository::{ActivityRepository, StorageError};
use crate::versioned::{InsertOutcome, VersionedStore, WriteOutcome};

fn versioned_activity(row: &SqliteRow) -> Result<Versioned<Activity>, StorageError> {
    let version: i64 = row.try_get("version").map_err(ser)?;
    Ok(Versioned::new(map_activity_row(row)?, version))
}

#[async_trait::async_trait]
impl VersionedStore<ActivityKey, Activity> for SqliteRepository {
    async fn read(&self, key: &ActivityKey) -> Result<Option<Versioned<Activity>>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT viewed_json, total_minutes, version, activity_date
            FROM learning_activities
            WHERE user_id = ?1 AND path_id = ?2 AND topic_name = ?3
            ",
        )
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(id_to_i64("path_id", key.path_id.value())?)
        .bind(key.topic.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(versioned_activity).transpose()
    }

    async fn try_write(
        &self,
        key: &ActivityKey,
        payload: &Activity,
        expected_version: i64,
    ) -> Result<WriteOutcome, StorageError> {
        let res = sqlx::query(
            r"
            UPDATE learning_activities
            SET viewed_json = ?1,
                total_minutes = ?2,
                activity_date = ?3,
                version = version + 1
            WHERE user_id = ?4 AND path_id = ?5 AND topic_name = ?6 AND version = ?7
            ",
        )
        .bind(to_json(payload.viewed())?)
        .bind(payload.total_minutes())
        .bind(payload.last_active_at())
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(id_to_i64("path_id", key.path_id.value())?)
        .bind(key.topic.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 1 {
            debug!(%key, version = expected_version + 1, "activity updated");
            Ok(WriteOutcome::Applied {
                version: expected_version + 1,
            })
        } else {
            Ok(WriteOutcome::Stale)
        }
    }

    async fn insert_if_absent(
        &self,
        key: &ActivityKey,
        payload: &Activity,
    ) -> Result<InsertOutcome, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO learning_activities
                (user_id, path_id, topic_name, viewed_json, total_minutes, version, activity_date)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
            ON CONFLICT(user_id, path_id, topic_name) DO NOTHING
            ",
        )
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(id_to_i64("path_id", key.path_id.value())?)
        .bind(key.topic.as_str())
        .bind(to_json(payload.viewed())?)
        .bind(payload.total_minutes())
        .bind(payload.last_active_at())
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
impl ActivityRepository for SqliteRepository {
    async fn activities_for_path(
        &self,
        key: &PathKey,
    ) -> Result<Vec<(TopicName, Versioned<Activity>)>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT topic_name, viewed_json, total_minutes, version, activity_date
            FROM learning_activities
            WHERE user_id = ?1 AND path_id = ?2
            ORDER BY topic_name ASC
            ",
        )
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(id_to_i64("path_id", key.path_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let topic: String = row.try_get("topic_name").map_err(ser)?;
            out.push((TopicName::new(topic), versioned_activity(&row)?));
        }
        Ok(out)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(ActivityKey, Versioned<Activity>)>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT user_id, path_id, topic_name, viewed_json, total_minutes, version, activity_date
            FROM learning_activities
            WHERE user_id = ?1
            ORDER BY path_id ASC, topic_name ASC
            ",
        )
        .bind(id_to_i64("user_id", user_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key = ActivityKey::new(
                user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
                path_id_from_i64(row.try_get("path_id").map_err(ser)?)?,
                TopicName::new(row.try_get::<String, _>("topic_name").map_err(ser)?),
            );
            out.push((key, versioned_activity(&row)?));
        }
        Ok(out)
    }

    async fn total_minutes_for_user(&self, user_id: UserId) -> Result<f64, StorageError> {
        let row = sqlx::query(
            r"
            SELECT COALESCE(SUM(total_minutes), 0.0) AS total
            FROM learning_activities
            WHERE user_id = ?1
            ",
        )
        .bind(id_to_i64("user_id", user_id.value())?)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        row.try_get::<f64, _>("total").map_err(ser)
    }
}
