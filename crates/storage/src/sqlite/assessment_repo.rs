use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use study_core::model::{AssessmentKey, AssessmentRecord, TopicName, UserId, Versioned};
use tracing::debug;

use super::SqliteRepository;
use super::mapping::{conn, id_to_i64, map_assessment_row, ser, to_json, user_id_from_i64};
use crate::repository::{AssessmentRepository, StorageError};
use crate::versioned::{InsertOutcome, VersionedStore, WriteOutcome};

fn versioned_record(row: &SqliteRow) -> Result<Versioned<AssessmentRecord>, StorageError> {
    let version: i64 = row.try_get("version").map_err(ser)?;
    Ok(Versioned::new(map_assessment_row(row)?, version))
}

struct Columns {
    questions: String,
    answers: String,
    scores: String,
    feedback: String,
    explanations: String,
}

impl Columns {
    fn encode(record: &AssessmentRecord) -> Result<Self, StorageError> {
        Ok(Self {
            questions: to_json(record.questions())?,
            answers: to_json(record.answers())?,
            scores: to_json(record.scores())?,
            feedback: to_json(record.feedback())?,
            explanations: to_json(record.explanations())?,
        })
    }
}

#[async_trait::async_trait]
impl VersionedStore<AssessmentKey, AssessmentRecord> for SqliteRepository {
    async fn read(
        &self,
        key: &AssessmentKey,
    ) -> Result<Option<Versioned<AssessmentRecord>>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT questions_json, answers_json, scores_json, feedback_json, explanations_json,
                   submitted, version, taken_at
            FROM assessments
            WHERE user_id = ?1 AND subject = ?2 AND topic_name = ?3
            ",
        )
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(key.subject.as_str())
        .bind(key.topic.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(versioned_record).transpose()
    }

    async fn try_write(
        &self,
        key: &AssessmentKey,
        payload: &AssessmentRecord,
        expected_version: i64,
    ) -> Result<WriteOutcome, StorageError> {
        let cols = Columns::encode(payload)?;
        let res = sqlx::query(
            r"
            UPDATE assessments
            SET questions_json = ?1,
                answers_json = ?2,
                scores_json = ?3,
                feedback_json = ?4,
                explanations_json = ?5,
                submitted = ?6,
                taken_at = ?7,
                version = version + 1
            WHERE user_id = ?8 AND subject = ?9 AND topic_name = ?10 AND version = ?11
            ",
        )
        .bind(cols.questions)
        .bind(cols.answers)
        .bind(cols.scores)
        .bind(cols.feedback)
        .bind(cols.explanations)
        .bind(i64::from(payload.submitted()))
        .bind(payload.taken_at())
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(key.subject.as_str())
        .bind(key.topic.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 1 {
            debug!(%key, version = expected_version + 1, "assessment replaced");
            Ok(WriteOutcome::Applied {
                version: expected_version + 1,
            })
        } else {
            Ok(WriteOutcome::Stale)
        }
    }

    async fn insert_if_absent(
        &self,
        key: &AssessmentKey,
        payload: &AssessmentRecord,
    ) -> Result<InsertOutcome, StorageError> {
        let cols = Columns::encode(payload)?;
        let res = sqlx::query(
            r"
            INSERT INTO assessments
                (user_id, subject, topic_name, questions_json, answers_json, scores_json,
                 feedback_json, explanations_json, submitted, version, taken_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)
            ON CONFLICT(user_id, subject, topic_name) DO NOTHING
            ",
        )
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(key.subject.as_str())
        .bind(key.topic.as_str())
        .bind(cols.questions)
        .bind(cols.answers)
        .bind(cols.scores)
        .bind(cols.feedback)
        .bind(cols.explanations)
        .bind(i64::from(payload.submitted()))
        .bind(payload.taken_at())
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
impl AssessmentRepository for SqliteRepository {
    async fn delete_all(&self, key: &AssessmentKey) -> Result<u64, StorageError> {
        let res = sqlx::query(
            r"
            DELETE FROM assessments
            WHERE user_id = ?1 AND subject = ?2 AND topic_name = ?3
            ",
        )
        .bind(id_to_i64("user_id", key.user_id.value())?)
        .bind(key.subject.as_str())
        .bind(key.topic.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(res.rows_affected())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(AssessmentKey, Versioned<AssessmentRecord>)>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT user_id, subject, topic_name, questions_json, answers_json, scores_json,
                   feedback_json, explanations_json, submitted, version, taken_at
            FROM assessments
            WHERE user_id = ?1
            ORDER BY subject ASC, topic_name ASC
            ",
        )
        .bind(id_to_i64("user_id", user_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key = AssessmentKey::new(
                user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
                row.try_get::<String, _>("subject").map_err(ser)?,
                TopicName::new(row.try_get::<String, _>("topic_name").map_err(ser)?),
            );
            out.push((key, versioned_record(&row)?));
        }
        Ok(out)
    }
}
