use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use study_core::model::{
    Activity, AssessmentRecord, Difficulty, LearningPath, PathId, TopicDefinition, UserId,
    ViewedResources,
};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn path_id_from_i64(v: i64) -> Result<PathId, StorageError> {
    Ok(PathId::new(i64_to_u64("path_id", v)?))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_json<T: DeserializeOwned>(
    field: &'static str,
    raw: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn difficulty_to_str(d: Difficulty) -> &'static str {
    d.as_str()
}

pub(crate) fn parse_difficulty(s: &str) -> Result<Difficulty, StorageError> {
    match s {
        "Beginner" => Ok(Difficulty::Beginner),
        "Intermediate" => Ok(Difficulty::Intermediate),
        "Advanced" => Ok(Difficulty::Advanced),
        _ => Err(StorageError::Serialization(format!(
            "invalid difficulty: {s}"
        ))),
    }
}

pub(crate) fn map_path_row(row: &SqliteRow) -> Result<LearningPath, StorageError> {
    let content: String = row.try_get("content").map_err(ser)?;
    let topics: Vec<TopicDefinition> = from_json("content", &content)?;
    let difficulty: String = row.try_get("difficulty_level").map_err(ser)?;

    LearningPath::from_persisted(
        row.try_get("subject").map_err(ser)?,
        parse_difficulty(&difficulty)?,
        topics,
        row.try_get("progress").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_activity_row(row: &SqliteRow) -> Result<Activity, StorageError> {
    let viewed_json: String = row.try_get("viewed_json").map_err(ser)?;
    let viewed: ViewedResources = from_json("viewed_json", &viewed_json)?;
    let activity_date: DateTime<Utc> = row.try_get("activity_date").map_err(ser)?;

    Activity::from_persisted(
        viewed,
        row.try_get("total_minutes").map_err(ser)?,
        activity_date,
    )
    .map_err(ser)
}

pub(crate) fn map_assessment_row(row: &SqliteRow) -> Result<AssessmentRecord, StorageError> {
    let questions: String = row.try_get("questions_json").map_err(ser)?;
    let answers: String = row.try_get("answers_json").map_err(ser)?;
    let scores: String = row.try_get("scores_json").map_err(ser)?;
    let feedback: String = row.try_get("feedback_json").map_err(ser)?;
    let explanations: String = row.try_get("explanations_json").map_err(ser)?;

    AssessmentRecord::from_persisted(
        from_json("questions_json", &questions)?,
        from_json("answers_json", &answers)?,
        from_json("scores_json", &scores)?,
        from_json("feedback_json", &feedback)?,
        from_json("explanations_json", &explanations)?,
        row.try_get::<i64, _>("submitted").map_err(ser)? != 0,
        row.try_get("taken_at").map_err(ser)?,
    )
    .map_err(ser)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_round_trips_through_column_text() {
        for d in [
            Difficulty::Beginner,
            Difficulty::Intermediate,
            Difficulty::Advanced,
        ] {
            assert_eq!(parse_difficulty(difficulty_to_str(d)).unwrap(), d);
        }
        assert!(parse_difficulty("Expert").is_err());
    }

    #[test]
    fn negative_ids_are_rejected() {
        assert!(path_id_from_i64(-1).is_err());
        assert!(id_to_i64("user_id", u64::MAX).is_err());
    }
}
