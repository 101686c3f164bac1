//! Lenient decoding of tutor replies.
//!
//! Chat models wrap JSON in code fences, leave `//` comments and trailing
//! commas behind, and sometimes emit full-width parentheses. `repair_json`
//! cleans those up before `serde_json` sees the text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use study_core::model::{Difficulty, Exercise, Grade, QuestionKind};

use crate::error::CollaboratorError;

pub const DEFAULT_ESTIMATED_MINUTES: u32 = 15;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("static regex"));

#[must_use]
pub fn repair_json(raw: &str) -> String {
    let body = strip_fences(raw.trim());
    let body = strip_line_comments(body);
    let body = body.replace('（', "(").replace('）', ")");
    let body = TRAILING_COMMA.replace_all(&body, "$1");
    extract_object(&body).to_string()
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Drop `//` comments that sit outside string literals.
fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn extract_object(text: &str) -> &str {
    match (text.find(['{', '[']), text.rfind(['}', ']'])) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn parse_value(raw: &str) -> Result<Value, CollaboratorError> {
    let repaired = repair_json(raw);
    serde_json::from_str(&repaired).map_err(|e| CollaboratorError::Malformed(e.to_string()))
}

/// Decode a generated exercise list.
///
/// Entries without a question, options or correct option are dropped; the
/// rest are normalized to four options. At most `count` are returned.
///
/// # Errors
///
/// Returns `CollaboratorError::Malformed` when the text is not JSON or no
/// usable exercise remains.
pub fn parse_exercises(
    raw: &str,
    difficulty: Difficulty,
    count: usize,
) -> Result<Vec<Exercise>, CollaboratorError> {
    let value = parse_value(raw)?;
    let entries = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("exercises") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Err(CollaboratorError::Malformed("missing exercises array".into())),
        },
        _ => return Err(CollaboratorError::Malformed("unexpected JSON shape".into())),
    };

    let exercises: Vec<Exercise> = entries
        .iter()
        .filter_map(|entry| exercise_from(entry, difficulty))
        .take(count)
        .collect();

    if exercises.is_empty() {
        return Err(CollaboratorError::Malformed("no valid exercises".into()));
    }
    Ok(exercises)
}

fn exercise_from(entry: &Value, fallback: Difficulty) -> Option<Exercise> {
    let question = entry.get("question")?.as_str()?.trim();
    if question.is_empty() {
        return None;
    }
    let options: Vec<String> = entry
        .get("options")?
        .as_array()?
        .iter()
        .map(|o| match o {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let correct = match entry.get("correct_option")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };

    let kind = match entry.get("type").and_then(Value::as_str) {
        Some(t) if t.to_ascii_lowercase().contains("open") => QuestionKind::OpenEnded,
        _ => QuestionKind::MultipleChoice,
    };
    let difficulty = entry
        .get("difficulty")
        .and_then(Value::as_str)
        .map_or(fallback, Difficulty::parse_lenient);
    let estimated_minutes = entry
        .get("estimated_time_minutes")
        .and_then(Value::as_u64)
        .and_then(|m| u32::try_from(m).ok())
        .unwrap_or(DEFAULT_ESTIMATED_MINUTES);

    Some(
        Exercise {
            question: question.to_string(),
            kind,
            options,
            correct_option: usize::try_from(correct.max(0)).unwrap_or(0),
            explanation: entry
                .get("explanation")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            difficulty,
            estimated_minutes,
        }
        .normalized(),
    )
}

/// Decode an answer evaluation.
///
/// # Errors
///
/// Returns `CollaboratorError::Malformed` when the score is missing or
/// outside `0.0..=1.0`.
pub fn parse_grade(raw: &str) -> Result<Grade, CollaboratorError> {
    let value = parse_value(raw)?;
    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| CollaboratorError::Malformed("missing score".into()))?;
    let text = |field: &str| {
        value
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Grade::new(score, text("feedback"), text("explanation"))
        .map_err(|e| CollaboratorError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_fenced_commented_payload() {
        let raw = "```json\n{\n  \"a\": [1, 2,], // note\n  \"b\": \"x // y（z）\",\n}\n```";
        let value: Value = serde_json::from_str(&repair_json(raw)).unwrap();
        assert_eq!(value["a"], serde_json::json!([1, 2]));
        assert_eq!(value["b"], "x // y(z)");
    }

    #[test]
    fn exercises_are_normalized_and_filtered() {
        let raw = r#"{"exercises": [
            {"question": "Q1", "type": "Single-choice question",
             "options": ["a", "b"], "correct_option": 7, "explanation": "e",
             "difficulty": "Advanced", "estimated_time_minutes": 20},
            {"type": "Single-choice question", "options": ["a"], "correct_option": 0},
            {"question": "Q3", "options": ["a", "b", "c", "d", "e"], "correct_option": "2"},
        ]}"#;

        let exercises = parse_exercises(raw, Difficulty::Beginner, 5).unwrap();
        assert_eq!(exercises.len(), 2);

        assert_eq!(exercises[0].options, vec!["a", "b", "Option 3", "Option 4"]);
        assert_eq!(exercises[0].correct_option, 3);
        assert_eq!(exercises[0].difficulty, Difficulty::Advanced);
        assert_eq!(exercises[0].estimated_minutes, 20);

        assert_eq!(exercises[1].options.len(), 4);
        assert_eq!(exercises[1].correct_option, 2);
        assert_eq!(exercises[1].difficulty, Difficulty::Beginner);
        assert_eq!(exercises[1].estimated_minutes, DEFAULT_ESTIMATED_MINUTES);
    }

    #[test]
    fn count_caps_the_result() {
        let raw = r#"[{"question": "A", "options": [], "correct_option": 0},
                      {"question": "B", "options": [], "correct_option": 0}]"#;
        assert_eq!(parse_exercises(raw, Difficulty::Beginner, 1).unwrap().len(), 1);
    }

    #[test]
    fn nothing_usable_is_malformed() {
        for raw in ["not json", r#"{"exercises": []}"#, r#"{"items": []}"#] {
            assert!(matches!(
                parse_exercises(raw, Difficulty::Beginner, 3),
                Err(CollaboratorError::Malformed(_))
            ));
        }
    }

    #[test]
    fn grade_score_must_be_in_range() {
        let grade = parse_grade(r#"{"score": 0.5, "feedback": "ok"}"#).unwrap();
        assert_eq!(grade.score, 0.5);
        assert_eq!(grade.feedback, "ok");
        assert!(grade.explanation.is_empty());

        assert!(parse_grade(r#"{"score": 1.5, "feedback": "?"}"#).is_err());
        assert!(parse_grade(r#"{"feedback": "no score"}"#).is_err());
    }
}
