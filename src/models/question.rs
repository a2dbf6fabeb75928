// src/models/question.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use url::Url;
use validator::Validate;

use crate::engine::normalize::AnswerKey;

/// Question kinds; each has its own answer shape and comparison rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    FillBlank,
    TrueFalse,
    Numerical,
}

impl QuestionType {
    /// Choice-based questions must reference keys of the options map.
    pub fn is_choice(self) -> bool {
        matches!(
            self,
            QuestionType::SingleChoice | QuestionType::MultipleChoice | QuestionType::TrueFalse
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "difficulty", rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub test_id: i64,
    pub subject_id: Option<i64>,

    /// Joined from `subjects.name`; drives the subject-wise breakdown.
    #[sqlx(default)]
    pub subject_name: Option<String>,

    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub question_text: String,

    /// Awarded for a correct answer.
    pub marks: i32,

    /// Deducted for a wrong answer when the series has negative marking.
    pub negative_marks: f64,

    /// Option key → option text, e.g. `{"a": "...", "b": "..."}`.
    pub options: Json<BTreeMap<String, String>>,

    /// Stored descriptor: `{"answer": ...}` or `{"answers": [...]}`.
    /// Kept loose here; `answer_key()` converts it.
    pub correct_answer: Json<serde_json::Value>,

    pub explanation: String,
    pub solution_video_url: Option<String>,

    pub total_attempts: i64,
    pub correct_attempts: i64,

    /// Ordinal position inside the test.
    pub position: i32,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Question {
    /// Typed answer key, or `None` when the stored descriptor does not fit the type.
    pub fn answer_key(&self) -> Option<AnswerKey> {
        AnswerKey::from_descriptor(self.question_type, &self.correct_answer.0)
    }

    pub fn accuracy_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        let rate = self.correct_attempts as f64 / self.total_attempts as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }

    pub fn to_public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id,
            question_type: self.question_type,
            difficulty: self.difficulty,
            subject: self.subject_name.clone(),
            question_text: self.question_text.clone(),
            marks: self.marks,
            negative_marks: self.negative_marks,
            options: self.options.0.clone(),
            position: self.position,
        }
    }
}

/// DTO for sending a question to a student (excludes the answer key and explanation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub subject: Option<String>,
    pub question_text: String,
    pub marks: i32,
    pub negative_marks: f64,
    pub options: BTreeMap<String, String>,
    pub position: i32,
}

/// DTO for creating a new question.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub question_type: QuestionType,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub subject_id: Option<i64>,
    #[validate(length(min = 1, max = 10000))]
    pub question_text: String,
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_marks")]
    pub marks: i32,
    /// Falls back to the series' negative-marking ratio.
    #[validate(range(min = 0.0, max = 1000.0))]
    pub negative_marks: Option<f64>,
    #[validate(custom(function = validate_options))]
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub correct_answer: serde_json::Value,
    #[validate(length(max = 10000))]
    #[serde(default)]
    pub explanation: String,
    #[validate(length(max = 500), custom(function = validate_url_string))]
    pub solution_video_url: Option<String>,
}

fn default_marks() -> i32 {
    1
}

fn validate_options(options: &BTreeMap<String, String>) -> Result<(), validator::ValidationError> {
    for (key, text) in options {
        if key.trim().is_empty() || key.len() > 10 {
            return Err(validator::ValidationError::new("invalid_option_key"));
        }
        if text.len() > 2000 {
            return Err(validator::ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}

fn validate_url_string(url: &str) -> Result<(), validator::ValidationError> {
    if Url::parse(url).is_err() {
        return Err(validator::ValidationError::new("invalid_url"));
    }
    Ok(())
}

/// Options every true/false question carries.
pub fn true_false_options() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("a".to_string(), "True".to_string()),
        ("b".to_string(), "False".to_string()),
    ])
}

/// Checks that a correct-answer descriptor fits the question type and,
/// for choice questions, only names keys present in `options`.
pub fn validate_answer_key(
    question_type: QuestionType,
    options: &BTreeMap<String, String>,
    descriptor: &serde_json::Value,
) -> Result<AnswerKey, String> {
    let key = AnswerKey::from_descriptor(question_type, descriptor).ok_or_else(|| {
        match question_type {
            QuestionType::MultipleChoice => {
                "correct_answer must be {\"answers\": [..]} with at least one key".to_string()
            }
            _ => "correct_answer must be {\"answer\": ..} with a non-empty value".to_string(),
        }
    })?;

    if question_type.is_choice() {
        if options.len() < 2 {
            return Err("choice questions need at least two options".to_string());
        }
        let known: Vec<String> = options.keys().map(|k| k.trim().to_lowercase()).collect();
        for k in key.choice_keys() {
            if !known.iter().any(|o| o == k) {
                return Err(format!("correct answer key '{}' is not an option", k));
            }
        }
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn abcd() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("a".to_string(), "Alpha".to_string()),
            ("b".to_string(), "Beta".to_string()),
            ("c".to_string(), "Gamma".to_string()),
            ("d".to_string(), "Delta".to_string()),
        ])
    }

    #[test]
    fn question_type_uses_snake_case_on_the_wire() {
        let json = serde_json::to_string(&QuestionType::MultipleChoice).unwrap();
        assert_eq!(json, "\"multiple_choice\"");
        assert!(serde_json::from_str::<QuestionType>("\"essay\"").is_err());
    }

    #[test]
    fn answer_key_must_name_existing_option() {
        let err = validate_answer_key(QuestionType::SingleChoice, &abcd(), &json!({"answer": "e"}))
            .unwrap_err();
        assert!(err.contains("'e'"));

        assert!(
            validate_answer_key(QuestionType::SingleChoice, &abcd(), &json!({"answer": "B"}))
                .is_ok()
        );
    }

    #[test]
    fn answer_key_shape_must_match_type() {
        assert!(
            validate_answer_key(QuestionType::MultipleChoice, &abcd(), &json!({"answer": "a"}))
                .is_err()
        );
        assert!(
            validate_answer_key(
                QuestionType::MultipleChoice,
                &abcd(),
                &json!({"answers": ["a", "c"]})
            )
            .is_ok()
        );
        assert!(
            validate_answer_key(QuestionType::FillBlank, &BTreeMap::new(), &json!({"answer": ""}))
                .is_err()
        );
    }

    #[test]
    fn free_text_ignores_options() {
        assert!(
            validate_answer_key(QuestionType::Numerical, &BTreeMap::new(), &json!({"answer": 42}))
                .is_ok()
        );
    }

    #[test]
    fn create_request_rejects_bad_video_url() {
        let req: CreateQuestionRequest = serde_json::from_value(json!({
            "question_type": "fill_blank",
            "question_text": "Capital of France?",
            "correct_answer": {"answer": "paris"},
            "solution_video_url": "not a url"
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
