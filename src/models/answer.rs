// src/models/answer.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use uuid::Uuid;

use crate::models::question::{Difficulty, QuestionType};

/// Captured answer in its storage shape.
///
/// Serializes to `{"answers": [...]}`, `{"answer": "..."}` or `{}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectedAnswer {
    Many { answers: Vec<String> },
    One { answer: String },
    Blank {},
}

impl SelectedAnswer {
    pub fn is_blank(&self) -> bool {
        matches!(self, SelectedAnswer::Blank {})
    }

    /// Upper-cased display, e.g. `A, C`.
    pub fn display(&self) -> String {
        match self {
            SelectedAnswer::Many { answers } => answers
                .iter()
                .map(|a| a.to_uppercase())
                .collect::<Vec<_>>()
                .join(", "),
            SelectedAnswer::One { answer } => answer.to_uppercase(),
            SelectedAnswer::Blank {} => "Not Attempted".to_string(),
        }
    }
}

/// Represents the 'student_answers' table in the database.
/// Exactly one row per (attempt, question), answered or not.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub id: i64,
    pub attempt_id: Uuid,
    pub question_id: i64,
    pub selected_answer: Json<SelectedAnswer>,
    pub is_correct: bool,

    /// Negative for a penalised wrong answer.
    pub marks_obtained: f64,
    pub is_attempted: bool,
    pub answered_at: Option<DateTime<Utc>>,
}

/// One question of the post-exam review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionReview {
    pub question_id: i64,
    pub position: i32,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub subject: Option<String>,
    pub question_text: String,
    pub options: BTreeMap<String, String>,
    pub selected_answer: SelectedAnswer,
    pub answer_display: String,
    pub correct_answer_display: String,
    pub is_correct: bool,
    pub is_attempted: bool,
    pub marks: i32,
    pub marks_obtained: f64,
    pub explanation: String,
    pub solution_video_url: Option<String>,
}
