// src/models/result.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'results' table: the persisted outcome of grading one
/// attempt. Created once at finish time; re-saved at most once, when a
/// teacher completes essay grading.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: i64,
    pub attempt_id: i64,
    /// 0-100 scale.
    pub final_score: f64,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for the teacher submitting the combined score after manually
/// grading essay answers.
#[derive(Debug, Deserialize, Validate)]
pub struct EssayScoreRequest {
    #[validate(range(min = 0.0, max = 100.0))]
    pub final_score: f64,
}

/// Per-student row inside a completed exam report.
#[derive(Debug, Serialize, FromRow)]
pub struct ParticipantResult {
    pub attempt_id: i64,
    pub student_id: i64,
    pub full_name: String,
    pub class_name: Option<String>,
    pub status: String,
    pub final_score: Option<f64>,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Completed exam report for the owning teacher.
#[derive(Debug, Serialize)]
pub struct CompletedExamReport {
    pub exam_id: i64,
    pub name: String,
    pub subject: String,
    pub level: String,
    pub track: Option<String>,
    pub ends_at: chrono::DateTime<chrono::Utc>,
    pub total_participants: i64,
    pub total_finished: i64,
    pub total_questions: i64,
    pub participants: Vec<ParticipantResult>,
}
