// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub level: String,
    pub track: Option<String>,
    pub teacher_id: i64,

    /// 'SCHEDULED', 'IN_PROGRESS' or 'ENDED'.
    pub status: String,

    pub starts_at: chrono::DateTime<chrono::Utc>,
    pub ends_at: chrono::DateTime<chrono::Utc>,
    pub duration_minutes: i32,
    pub shuffle_questions: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'exam_questions' link table: an ordered, weighted
/// question entry inside one exam.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExamQuestion {
    pub id: i64,
    pub exam_id: i64,
    pub question_id: i64,
    pub weight: i32,
    pub position: i32,
}

/// DTO for creating a new exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    #[validate(length(min = 1, max = 20))]
    pub level: String,
    pub track: Option<String>,
    pub starts_at: chrono::DateTime<chrono::Utc>,
    pub ends_at: chrono::DateTime<chrono::Utc>,
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: i32,
    #[serde(default)]
    pub shuffle_questions: bool,
}

/// DTO for updating an exam. Absent fields are left untouched.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    /// 'SCHEDULED', 'IN_PROGRESS' or 'ENDED'.
    pub status: Option<String>,
    pub starts_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ends_at: Option<chrono::DateTime<chrono::Utc>>,
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: Option<i32>,
    pub shuffle_questions: Option<bool>,
}

/// DTO for linking one question to an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct AddQuestionRequest {
    pub question_id: i64,
    #[validate(range(min = 0, max = 1000))]
    pub weight: Option<i32>,
}

/// DTO for assigning a whole question bank to an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct AssignBankRequest {
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    #[validate(length(min = 1, max = 20))]
    pub level: String,
    pub track: Option<String>,
}

/// DTO for enrolling students into an exam.
#[derive(Debug, Deserialize)]
pub struct EnrollStudentsRequest {
    pub student_ids: Vec<i64>,
}

/// Exam question row joined with the underlying question, for the
/// teacher-facing exam detail view.
#[derive(Debug, Serialize, FromRow)]
pub struct ExamQuestionDetail {
    pub question_id: i64,
    pub weight: i32,
    pub position: i32,
    pub question_type: String,
    pub text: String,
}
