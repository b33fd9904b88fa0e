// src/models/attempt.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::question::PublicOption;

/// Attempt lifecycle states, persisted as TEXT in `attempts.status`.
/// Transitions are monotonic forward; the lock flag is orthogonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_STARTED" => Some(Self::NotStarted),
            "IN_PROGRESS" => Some(Self::InProgress),
            "SUBMITTED" => Some(Self::Submitted),
            "GRADED" => Some(Self::Graded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Submitted => "SUBMITTED",
            Self::Graded => "GRADED",
        }
    }

    /// Finished attempts accept no further student-side transitions.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Submitted | Self::Graded)
    }
}

/// Represents the 'attempts' table: one student's run through one exam.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attempt {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub status: String,
    pub is_locked: bool,
    /// One-time secret; never serialized to students.
    #[serde(skip)]
    pub unlock_code: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'answers' table: one stored response per
/// (attempt, question) pair. Selected option ids are comma-joined.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Answer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub selected_option_ids: Option<String>,
    pub essay_text: Option<String>,
}

impl Answer {
    /// Parses the comma-joined option id list. Malformed fragments are
    /// skipped rather than failing the whole attempt.
    pub fn selected_ids(&self) -> Vec<i64> {
        self.selected_option_ids
            .as_deref()
            .map(|s| {
                s.split(',')
                    .filter_map(|part| part.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// DTO for starting an attempt.
#[derive(Debug, Deserialize)]
pub struct StartAttemptRequest {
    pub unlock_code: Option<String>,
}

/// DTO for recording (or clearing) an answer. Exactly one of the three
/// response fields applies, chosen by the question's type.
#[derive(Debug, Deserialize)]
pub struct RecordAnswerRequest {
    pub question_id: i64,
    pub selected_option_id: Option<i64>,
    pub selected_option_ids: Option<Vec<i64>>,
    pub essay_text: Option<String>,
}

/// DTO for the teacher-side proctoring lock.
#[derive(Debug, Deserialize)]
pub struct SetLockRequest {
    pub locked: bool,
    pub unlock_code: Option<String>,
}

/// Previously stored response echoed back when an attempt resumes.
#[derive(Debug, Serialize)]
pub struct StoredAnswerView {
    pub answer_id: i64,
    pub selected_option_id: Option<i64>,
    pub selected_option_ids: Option<Vec<i64>>,
    pub essay_text: Option<String>,
}

/// One exam question as presented to the taking student.
#[derive(Debug, Serialize)]
pub struct AttemptQuestionView {
    pub question_id: i64,
    pub position: i32,
    pub weight: i32,
    pub question_type: String,
    pub text: String,
    pub image_url: Option<String>,
    pub options: Vec<PublicOption>,
    pub answer: Option<StoredAnswerView>,
}
