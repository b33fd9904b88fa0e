// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    /// 'SINGLE_CHOICE', 'MULTI_CHOICE' or 'ESSAY'.
    pub question_type: String,

    /// The text content of the question (sanitized rich text).
    pub text: String,

    /// Optional illustration attached to the question.
    pub image_url: Option<String>,

    pub subject: String,
    pub level: String,
    /// Study track; NULL means the question belongs to the general bank.
    pub track: Option<String>,

    /// Explanation shown after grading.
    pub explanation: Option<String>,

    pub teacher_id: i64,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'question_options' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub question_id: i64,
    pub label: String,
    pub text: String,
    pub is_correct: bool,
}

/// Option DTO sent to exam takers: the correctness flag stays server-side.
#[derive(Debug, Clone, Serialize)]
pub struct PublicOption {
    pub id: i64,
    pub label: String,
    pub text: String,
}

impl From<QuestionOption> for PublicOption {
    fn from(o: QuestionOption) -> Self {
        Self {
            id: o.id,
            label: o.label,
            text: o.text,
        }
    }
}

/// A question together with its full option set (teacher view).
#[derive(Debug, Serialize)]
pub struct QuestionWithOptions {
    #[serde(flatten)]
    pub question: Question,
    pub options: Vec<QuestionOption>,
}

/// DTO for one option inside a create/update request.
#[derive(Debug, Deserialize, Validate)]
pub struct OptionInput {
    #[validate(length(min = 1, max = 10))]
    pub label: String,
    #[validate(length(min = 1, max = 500))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// DTO for creating a new question with its option set.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub question_type: String,
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    pub image_url: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    #[validate(length(min = 1, max = 20))]
    pub level: String,
    pub track: Option<String>,
    #[validate(length(max = 2000))]
    pub explanation: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub options: Vec<OptionInput>,
}

/// DTO for updating a question. Absent fields are left untouched; a present
/// option set replaces the stored one atomically.
///
/// The nullable fields are tri-state: absent keeps the stored value, while
/// a present key overwrites it, including with NULL ("general" for the
/// track, an explicit null for image or explanation).
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub image_url: Option<Option<String>>,
    #[validate(length(min = 1, max = 100))]
    pub subject: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub track: Option<Option<String>>,
    #[validate(length(max = 2000))]
    #[serde(default, deserialize_with = "present_or_null")]
    pub explanation: Option<Option<String>>,
    #[validate(nested)]
    pub options: Option<Vec<OptionInput>>,
}

/// Maps a present-but-null JSON field to `Some(None)`, so absent and
/// explicitly-null stay distinguishable after deserialization.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

/// Query-string filters for question listing.
#[derive(Debug, Deserialize)]
pub struct QuestionFilter {
    pub subject: Option<String>,
    pub level: Option<String>,
    pub track: Option<String>,
    pub question_type: Option<String>,
}

/// One browsable bank group: the caller's questions sharing
/// (subject, level, track).
#[derive(Debug, Serialize)]
pub struct BankGroup {
    pub subject: String,
    pub level: String,
    pub track: Option<String>,
    pub question_ids: Vec<i64>,
    pub total: usize,
    pub choice_count: usize,
    pub essay_count: usize,
}
