// src/handlers/attempt.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;

use crate::{
    error::AppError,
    grading::{self, QuestionKey, QuestionType},
    models::{
        attempt::{
            Answer, Attempt, AttemptQuestionView, AttemptStatus, RecordAnswerRequest,
            SetLockRequest, StartAttemptRequest, StoredAnswerView,
        },
        exam::Exam,
        question::PublicOption,
        result::ExamResult,
    },
    utils::jwt::Claims,
};

async fn fetch_owned_attempt(
    pool: &PgPool,
    attempt_id: i64,
    student_id: i64,
) -> Result<Attempt, AppError> {
    let attempt = sqlx::query_as::<_, Attempt>(
        r#"
        SELECT id, exam_id, student_id, status, is_locked, unlock_code, started_at, ended_at
        FROM attempts
        WHERE id = $1
        "#,
    )
    .bind(attempt_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    if attempt.student_id != student_id {
        return Err(AppError::Forbidden(
            "You do not have access to this attempt".to_string(),
        ));
    }

    Ok(attempt)
}

fn parse_status(attempt: &Attempt) -> Result<AttemptStatus, AppError> {
    AttemptStatus::parse(&attempt.status)
        .ok_or_else(|| AppError::InternalServerError("Corrupt attempt status".to_string()))
}

/// Starts (or resumes) an attempt.
///
/// Guards, in order: ownership, the proctoring lock, forward-only status,
/// the exam's time window. Starting an IN_PROGRESS attempt is idempotent:
/// the start time is untouched and the question list is returned again with
/// previously stored answers pre-filled.
pub async fn start_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = super::resolve_student(&pool, &claims).await?;
    let mut attempt = fetch_owned_attempt(&pool, id, student_id).await?;

    if attempt.is_locked {
        let supplied = payload.unlock_code.as_deref().unwrap_or("");
        let expected = attempt.unlock_code.as_deref().unwrap_or("");
        if supplied.is_empty() || supplied != expected {
            return Err(AppError::Locked(
                "Attempt is locked. Ask the proctor for an unlock code.".to_string(),
            ));
        }

        // The code is single-use: clear it together with the flag.
        sqlx::query("UPDATE attempts SET is_locked = FALSE, unlock_code = NULL WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        attempt.is_locked = false;
        attempt.unlock_code = None;
    }

    let status = parse_status(&attempt)?;
    if status.is_finished() {
        return Err(AppError::InvalidState(format!(
            "Attempt already finished (status: {})",
            attempt.status
        )));
    }

    let exam = sqlx::query_as::<_, Exam>(
        r#"
        SELECT id, name, subject, level, track, teacher_id, status, starts_at, ends_at,
               duration_minutes, shuffle_questions, created_at
        FROM exams
        WHERE id = $1
        "#,
    )
    .bind(attempt.exam_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

    let now = Utc::now();
    if now < exam.starts_at {
        return Err(AppError::OutOfWindow("Exam has not opened yet".to_string()));
    }
    if now > exam.ends_at {
        return Err(AppError::OutOfWindow("Exam is already closed".to_string()));
    }

    if status == AttemptStatus::NotStarted {
        // Echo the stored timestamp, not the in-memory one: Postgres keeps
        // microseconds, so a re-entry would otherwise see a different value.
        let started_at: Option<chrono::DateTime<Utc>> = sqlx::query_scalar(
            "UPDATE attempts SET status = $1, started_at = $2 WHERE id = $3 RETURNING started_at",
        )
        .bind(AttemptStatus::InProgress.as_str())
        .bind(now)
        .bind(id)
        .fetch_one(&pool)
        .await?;
        attempt.status = AttemptStatus::InProgress.as_str().to_string();
        attempt.started_at = started_at;
        tracing::info!(attempt_id = id, exam_id = exam.id, "attempt started");
    }

    let questions = load_attempt_questions(&pool, &attempt).await?;

    Ok(Json(serde_json::json!({
        "attempt": attempt,
        "exam": {
            "id": exam.id,
            "name": exam.name,
            "subject": exam.subject,
            "duration_minutes": exam.duration_minutes,
            "shuffle_questions": exam.shuffle_questions,
            "ends_at": exam.ends_at,
        },
        "total_questions": questions.len(),
        "questions": questions,
    })))
}

#[derive(sqlx::FromRow)]
struct AttemptQuestionRow {
    question_id: i64,
    position: i32,
    weight: i32,
    question_type: String,
    text: String,
    image_url: Option<String>,
}

/// Ordered question list for a taking student: options without correctness
/// flags, prior answers pre-filled so a resumed attempt restores selections.
async fn load_attempt_questions(
    pool: &PgPool,
    attempt: &Attempt,
) -> Result<Vec<AttemptQuestionView>, AppError> {
    let rows = sqlx::query_as::<_, AttemptQuestionRow>(
        r#"
        SELECT eq.question_id, eq.position, eq.weight, q.question_type, q.text, q.image_url
        FROM exam_questions eq
        JOIN questions q ON q.id = eq.question_id
        WHERE eq.exam_id = $1
        ORDER BY eq.position
        "#,
    )
    .bind(attempt.exam_id)
    .fetch_all(pool)
    .await?;

    let question_ids: Vec<i64> = rows.iter().map(|r| r.question_id).collect();

    let options = sqlx::query_as::<_, crate::models::question::QuestionOption>(
        r#"
        SELECT id, question_id, label, text, is_correct
        FROM question_options
        WHERE question_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&question_ids)
    .fetch_all(pool)
    .await?;

    let mut options_by_question: HashMap<i64, Vec<PublicOption>> = HashMap::new();
    for option in options {
        options_by_question
            .entry(option.question_id)
            .or_default()
            .push(option.into());
    }

    let answers = sqlx::query_as::<_, Answer>(
        r#"
        SELECT id, attempt_id, question_id, selected_option_ids, essay_text
        FROM answers
        WHERE attempt_id = $1
        "#,
    )
    .bind(attempt.id)
    .fetch_all(pool)
    .await?;
    let mut answers_by_question: HashMap<i64, Answer> =
        answers.into_iter().map(|a| (a.question_id, a)).collect();

    let views = rows
        .into_iter()
        .map(|row| {
            let answer = answers_by_question.remove(&row.question_id).map(|a| {
                let ids = a.selected_ids();
                StoredAnswerView {
                    answer_id: a.id,
                    selected_option_id: ids.first().copied(),
                    selected_option_ids: (!ids.is_empty()).then_some(ids),
                    essay_text: a.essay_text,
                }
            });
            AttemptQuestionView {
                question_id: row.question_id,
                position: row.position,
                weight: row.weight,
                question_type: row.question_type.clone(),
                text: row.text,
                image_url: row.image_url,
                options: options_by_question.remove(&row.question_id).unwrap_or_default(),
                answer,
            }
        })
        .collect();

    Ok(views)
}

/// Columns written for one stored answer: (selected_option_ids, essay_text).
type AnswerColumns = (Option<String>, Option<String>);

/// Shapes the response payload by the question's type.
///
/// Returns `Ok(None)` for an empty payload, which means "clear the stored
/// answer". A payload carrying fields that do not fit the question type is
/// rejected rather than silently dropped.
fn shape_answer(
    question_type: QuestionType,
    req: &RecordAnswerRequest,
) -> Result<Option<AnswerColumns>, AppError> {
    let has_single = req.selected_option_id.is_some();
    let has_multi = req
        .selected_option_ids
        .as_ref()
        .is_some_and(|ids| !ids.is_empty());
    let has_text = req
        .essay_text
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());

    match question_type {
        QuestionType::SingleChoice => {
            if has_multi || has_text {
                return Err(AppError::BadRequest(
                    "A single-choice question takes one selected_option_id".to_string(),
                ));
            }
            Ok(req
                .selected_option_id
                .map(|opt| (Some(opt.to_string()), None)))
        }
        QuestionType::MultiChoice => {
            if has_single || has_text {
                return Err(AppError::BadRequest(
                    "A multi-choice question takes selected_option_ids".to_string(),
                ));
            }
            Ok(req.selected_option_ids.as_ref().and_then(|ids| {
                if ids.is_empty() {
                    None
                } else {
                    let joined = ids
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(",");
                    Some((Some(joined), None))
                }
            }))
        }
        QuestionType::Essay => {
            if has_single || has_multi {
                return Err(AppError::BadRequest(
                    "An essay question takes essay_text".to_string(),
                ));
            }
            Ok(if has_text {
                Some((None, req.essay_text.clone()))
            } else {
                None
            })
        }
    }
}

/// Records, replaces or clears the stored answer for one question.
///
/// An empty payload deletes the stored answer (explicit clear, not an
/// error); a non-empty one upserts atomically on (attempt_id, question_id).
/// Attempt status is never touched.
pub async fn record_answer(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<RecordAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = super::resolve_student(&pool, &claims).await?;
    let attempt = fetch_owned_attempt(&pool, id, student_id).await?;

    if parse_status(&attempt)? != AttemptStatus::InProgress {
        return Err(AppError::InvalidState(format!(
            "Attempt is not in progress (status: {})",
            attempt.status
        )));
    }

    let question_type = sqlx::query_scalar::<_, String>(
        r#"
        SELECT q.question_type
        FROM exam_questions eq
        JOIN questions q ON q.id = eq.question_id
        WHERE eq.exam_id = $1 AND eq.question_id = $2
        "#,
    )
    .bind(attempt.exam_id)
    .bind(payload.question_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Question is not part of this exam".to_string()))?;

    let question_type = QuestionType::parse(&question_type)
        .ok_or_else(|| AppError::InternalServerError("Corrupt question type".to_string()))?;

    match shape_answer(question_type, &payload)? {
        None => {
            sqlx::query("DELETE FROM answers WHERE attempt_id = $1 AND question_id = $2")
                .bind(id)
                .bind(payload.question_id)
                .execute(&pool)
                .await?;

            Ok(Json(serde_json::json!({
                "deleted": true,
                "question_id": payload.question_id,
            })))
        }
        Some((selected_option_ids, essay_text)) => {
            let answer = sqlx::query_as::<_, Answer>(
                r#"
                INSERT INTO answers (attempt_id, question_id, selected_option_ids, essay_text)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (attempt_id, question_id) DO UPDATE
                SET selected_option_ids = EXCLUDED.selected_option_ids,
                    essay_text = EXCLUDED.essay_text
                RETURNING id, attempt_id, question_id, selected_option_ids, essay_text
                "#,
            )
            .bind(id)
            .bind(payload.question_id)
            .bind(&selected_option_ids)
            .bind(&essay_text)
            .fetch_one(&pool)
            .await?;

            Ok(Json(serde_json::json!({ "answer": answer })))
        }
    }
}

#[derive(sqlx::FromRow)]
struct KeyRow {
    question_id: i64,
    weight: i32,
    question_type: String,
}

/// Finishes an attempt: SUBMITTED, grade, persist the result, and advance
/// to GRADED unless the exam contains essay questions awaiting manual
/// review.
///
/// The IN_PROGRESS -> SUBMITTED transition is a conditional update, so of
/// two concurrent finish calls exactly one grades; the loser sees a
/// wrong-state rejection. Everything runs in one transaction: a failure
/// after the transition rolls the whole finish back.
pub async fn finish_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = super::resolve_student(&pool, &claims).await?;
    let attempt = fetch_owned_attempt(&pool, id, student_id).await?;

    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let won = sqlx::query(
        r#"
        UPDATE attempts
        SET status = 'SUBMITTED', ended_at = $1
        WHERE id = $2 AND status = 'IN_PROGRESS'
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if won == 0 {
        return Err(AppError::InvalidState(format!(
            "Attempt is not in progress (status: {})",
            attempt.status
        )));
    }

    let key_rows = sqlx::query_as::<_, KeyRow>(
        r#"
        SELECT eq.question_id, eq.weight, q.question_type
        FROM exam_questions eq
        JOIN questions q ON q.id = eq.question_id
        WHERE eq.exam_id = $1
        ORDER BY eq.position
        "#,
    )
    .bind(attempt.exam_id)
    .fetch_all(&mut *tx)
    .await?;

    let question_ids: Vec<i64> = key_rows.iter().map(|r| r.question_id).collect();

    #[derive(sqlx::FromRow)]
    struct CorrectRow {
        question_id: i64,
        id: i64,
    }
    let correct_rows = sqlx::query_as::<_, CorrectRow>(
        "SELECT question_id, id FROM question_options WHERE question_id = ANY($1) AND is_correct",
    )
    .bind(&question_ids)
    .fetch_all(&mut *tx)
    .await?;

    let mut correct_by_question: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in correct_rows {
        correct_by_question
            .entry(row.question_id)
            .or_default()
            .push(row.id);
    }

    let answers = sqlx::query_as::<_, Answer>(
        r#"
        SELECT id, attempt_id, question_id, selected_option_ids, essay_text
        FROM answers
        WHERE attempt_id = $1
        "#,
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let answered_count = answers.len();
    let selections: HashMap<i64, Vec<i64>> = answers
        .iter()
        .filter(|a| a.selected_option_ids.is_some())
        .map(|a| (a.question_id, a.selected_ids()))
        .collect();

    let keys = key_rows
        .into_iter()
        .map(|row| {
            let question_type = QuestionType::parse(&row.question_type)
                .ok_or_else(|| AppError::InternalServerError("Corrupt question type".to_string()))?;
            Ok(QuestionKey {
                question_id: row.question_id,
                question_type,
                weight: row.weight,
                correct_option_ids: correct_by_question
                    .remove(&row.question_id)
                    .unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let outcome = grading::grade(&keys, &selections);

    let result = sqlx::query_as::<_, ExamResult>(
        r#"
        INSERT INTO results (attempt_id, final_score, submitted_at)
        VALUES ($1, $2, $3)
        RETURNING id, attempt_id, final_score, submitted_at
        "#,
    )
    .bind(id)
    .bind(outcome.final_score)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let final_status = if outcome.needs_review {
        AttemptStatus::Submitted
    } else {
        sqlx::query("UPDATE attempts SET status = 'GRADED' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        AttemptStatus::Graded
    };

    tx.commit().await?;

    tracing::info!(
        attempt_id = id,
        exam_id = attempt.exam_id,
        final_score = outcome.final_score,
        needs_review = outcome.needs_review,
        "attempt finished"
    );

    Ok(Json(serde_json::json!({
        "result_id": result.id,
        "final_score": result.final_score,
        "status": if outcome.needs_review { "awaiting essay review" } else { "fully graded" },
        "attempt_status": final_status.as_str(),
        "total_questions": keys.len(),
        "answered_questions": answered_count,
    })))
}

#[derive(sqlx::FromRow, serde::Serialize)]
struct MyExamRow {
    attempt_id: i64,
    status: String,
    is_locked: bool,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
    exam_id: i64,
    name: String,
    subject: String,
    exam_status: String,
    starts_at: chrono::DateTime<chrono::Utc>,
    ends_at: chrono::DateTime<chrono::Utc>,
    duration_minutes: i32,
    final_score: Option<f64>,
}

/// Lists the caller's attempts for upcoming and running exams, newest
/// first, with the graded score when one exists.
pub async fn my_exams(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = super::resolve_student(&pool, &claims).await?;

    let rows = sqlx::query_as::<_, MyExamRow>(
        r#"
        SELECT a.id AS attempt_id, a.status, a.is_locked, a.started_at, a.ended_at,
               e.id AS exam_id, e.name, e.subject, e.status AS exam_status,
               e.starts_at, e.ends_at, e.duration_minutes,
               r.final_score
        FROM attempts a
        JOIN exams e ON e.id = a.exam_id
        LEFT JOIN results r ON r.attempt_id = a.id
        WHERE a.student_id = $1 AND e.status IN ('SCHEDULED', 'IN_PROGRESS')
        ORDER BY e.starts_at DESC
        "#,
    )
    .bind(student_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(serde_json::json!({ "exams": rows })))
}

/// Teacher-side proctoring lock. Locking stores a fresh one-time unlock
/// code; unlocking clears both. Finished attempts cannot be locked.
pub async fn set_lock(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<SetLockRequest>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let attempt = sqlx::query_as::<_, Attempt>(
        r#"
        SELECT a.id, a.exam_id, a.student_id, a.status, a.is_locked, a.unlock_code,
               a.started_at, a.ended_at
        FROM attempts a
        JOIN exams e ON e.id = a.exam_id
        WHERE a.id = $1 AND e.teacher_id = $2
        "#,
    )
    .bind(id)
    .bind(teacher_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    if parse_status(&attempt)?.is_finished() {
        return Err(AppError::InvalidState(
            "Attempt already finished".to_string(),
        ));
    }

    if payload.locked && payload.unlock_code.as_deref().unwrap_or("").is_empty() {
        return Err(AppError::BadRequest(
            "Locking requires an unlock_code".to_string(),
        ));
    }

    let unlock_code = payload.locked.then(|| payload.unlock_code.clone()).flatten();

    sqlx::query("UPDATE attempts SET is_locked = $1, unlock_code = $2 WHERE id = $3")
        .bind(payload.locked)
        .bind(&unlock_code)
        .bind(id)
        .execute(&pool)
        .await?;

    tracing::info!(attempt_id = id, locked = payload.locked, "attempt lock updated");

    Ok(Json(serde_json::json!({
        "attempt_id": id,
        "is_locked": payload.locked,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(
        single: Option<i64>,
        multi: Option<Vec<i64>>,
        text: Option<&str>,
    ) -> RecordAnswerRequest {
        RecordAnswerRequest {
            question_id: 1,
            selected_option_id: single,
            selected_option_ids: multi,
            essay_text: text.map(|t| t.to_string()),
        }
    }

    #[test]
    fn single_choice_payload_stores_one_id() {
        let shaped = shape_answer(QuestionType::SingleChoice, &req(Some(7), None, None)).unwrap();
        assert_eq!(shaped, Some((Some("7".to_string()), None)));
    }

    #[test]
    fn multi_choice_payload_joins_ids() {
        let shaped =
            shape_answer(QuestionType::MultiChoice, &req(None, Some(vec![3, 1]), None)).unwrap();
        assert_eq!(shaped, Some((Some("3,1".to_string()), None)));
    }

    #[test]
    fn empty_payload_means_clear() {
        assert_eq!(
            shape_answer(QuestionType::SingleChoice, &req(None, None, None)).unwrap(),
            None
        );
        assert_eq!(
            shape_answer(QuestionType::MultiChoice, &req(None, Some(vec![]), None)).unwrap(),
            None
        );
        assert_eq!(
            shape_answer(QuestionType::Essay, &req(None, None, Some("  "))).unwrap(),
            None
        );
    }

    #[test]
    fn essay_payload_stores_text() {
        let shaped = shape_answer(QuestionType::Essay, &req(None, None, Some("my answer"))).unwrap();
        assert_eq!(shaped, Some((None, Some("my answer".to_string()))));
    }

    #[test]
    fn mismatched_payload_shape_is_rejected() {
        assert!(shape_answer(QuestionType::SingleChoice, &req(None, Some(vec![1]), None)).is_err());
        assert!(shape_answer(QuestionType::SingleChoice, &req(None, None, Some("x"))).is_err());
        assert!(shape_answer(QuestionType::MultiChoice, &req(Some(1), None, None)).is_err());
        assert!(shape_answer(QuestionType::Essay, &req(Some(1), None, None)).is_err());
    }

    #[test]
    fn attempt_status_parses_and_round_trips() {
        for s in ["NOT_STARTED", "IN_PROGRESS", "SUBMITTED", "GRADED"] {
            assert_eq!(AttemptStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(AttemptStatus::parse("PAUSED").is_none());
        assert!(AttemptStatus::parse("SUBMITTED").unwrap().is_finished());
        assert!(!AttemptStatus::parse("IN_PROGRESS").unwrap().is_finished());
    }
}
