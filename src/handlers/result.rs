// src/handlers/result.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        attempt::AttemptStatus,
        exam::Exam,
        result::{CompletedExamReport, EssayScoreRequest, ParticipantResult},
    },
    utils::jwt::Claims,
};

/// Reports the caller's ENDED exams with per-student outcomes.
pub async fn completed_exams(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let exams = sqlx::query_as::<_, Exam>(
        r#"
        SELECT id, name, subject, level, track, teacher_id, status, starts_at, ends_at,
               duration_minutes, shuffle_questions, created_at
        FROM exams
        WHERE teacher_id = $1 AND status = 'ENDED'
        ORDER BY ends_at DESC
        "#,
    )
    .bind(teacher_id)
    .fetch_all(&pool)
    .await?;

    let mut reports = Vec::with_capacity(exams.len());

    for exam in exams {
        let participants = sqlx::query_as::<_, ParticipantResult>(
            r#"
            SELECT a.id AS attempt_id, s.id AS student_id, s.full_name, s.class_name,
                   a.status, r.final_score, r.submitted_at
            FROM attempts a
            JOIN students s ON s.id = a.student_id
            LEFT JOIN results r ON r.attempt_id = a.id
            WHERE a.exam_id = $1
            ORDER BY s.full_name
            "#,
        )
        .bind(exam.id)
        .fetch_all(&pool)
        .await?;

        let total_questions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM exam_questions WHERE exam_id = $1")
                .bind(exam.id)
                .fetch_one(&pool)
                .await?;

        let total_participants = participants.len() as i64;
        let total_finished = participants
            .iter()
            .filter(|p| {
                AttemptStatus::parse(&p.status).is_some_and(|s| s.is_finished())
            })
            .count() as i64;

        reports.push(CompletedExamReport {
            exam_id: exam.id,
            name: exam.name,
            subject: exam.subject,
            level: exam.level,
            track: exam.track,
            ends_at: exam.ends_at,
            total_participants,
            total_finished,
            total_questions,
            participants,
        });
    }

    let total = reports.len();

    Ok(Json(serde_json::json!({
        "total_completed_exams": total,
        "exams": reports,
    })))
}

/// Records the combined score after manual essay grading.
///
/// Allowed exactly once per attempt, while it sits at SUBMITTED awaiting
/// review: the existing Result row is re-saved with the teacher's score and
/// the attempt advances to GRADED. A second grading call is rejected as
/// wrong-state.
pub async fn submit_essay_score(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Json(payload): Json<EssayScoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let status = sqlx::query_scalar::<_, String>(
        r#"
        SELECT a.status
        FROM attempts a
        JOIN exams e ON e.id = a.exam_id
        WHERE a.id = $1 AND e.teacher_id = $2
        "#,
    )
    .bind(attempt_id)
    .bind(teacher_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    let mut tx = pool.begin().await?;

    // Only the reviewer of a SUBMITTED attempt may finalize; the
    // conditional update keeps double grading out under concurrency.
    let advanced = sqlx::query(
        "UPDATE attempts SET status = 'GRADED' WHERE id = $1 AND status = 'SUBMITTED'",
    )
    .bind(attempt_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if advanced == 0 {
        return Err(AppError::InvalidState(format!(
            "Attempt is not awaiting review (status: {status})"
        )));
    }

    let updated = sqlx::query("UPDATE results SET final_score = $1 WHERE attempt_id = $2")
        .bind(payload.final_score)
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound("Result not found".to_string()));
    }

    tx.commit().await?;

    tracing::info!(attempt_id, final_score = payload.final_score, "essay review completed");

    Ok(Json(serde_json::json!({
        "attempt_id": attempt_id,
        "final_score": payload.final_score,
        "status": "fully graded",
    })))
}
