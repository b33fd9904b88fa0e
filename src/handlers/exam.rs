// src/handlers/exam.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    config::DEFAULT_QUESTION_WEIGHT,
    error::AppError,
    models::exam::{
        AddQuestionRequest, AssignBankRequest, CreateExamRequest, EnrollStudentsRequest, Exam,
        ExamQuestionDetail, UpdateExamRequest,
    },
    utils::jwt::Claims,
};

const EXAM_COLUMNS: &str = "id, name, subject, level, track, teacher_id, status, starts_at, \
     ends_at, duration_minutes, shuffle_questions, created_at";

const EXAM_STATUSES: [&str; 3] = ["SCHEDULED", "IN_PROGRESS", "ENDED"];

async fn fetch_owned_exam(pool: &PgPool, id: i64, teacher_id: i64) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {EXAM_COLUMNS} FROM exams WHERE id = $1 AND teacher_id = $2"
    ))
    .bind(id)
    .bind(teacher_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
}

/// Creates an exam. Teacher only; status starts as SCHEDULED.
pub async fn create_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if payload.ends_at <= payload.starts_at {
        return Err(AppError::BadRequest(
            "ends_at must be after starts_at".to_string(),
        ));
    }

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let exam = sqlx::query_as::<_, Exam>(&format!(
        r#"
        INSERT INTO exams (name, subject, level, track, teacher_id, starts_at, ends_at,
                           duration_minutes, shuffle_questions)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {EXAM_COLUMNS}
        "#
    ))
    .bind(&payload.name)
    .bind(&payload.subject)
    .bind(&payload.level)
    .bind(&payload.track)
    .bind(teacher_id)
    .bind(payload.starts_at)
    .bind(payload.ends_at)
    .bind(payload.duration_minutes)
    .bind(payload.shuffle_questions)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(exam)))
}

/// Lists the caller's exams, newest first.
pub async fn list_exams(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let exams = sqlx::query_as::<_, Exam>(&format!(
        "SELECT {EXAM_COLUMNS} FROM exams WHERE teacher_id = $1 ORDER BY starts_at DESC"
    ))
    .bind(teacher_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(exams))
}

/// Fetches one exam with its ordered question list. Owner only.
pub async fn get_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    let exam = fetch_owned_exam(&pool, id, teacher_id).await?;

    let questions = sqlx::query_as::<_, ExamQuestionDetail>(
        r#"
        SELECT eq.question_id, eq.weight, eq.position, q.question_type, q.text
        FROM exam_questions eq
        JOIN questions q ON q.id = eq.question_id
        WHERE eq.exam_id = $1
        ORDER BY eq.position
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let total_questions = questions.len();

    Ok(Json(serde_json::json!({
        "exam": exam,
        "questions": questions,
        "total_questions": total_questions,
    })))
}

/// Updates exam fields. Owner only.
pub async fn update_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if let Some(status) = &payload.status {
        if !EXAM_STATUSES.contains(&status.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Unknown exam status '{status}'"
            )));
        }
    }

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    fetch_owned_exam(&pool, id, teacher_id).await?;

    sqlx::query(
        r#"
        UPDATE exams
        SET name = COALESCE($1, name),
            status = COALESCE($2, status),
            starts_at = COALESCE($3, starts_at),
            ends_at = COALESCE($4, ends_at),
            duration_minutes = COALESCE($5, duration_minutes),
            shuffle_questions = COALESCE($6, shuffle_questions)
        WHERE id = $7
        "#,
    )
    .bind(&payload.name)
    .bind(&payload.status)
    .bind(payload.starts_at)
    .bind(payload.ends_at)
    .bind(payload.duration_minutes)
    .bind(payload.shuffle_questions)
    .bind(id)
    .execute(&pool)
    .await?;

    Ok(StatusCode::OK)
}

/// Deletes an exam. Owner only; questions links, attempts and results
/// cascade.
pub async fn delete_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let deleted = sqlx::query("DELETE FROM exams WHERE id = $1 AND teacher_id = $2")
        .bind(id)
        .bind(teacher_id)
        .execute(&pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("Exam not found".to_string()));
    }

    Ok(StatusCode::OK)
}

/// Next free position in the exam's question order, derived from the
/// persisted maximum on every call so concurrent composers stay correct.
async fn next_position<'e, E>(executor: E, exam_id: i64) -> Result<i32, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let max: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position), 0) FROM exam_questions WHERE exam_id = $1",
    )
    .bind(exam_id)
    .fetch_one(executor)
    .await?;

    Ok(max + 1)
}

/// Links one question to an exam, insert-if-absent. Adding a question that
/// is already present is a silent no-op reported in the response.
pub async fn add_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<AddQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    fetch_owned_exam(&pool, id, teacher_id).await?;

    let owned = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM questions WHERE id = $1 AND teacher_id = $2",
    )
    .bind(payload.question_id)
    .bind(teacher_id)
    .fetch_optional(&pool)
    .await?;
    if owned.is_none() {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    let position = next_position(&pool, id).await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO exam_questions (exam_id, question_id, weight, position)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (exam_id, question_id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(payload.question_id)
    .bind(payload.weight.unwrap_or(DEFAULT_QUESTION_WEIGHT))
    .bind(position)
    .execute(&pool)
    .await?
    .rows_affected();

    Ok(Json(serde_json::json!({
        "exam_id": id,
        "question_id": payload.question_id,
        "added": inserted == 1,
    })))
}

#[derive(sqlx::FromRow)]
struct AvailableRow {
    id: i64,
    question_type: String,
}

/// Bank questions matching the exam's (subject, level, track) that are not
/// yet linked to it.
pub async fn available_questions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    let exam = fetch_owned_exam(&pool, id, teacher_id).await?;

    let rows = bank_questions_not_in_exam(
        &pool,
        id,
        teacher_id,
        &exam.subject,
        &exam.level,
        exam.track.as_deref(),
    )
    .await?;

    let choice_count = rows.iter().filter(|r| r.question_type != "ESSAY").count();
    let essay_count = rows.len() - choice_count;
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

    Ok(Json(serde_json::json!({
        "exam_id": id,
        "available": ids.len(),
        "available_question_ids": ids,
        "choice_count": choice_count,
        "essay_count": essay_count,
    })))
}

async fn bank_questions_not_in_exam(
    pool: &PgPool,
    exam_id: i64,
    teacher_id: i64,
    subject: &str,
    level: &str,
    track: Option<&str>,
) -> Result<Vec<AvailableRow>, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT id, question_type FROM questions WHERE teacher_id = ",
    );
    qb.push_bind(teacher_id);
    qb.push(" AND subject = ").push_bind(subject);
    qb.push(" AND level = ").push_bind(level);
    match track {
        Some(t) => {
            qb.push(" AND track = ").push_bind(t);
        }
        None => {
            qb.push(" AND track IS NULL");
        }
    }
    qb.push(" AND id NOT IN (SELECT question_id FROM exam_questions WHERE exam_id = ");
    qb.push_bind(exam_id);
    qb.push(") ORDER BY id");

    Ok(qb.build_query_as().fetch_all(pool).await?)
}

/// Assigns a whole question bank to an exam.
///
/// Every matching bank question not already linked is appended in ascending
/// id order after the persisted maximum position, with the default weight.
/// The bulk insert is ON CONFLICT DO NOTHING, so concurrent duplicate
/// assignments neither fail nor create duplicate links; the reported count
/// covers only rows actually inserted.
pub async fn assign_bank(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<AssignBankRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    fetch_owned_exam(&pool, id, teacher_id).await?;

    let track = payload
        .track
        .as_deref()
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("general"));

    let candidates = bank_questions_not_in_exam(
        &pool,
        id,
        teacher_id,
        &payload.subject,
        &payload.level,
        track,
    )
    .await?;

    if candidates.is_empty() {
        // Either the bank is empty or everything is already linked.
        let bank_size: i64 = {
            let mut qb = QueryBuilder::<Postgres>::new(
                "SELECT COUNT(*) FROM questions WHERE teacher_id = ",
            );
            qb.push_bind(teacher_id);
            qb.push(" AND subject = ").push_bind(&payload.subject);
            qb.push(" AND level = ").push_bind(&payload.level);
            match track {
                Some(t) => {
                    qb.push(" AND track = ").push_bind(t);
                }
                None => {
                    qb.push(" AND track IS NULL");
                }
            }
            qb.build_query_scalar().fetch_one(&pool).await?
        };
        if bank_size == 0 {
            return Err(AppError::NotFound(
                "No questions in that bank".to_string(),
            ));
        }

        return Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({
                "exam_id": id,
                "newly_linked": 0,
            })),
        ));
    }

    let mut position = next_position(&pool, id).await? - 1;

    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO exam_questions (exam_id, question_id, weight, position) ",
    );
    qb.push_values(&candidates, |mut row, candidate| {
        position += 1;
        row.push_bind(id)
            .push_bind(candidate.id)
            .push_bind(DEFAULT_QUESTION_WEIGHT)
            .push_bind(position);
    });
    qb.push(" ON CONFLICT (exam_id, question_id) DO NOTHING");

    let newly_linked = qb.build().execute(&pool).await?.rows_affected();

    tracing::info!(exam_id = id, newly_linked, "bank assigned to exam");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "exam_id": id,
            "bank": {
                "subject": payload.subject,
                "level": payload.level,
                "track": track,
            },
            "newly_linked": newly_linked,
        })),
    ))
}

/// Enrolls students into an exam by creating NOT_STARTED attempts.
/// Already-enrolled students are skipped silently.
pub async fn enroll_students(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<EnrollStudentsRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.student_ids.is_empty() {
        return Err(AppError::BadRequest("No students given".to_string()));
    }

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    fetch_owned_exam(&pool, id, teacher_id).await?;

    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students WHERE id = ANY($1)")
        .bind(&payload.student_ids)
        .fetch_one(&pool)
        .await?;
    if known != payload.student_ids.len() as i64 {
        return Err(AppError::NotFound("Unknown student id".to_string()));
    }

    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO attempts (exam_id, student_id) ");
    qb.push_values(&payload.student_ids, |mut row, student_id| {
        row.push_bind(id).push_bind(student_id);
    });
    qb.push(" ON CONFLICT (exam_id, student_id) DO NOTHING");

    let newly_enrolled = qb.build().execute(&pool).await?.rows_affected();

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "exam_id": id,
            "newly_enrolled": newly_enrolled,
        })),
    ))
}
