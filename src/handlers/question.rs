// src/handlers/question.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::AppError,
    grading::QuestionType,
    models::question::{
        BankGroup, CreateQuestionRequest, OptionInput, Question, QuestionFilter, QuestionOption,
        QuestionWithOptions, UpdateQuestionRequest,
    },
    utils::{html::clean_html, jwt::Claims},
};

const QUESTION_COLUMNS: &str = "id, question_type, text, image_url, subject, level, track, \
     explanation, teacher_id, created_at";

/// Checks that an option set is consistent with the question type:
/// choice questions need at least one option, single-choice exactly one
/// correct option, multi-choice one or more. Essay questions take none.
fn validate_option_set(
    question_type: QuestionType,
    options: &[OptionInput],
) -> Result<(), AppError> {
    match question_type {
        QuestionType::Essay => {
            if !options.is_empty() {
                return Err(AppError::BadRequest(
                    "Essay questions do not take answer options".to_string(),
                ));
            }
        }
        QuestionType::SingleChoice | QuestionType::MultiChoice => {
            if options.is_empty() {
                return Err(AppError::BadRequest(
                    "Choice questions need at least one option".to_string(),
                ));
            }
            let correct = options.iter().filter(|o| o.is_correct).count();
            match question_type {
                QuestionType::SingleChoice if correct != 1 => {
                    return Err(AppError::BadRequest(
                        "Single-choice questions need exactly one correct option".to_string(),
                    ));
                }
                QuestionType::MultiChoice if correct == 0 => {
                    return Err(AppError::BadRequest(
                        "Multi-choice questions need at least one correct option".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Normalizes the track field: empty or "general" means the general bank
/// and is stored as NULL.
fn normalize_track(track: Option<String>) -> Option<String> {
    track.filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("general"))
}

/// Creates a question together with its option set in one transaction.
/// Teacher only; the caller becomes the owner.
pub async fn create_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let question_type = QuestionType::parse(&payload.question_type).ok_or_else(|| {
        AppError::BadRequest(format!("Unknown question type '{}'", payload.question_type))
    })?;
    validate_option_set(question_type, &payload.options)?;

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    let track = normalize_track(payload.track);

    let mut tx = pool.begin().await?;

    let question_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO questions (question_type, text, image_url, subject, level, track, explanation, teacher_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(question_type.as_str())
    .bind(clean_html(&payload.text))
    .bind(&payload.image_url)
    .bind(&payload.subject)
    .bind(&payload.level)
    .bind(&track)
    .bind(payload.explanation.as_deref().map(clean_html))
    .bind(teacher_id)
    .fetch_one(&mut *tx)
    .await?;

    insert_options(&mut tx, question_id, &payload.options).await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": question_id })),
    ))
}

async fn insert_options(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    question_id: i64,
    options: &[OptionInput],
) -> Result<(), AppError> {
    if options.is_empty() {
        return Ok(());
    }

    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO question_options (question_id, label, text, is_correct) ",
    );
    qb.push_values(options, |mut row, opt| {
        row.push_bind(question_id)
            .push_bind(&opt.label)
            .push_bind(clean_html(&opt.text))
            .push_bind(opt.is_correct);
    });
    qb.build().execute(&mut **tx).await?;

    Ok(())
}

/// Lists the caller's questions, optionally filtered by subject, level,
/// track and type. Options are attached to each row.
pub async fn list_questions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<QuestionFilter>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {QUESTION_COLUMNS} FROM questions WHERE teacher_id = "
    ));
    qb.push_bind(teacher_id);

    if let Some(subject) = &filter.subject {
        qb.push(" AND subject = ").push_bind(subject);
    }
    if let Some(level) = &filter.level {
        qb.push(" AND level = ").push_bind(level);
    }
    if let Some(track) = &filter.track {
        qb.push(" AND track = ").push_bind(track);
    }
    if let Some(question_type) = &filter.question_type {
        qb.push(" AND question_type = ").push_bind(question_type);
    }
    qb.push(" ORDER BY created_at DESC");

    let questions: Vec<Question> = qb.build_query_as().fetch_all(&pool).await?;

    let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
    let mut options_by_question = load_options(&pool, &ids).await?;

    let result: Vec<QuestionWithOptions> = questions
        .into_iter()
        .map(|q| {
            let options = options_by_question.remove(&q.id).unwrap_or_default();
            QuestionWithOptions {
                question: q,
                options,
            }
        })
        .collect();

    Ok(Json(result))
}

async fn load_options(
    pool: &PgPool,
    question_ids: &[i64],
) -> Result<HashMap<i64, Vec<QuestionOption>>, AppError> {
    if question_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let options = sqlx::query_as::<_, QuestionOption>(
        r#"
        SELECT id, question_id, label, text, is_correct
        FROM question_options
        WHERE question_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(question_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
    for option in options {
        grouped.entry(option.question_id).or_default().push(option);
    }
    Ok(grouped)
}

/// Fetches a single question with its options. Owner only.
pub async fn get_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let question = fetch_owned_question(&pool, id, teacher_id).await?;
    let mut options = load_options(&pool, &[id]).await?;

    Ok(Json(QuestionWithOptions {
        question,
        options: options.remove(&id).unwrap_or_default(),
    }))
}

async fn fetch_owned_question(
    pool: &PgPool,
    id: i64,
    teacher_id: i64,
) -> Result<Question, AppError> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1 AND teacher_id = $2"
    ))
    .bind(id)
    .bind(teacher_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Question not found".to_string()))
}

/// Updates a question. A supplied option set replaces the stored one
/// atomically: all prior options are deleted, then the new set inserted,
/// inside one transaction.
pub async fn update_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    let question = fetch_owned_question(&pool, id, teacher_id).await?;

    let question_type = QuestionType::parse(&question.question_type)
        .ok_or_else(|| AppError::InternalServerError("Corrupt question type".to_string()))?;

    if let Some(options) = &payload.options {
        validate_option_set(question_type, options)?;
    }

    let mut tx = pool.begin().await?;

    // Tri-state writes: an absent key keeps the column, a present key
    // overwrites it, possibly with NULL ("general" track, cleared image
    // or explanation).
    let track = payload.track.clone().map(normalize_track);
    let explanation = payload
        .explanation
        .clone()
        .map(|e| e.as_deref().map(clean_html));

    sqlx::query(
        r#"
        UPDATE questions
        SET text = COALESCE($1, text),
            subject = COALESCE($2, subject),
            level = COALESCE($3, level),
            image_url = CASE WHEN $4 THEN $5 ELSE image_url END,
            track = CASE WHEN $6 THEN $7 ELSE track END,
            explanation = CASE WHEN $8 THEN $9 ELSE explanation END
        WHERE id = $10
        "#,
    )
    .bind(payload.text.as_deref().map(clean_html))
    .bind(&payload.subject)
    .bind(&payload.level)
    .bind(payload.image_url.is_some())
    .bind(payload.image_url.clone().flatten())
    .bind(track.is_some())
    .bind(track.flatten())
    .bind(explanation.is_some())
    .bind(explanation.flatten())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if let Some(options) = &payload.options {
        sqlx::query("DELETE FROM question_options WHERE question_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_options(&mut tx, id, options).await?;
    }

    tx.commit().await?;

    Ok(StatusCode::OK)
}

/// Deletes a question. Owner only; options cascade.
pub async fn delete_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let deleted = sqlx::query("DELETE FROM questions WHERE id = $1 AND teacher_id = $2")
        .bind(id)
        .bind(teacher_id)
        .execute(&pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(StatusCode::OK)
}

#[derive(sqlx::FromRow)]
struct BankRow {
    id: i64,
    subject: String,
    level: String,
    track: Option<String>,
    question_type: String,
}

/// Groups the caller's questions by (subject, level, track) into
/// browsable banks with per-group counts.
pub async fn list_banks(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;

    let rows = sqlx::query_as::<_, BankRow>(
        r#"
        SELECT id, subject, level, track, question_type
        FROM questions
        WHERE teacher_id = $1
        ORDER BY id
        "#,
    )
    .bind(teacher_id)
    .fetch_all(&pool)
    .await?;

    let total_questions = rows.len();
    let mut groups: Vec<BankGroup> = Vec::new();
    let mut index: HashMap<(String, String, Option<String>), usize> = HashMap::new();

    for row in rows {
        let key = (row.subject.clone(), row.level.clone(), row.track.clone());
        let i = *index.entry(key).or_insert_with(|| {
            groups.push(BankGroup {
                subject: row.subject.clone(),
                level: row.level.clone(),
                track: row.track.clone(),
                question_ids: Vec::new(),
                total: 0,
                choice_count: 0,
                essay_count: 0,
            });
            groups.len() - 1
        });

        let group = &mut groups[i];
        group.question_ids.push(row.id);
        group.total += 1;
        if row.question_type == "ESSAY" {
            group.essay_count += 1;
        } else {
            group.choice_count += 1;
        }
    }

    let total_groups = groups.len();

    Ok(Json(serde_json::json!({
        "banks": groups,
        "total_groups": total_groups,
        "total_questions": total_questions,
    })))
}

/// Lists one bank's questions with per-type stats.
/// The literal track "general" addresses questions without a track.
pub async fn bank_questions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((subject, level, track)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let teacher_id = super::resolve_teacher(&pool, &claims).await?;
    let track = normalize_track(Some(track));

    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {QUESTION_COLUMNS} FROM questions WHERE teacher_id = "
    ));
    qb.push_bind(teacher_id);
    qb.push(" AND subject = ").push_bind(&subject);
    qb.push(" AND level = ").push_bind(&level);
    match &track {
        Some(t) => {
            qb.push(" AND track = ").push_bind(t);
        }
        None => {
            qb.push(" AND track IS NULL");
        }
    }
    qb.push(" ORDER BY created_at DESC");

    let questions: Vec<Question> = qb.build_query_as().fetch_all(&pool).await?;

    let count_of = |t: &str| questions.iter().filter(|q| q.question_type == t).count();
    let stats = serde_json::json!({
        "total": questions.len(),
        "single_choice": count_of("SINGLE_CHOICE"),
        "multi_choice": count_of("MULTI_CHOICE"),
        "essay": count_of("ESSAY"),
    });

    let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
    let mut options_by_question = load_options(&pool, &ids).await?;
    let questions: Vec<QuestionWithOptions> = questions
        .into_iter()
        .map(|q| {
            let options = options_by_question.remove(&q.id).unwrap_or_default();
            QuestionWithOptions {
                question: q,
                options,
            }
        })
        .collect();

    Ok(Json(serde_json::json!({
        "bank": { "subject": subject, "level": level, "track": track },
        "questions": questions,
        "stats": stats,
    })))
}
