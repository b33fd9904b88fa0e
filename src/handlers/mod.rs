// src/handlers/mod.rs

pub mod admin;
pub mod attempt;
pub mod auth;
pub mod exam;
pub mod question;
pub mod result;

use sqlx::PgPool;

use crate::{error::AppError, utils::jwt::Claims};

/// Resolves the caller's student profile id from JWT claims.
pub(crate) async fn resolve_student(pool: &PgPool, claims: &Claims) -> Result<i64, AppError> {
    let user_id = claims.user_id()?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM students WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Student profile not found".to_string()))
}

/// Resolves the caller's teacher profile id from JWT claims.
pub(crate) async fn resolve_teacher(pool: &PgPool, claims: &Claims) -> Result<i64, AppError> {
    let user_id = claims.user_id()?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM teachers WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))
}
