// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::AppError,
    models::user::{AdminCreateUserRequest, ToggleStatusRequest, UserListItem},
    utils::{hash::hash_password, jwt::Claims},
};

const ROLES: [&str; 3] = ["admin", "teacher", "student"];

#[derive(Debug, Deserialize)]
pub struct UserFilter {
    pub role: Option<String>,
}

/// Lists users with their linked profile names, optionally filtered by
/// role. Admin only.
pub async fn list_users(
    State(pool): State<PgPool>,
    Query(filter): Query<UserFilter>,
) -> Result<impl IntoResponse, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"
        SELECT u.id, u.username, u.role, u.is_active,
               COALESCE(t.full_name, s.full_name) AS full_name,
               u.created_at
        FROM users u
        LEFT JOIN teachers t ON t.user_id = u.id
        LEFT JOIN students s ON s.user_id = u.id
        "#,
    );
    if let Some(role) = &filter.role {
        qb.push(" WHERE u.role = ").push_bind(role);
    }
    qb.push(" ORDER BY u.id DESC");

    let users: Vec<UserListItem> = qb.build_query_as().fetch_all(&pool).await?;

    Ok(Json(users))
}

/// Creates a user together with its role profile in one transaction.
/// Admin only. Students must carry class placement fields.
pub async fn create_user(
    State(pool): State<PgPool>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if !ROLES.contains(&payload.role.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unknown role '{}'",
            payload.role
        )));
    }
    if payload.role == "student"
        && (payload.class_name.is_none() || payload.level.is_none())
    {
        return Err(AppError::BadRequest(
            "Students need class_name and level".to_string(),
        ));
    }

    let hashed_password = hash_password(&payload.password)?;

    let mut tx = pool.begin().await?;

    let user_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO users (username, password, role)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(&payload.username)
    .bind(&hashed_password)
    .bind(&payload.role)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        // Postgres error code for unique violation is 23505
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict(format!("Username '{}' already exists", payload.username))
        } else {
            tracing::error!("Failed to create user: {:?}", e);
            AppError::from(e)
        }
    })?;

    match payload.role.as_str() {
        "teacher" => {
            sqlx::query("INSERT INTO teachers (user_id, full_name) VALUES ($1, $2)")
                .bind(user_id)
                .bind(&payload.full_name)
                .execute(&mut *tx)
                .await?;
        }
        "student" => {
            sqlx::query(
                r#"
                INSERT INTO students (user_id, full_name, class_name, level, track)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(user_id)
            .bind(&payload.full_name)
            .bind(&payload.class_name)
            .bind(&payload.level)
            .bind(&payload.track)
            .execute(&mut *tx)
            .await?;
        }
        _ => {}
    }

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": user_id })),
    ))
}

/// Deletes a user by ID. Admin only. Prevents deleting self.
pub async fn delete_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if claims.user_id()? == id {
        return Err(AppError::BadRequest(
            "Cannot delete your own account".to_string(),
        ));
    }

    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(StatusCode::OK)
}

/// Toggles a user's active flag. Admin only. Deactivated users cannot
/// log in.
pub async fn toggle_status(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ToggleStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    if claims.user_id()? == id {
        return Err(AppError::BadRequest(
            "Cannot deactivate your own account".to_string(),
        ));
    }

    let updated = sqlx::query("UPDATE users SET is_active = $1 WHERE id = $2")
        .bind(payload.is_active)
        .bind(id)
        .execute(&pool)
        .await?
        .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(Json(serde_json::json!({
        "id": id,
        "is_active": payload.is_active,
    })))
}
