// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// Unique username.
    pub username: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// User role: 'admin', 'teacher' or 'student'.
    pub role: String,

    /// Deactivated users cannot log in.
    pub is_active: bool,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 50))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for Admin creating a user together with its role profile.
/// Teachers need a full name; students additionally carry class placement.
#[derive(Debug, Deserialize, Validate)]
pub struct AdminCreateUserRequest {
    #[validate(length(
        min = 3,
        max = 50,
        message = "Username length must be between 3 and 50 characters."
    ))]
    pub username: String,
    #[validate(length(
        min = 4,
        max = 128,
        message = "Password length must be between 4 and 128 characters."
    ))]
    pub password: String,
    /// 'admin', 'teacher' or 'student'.
    pub role: String,
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    pub class_name: Option<String>,
    pub level: Option<String>,
    pub track: Option<String>,
}

/// DTO for toggling a user's active flag.
#[derive(Debug, Deserialize)]
pub struct ToggleStatusRequest {
    pub is_active: bool,
}

/// User listing row with the linked profile name, if any.
#[derive(Debug, Serialize, FromRow)]
pub struct UserListItem {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub is_active: bool,
    pub full_name: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}
