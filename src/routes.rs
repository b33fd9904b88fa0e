// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{delete, get, patch, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, attempt, auth, exam, question, result},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, student_middleware, teacher_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, questions, exams, attempts, results, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool + Config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new().route("/login", post(auth::login));

    // Question bank management (teachers)
    let question_routes = Router::new()
        .route(
            "/",
            get(question::list_questions).post(question::create_question),
        )
        .route("/banks", get(question::list_banks))
        .route(
            "/banks/{subject}/{level}/{track}",
            get(question::bank_questions),
        )
        .route(
            "/{id}",
            get(question::get_question)
                .put(question::update_question)
                .delete(question::delete_question),
        )
        .layer(middleware::from_fn(teacher_middleware));

    // Exam composition and rollout (teachers)
    let exam_routes = Router::new()
        .route("/", get(exam::list_exams).post(exam::create_exam))
        .route(
            "/{id}",
            get(exam::get_exam)
                .put(exam::update_exam)
                .delete(exam::delete_exam),
        )
        .route("/{id}/questions", post(exam::add_question))
        .route("/{id}/available-questions", get(exam::available_questions))
        .route("/{id}/assign-bank", post(exam::assign_bank))
        .route("/{id}/participants", post(exam::enroll_students))
        .layer(middleware::from_fn(teacher_middleware));

    // Exam taking (students), plus the teacher-side proctoring lock
    let attempt_routes = Router::new()
        .route("/mine", get(attempt::my_exams))
        .route("/{id}/start", post(attempt::start_attempt))
        .route("/{id}/answers", post(attempt::record_answer))
        .route("/{id}/finish", post(attempt::finish_attempt))
        .layer(middleware::from_fn(student_middleware))
        .merge(
            Router::new()
                .route("/{id}/lock", patch(attempt::set_lock))
                .layer(middleware::from_fn(teacher_middleware)),
        );

    let result_routes = Router::new()
        .route("/completed", get(result::completed_exams))
        .route(
            "/attempts/{id}/essay-score",
            put(result::submit_essay_score),
        )
        .layer(middleware::from_fn(teacher_middleware));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route("/users/{id}", delete(admin::delete_user))
        .route("/users/{id}/status", patch(admin::toggle_status))
        .layer(middleware::from_fn(admin_middleware));

    let protected = Router::new()
        .nest("/api/questions", question_routes)
        .nest("/api/exams", exam_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/results", result_routes)
        .nest("/api/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .merge(protected)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
