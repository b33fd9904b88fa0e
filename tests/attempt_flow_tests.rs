// tests/attempt_flow_tests.rs

use chrono::{Duration, Utc};
use exam_backend::{config::Config, routes, state::AppState, utils::hash::hash_password};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Spawns the app on a random port for testing.
/// Returns the base URL and a pool for direct fixture setup.
async fn spawn_app() -> (String, PgPool) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        admin_username: None,
        admin_password: None,
    };

    let state = AppState {
        pool: pool.clone(),
        config,
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, pool)
}

fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().to_string()[..8])
}

/// Inserts a user plus teacher profile; returns (username, teacher_id).
async fn create_teacher(pool: &PgPool) -> (String, i64) {
    let username = unique_name("t");
    let password = hash_password("password123").unwrap();

    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, password, role) VALUES ($1, $2, 'teacher') RETURNING id",
    )
    .bind(&username)
    .bind(&password)
    .fetch_one(pool)
    .await
    .unwrap();

    let teacher_id: i64 = sqlx::query_scalar(
        "INSERT INTO teachers (user_id, full_name) VALUES ($1, 'Test Teacher') RETURNING id",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap();

    (username, teacher_id)
}

/// Inserts a user plus student profile; returns (username, student_id).
async fn create_student(pool: &PgPool) -> (String, i64) {
    let username = unique_name("s");
    let password = hash_password("password123").unwrap();

    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, password, role) VALUES ($1, $2, 'student') RETURNING id",
    )
    .bind(&username)
    .bind(&password)
    .fetch_one(pool)
    .await
    .unwrap();

    let student_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO students (user_id, full_name, class_name, level)
        VALUES ($1, 'Test Student', '7A', 'X')
        RETURNING id
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap();

    (username, student_id)
}

async fn login(client: &reqwest::Client, address: &str, username: &str) -> String {
    let body = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({"username": username, "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();

    body["token"].as_str().unwrap().to_string()
}

async fn create_question(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    subject: &str,
    body: serde_json::Value,
) -> i64 {
    let mut body = body;
    body["subject"] = serde_json::json!(subject);
    body["level"] = serde_json::json!("X");

    let response = client
        .post(format!("{}/api/questions", address))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    response.json::<serde_json::Value>().await.unwrap()["id"]
        .as_i64()
        .unwrap()
}

/// Option ids of a question, split into (correct, incorrect).
async fn option_ids(pool: &PgPool, question_id: i64) -> (Vec<i64>, Vec<i64>) {
    let rows: Vec<(i64, bool)> = sqlx::query_as(
        "SELECT id, is_correct FROM question_options WHERE question_id = $1 ORDER BY id",
    )
    .bind(question_id)
    .fetch_all(pool)
    .await
    .unwrap();

    let correct = rows.iter().filter(|r| r.1).map(|r| r.0).collect();
    let incorrect = rows.iter().filter(|r| !r.1).map(|r| r.0).collect();
    (correct, incorrect)
}

/// Creates an open exam, adds the given questions, enrolls the student and
/// returns (exam_id, attempt_id).
async fn setup_exam(
    client: &reqwest::Client,
    address: &str,
    pool: &PgPool,
    token: &str,
    subject: &str,
    question_ids: &[i64],
    student_id: i64,
) -> (i64, i64) {
    let response = client
        .post(format!("{}/api/exams", address))
        .bearer_auth(token)
        .json(&serde_json::json!({
            "name": "Midterm",
            "subject": subject,
            "level": "X",
            "starts_at": Utc::now() - Duration::hours(1),
            "ends_at": Utc::now() + Duration::hours(1),
            "duration_minutes": 60,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let exam_id = response.json::<serde_json::Value>().await.unwrap()["id"]
        .as_i64()
        .unwrap();

    for question_id in question_ids {
        let response = client
            .post(format!("{}/api/exams/{}/questions", address, exam_id))
            .bearer_auth(token)
            .json(&serde_json::json!({"question_id": question_id}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    let response = client
        .post(format!("{}/api/exams/{}/participants", address, exam_id))
        .bearer_auth(token)
        .json(&serde_json::json!({"student_ids": [student_id]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let attempt_id: i64 =
        sqlx::query_scalar("SELECT id FROM attempts WHERE exam_id = $1 AND student_id = $2")
            .bind(exam_id)
            .bind(student_id)
            .fetch_one(pool)
            .await
            .unwrap();

    (exam_id, attempt_id)
}

#[tokio::test]
async fn choice_only_exam_is_fully_graded_on_finish() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let subject = unique_name("math");

    let (teacher_name, _) = create_teacher(&pool).await;
    let (student_name, student_id) = create_student(&pool).await;
    let teacher_token = login(&client, &address, &teacher_name).await;

    let single = create_question(
        &client,
        &address,
        &teacher_token,
        &subject,
        serde_json::json!({
            "question_type": "SINGLE_CHOICE",
            "text": "2 + 2 = ?",
            "options": [
                {"label": "A", "text": "4", "is_correct": true},
                {"label": "B", "text": "5"},
            ],
        }),
    )
    .await;
    let multi = create_question(
        &client,
        &address,
        &teacher_token,
        &subject,
        serde_json::json!({
            "question_type": "MULTI_CHOICE",
            "text": "Which are even?",
            "options": [
                {"label": "A", "text": "2", "is_correct": true},
                {"label": "B", "text": "3"},
                {"label": "C", "text": "8", "is_correct": true},
            ],
        }),
    )
    .await;

    let (single_correct, single_wrong) = option_ids(&pool, single).await;
    let (multi_correct, _) = option_ids(&pool, multi).await;

    let (_, attempt_id) = setup_exam(
        &client,
        &address,
        &pool,
        &teacher_token,
        &subject,
        &[single, multi],
        student_id,
    )
    .await;

    let student_token = login(&client, &address, &student_name).await;

    // Start
    let start = client
        .post(format!("{}/api/attempts/{}/start", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(start.status().as_u16(), 200);
    let start_body = start.json::<serde_json::Value>().await.unwrap();
    assert_eq!(start_body["attempt"]["status"], "IN_PROGRESS");
    assert_eq!(start_body["total_questions"], 2);
    let started_at = start_body["attempt"]["started_at"].clone();
    // Options must not leak correctness flags
    assert!(start_body["questions"][0]["options"][0].get("is_correct").is_none());

    // The first start already echoes the stored timestamp, so the snapshot
    // cannot drift on later re-entries
    let persisted: chrono::DateTime<Utc> =
        sqlx::query_scalar("SELECT started_at FROM attempts WHERE id = $1")
            .bind(attempt_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    let echoed = chrono::DateTime::parse_from_rfc3339(started_at.as_str().unwrap()).unwrap();
    assert_eq!(echoed, persisted);

    // Idempotent re-entry keeps the original start time
    let restart = client
        .post(format!("{}/api/attempts/{}/start", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(restart["attempt"]["started_at"], started_at);
    assert_eq!(restart["attempt"]["status"], "IN_PROGRESS");

    // Answer the single-choice question wrong first, then correct (upsert)
    for option in [single_wrong[0], single_correct[0]] {
        let response = client
            .post(format!("{}/api/attempts/{}/answers", address, attempt_id))
            .bearer_auth(&student_token)
            .json(&serde_json::json!({"question_id": single, "selected_option_id": option}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    // Multi-choice answered in reverse order; equality is set-based
    let reversed: Vec<i64> = multi_correct.iter().rev().copied().collect();
    let response = client
        .post(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({"question_id": multi, "selected_option_ids": reversed}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Finish: everything auto-gradable, perfect score
    let finish = client
        .post(format!("{}/api/attempts/{}/finish", address, attempt_id))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap();
    assert_eq!(finish.status().as_u16(), 200);
    let finish_body = finish.json::<serde_json::Value>().await.unwrap();
    assert_eq!(finish_body["status"], "fully graded");
    assert_eq!(finish_body["attempt_status"], "GRADED");
    assert_eq!(finish_body["final_score"].as_f64().unwrap(), 100.0);
    assert_eq!(finish_body["answered_questions"], 2);

    // A second finish is a wrong-state rejection, not a re-grade
    let again = client
        .post(format!("{}/api/attempts/{}/finish", address, attempt_id))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status().as_u16(), 409);
}

#[tokio::test]
async fn cleared_answer_leaves_no_row_and_scores_zero() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let subject = unique_name("phys");

    let (teacher_name, _) = create_teacher(&pool).await;
    let (student_name, student_id) = create_student(&pool).await;
    let teacher_token = login(&client, &address, &teacher_name).await;

    let single = create_question(
        &client,
        &address,
        &teacher_token,
        &subject,
        serde_json::json!({
            "question_type": "SINGLE_CHOICE",
            "text": "Unit of force?",
            "options": [
                {"label": "A", "text": "Newton", "is_correct": true},
                {"label": "B", "text": "Joule"},
            ],
        }),
    )
    .await;
    let (correct, _) = option_ids(&pool, single).await;

    let (_, attempt_id) = setup_exam(
        &client,
        &address,
        &pool,
        &teacher_token,
        &subject,
        &[single],
        student_id,
    )
    .await;

    let student_token = login(&client, &address, &student_name).await;
    client
        .post(format!("{}/api/attempts/{}/start", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();

    // Record, then clear
    client
        .post(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({"question_id": single, "selected_option_id": correct[0]}))
        .send()
        .await
        .unwrap();

    let cleared = client
        .post(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({"question_id": single}))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(cleared["deleted"], true);

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE attempt_id = $1")
        .bind(attempt_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, 0);

    let finish_body = client
        .post(format!("{}/api/attempts/{}/finish", address, attempt_id))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(finish_body["final_score"].as_f64().unwrap(), 0.0);
    assert_eq!(finish_body["answered_questions"], 0);
}

#[tokio::test]
async fn essay_exam_awaits_review_then_teacher_finalizes_once() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let subject = unique_name("bio");

    let (teacher_name, _) = create_teacher(&pool).await;
    let (student_name, student_id) = create_student(&pool).await;
    let teacher_token = login(&client, &address, &teacher_name).await;

    let multi = create_question(
        &client,
        &address,
        &teacher_token,
        &subject,
        serde_json::json!({
            "question_type": "MULTI_CHOICE",
            "text": "Which are mammals?",
            "options": [
                {"label": "A", "text": "Whale", "is_correct": true},
                {"label": "B", "text": "Shark"},
                {"label": "C", "text": "Bat", "is_correct": true},
            ],
        }),
    )
    .await;
    let essay = create_question(
        &client,
        &address,
        &teacher_token,
        &subject,
        serde_json::json!({
            "question_type": "ESSAY",
            "text": "Explain photosynthesis.",
        }),
    )
    .await;
    let (multi_correct, _) = option_ids(&pool, multi).await;

    let (_, attempt_id) = setup_exam(
        &client,
        &address,
        &pool,
        &teacher_token,
        &subject,
        &[multi, essay],
        student_id,
    )
    .await;

    let student_token = login(&client, &address, &student_name).await;
    client
        .post(format!("{}/api/attempts/{}/start", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();

    client
        .post(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({"question_id": multi, "selected_option_ids": multi_correct}))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({"question_id": essay, "essay_text": "Plants use light."}))
        .send()
        .await
        .unwrap();

    // Finish holds at SUBMITTED; the auto-score covers the choice half only
    let finish_body = client
        .post(format!("{}/api/attempts/{}/finish", address, attempt_id))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(finish_body["status"], "awaiting essay review");
    assert_eq!(finish_body["attempt_status"], "SUBMITTED");
    assert_eq!(finish_body["final_score"].as_f64().unwrap(), 50.0);

    // Teacher finalizes the combined score; the attempt becomes GRADED
    let graded = client
        .put(format!(
            "{}/api/results/attempts/{}/essay-score",
            address, attempt_id
        ))
        .bearer_auth(&teacher_token)
        .json(&serde_json::json!({"final_score": 80.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(graded.status().as_u16(), 200);

    let status: String = sqlx::query_scalar("SELECT status FROM attempts WHERE id = $1")
        .bind(attempt_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "GRADED");

    let score: f64 = sqlx::query_scalar("SELECT final_score FROM results WHERE attempt_id = $1")
        .bind(attempt_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(score, 80.0);

    // Essay grading is one-shot
    let again = client
        .put(format!(
            "{}/api/results/attempts/{}/essay-score",
            address, attempt_id
        ))
        .bearer_auth(&teacher_token)
        .json(&serde_json::json!({"final_score": 90.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status().as_u16(), 409);
}

#[tokio::test]
async fn locked_attempt_requires_single_use_unlock_code() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let subject = unique_name("chem");

    let (teacher_name, _) = create_teacher(&pool).await;
    let (student_name, student_id) = create_student(&pool).await;
    let teacher_token = login(&client, &address, &teacher_name).await;

    let single = create_question(
        &client,
        &address,
        &teacher_token,
        &subject,
        serde_json::json!({
            "question_type": "SINGLE_CHOICE",
            "text": "Symbol for gold?",
            "options": [
                {"label": "A", "text": "Au", "is_correct": true},
                {"label": "B", "text": "Ag"},
            ],
        }),
    )
    .await;

    let (_, attempt_id) = setup_exam(
        &client,
        &address,
        &pool,
        &teacher_token,
        &subject,
        &[single],
        student_id,
    )
    .await;

    // Proctor locks the attempt
    let locked = client
        .patch(format!("{}/api/attempts/{}/lock", address, attempt_id))
        .bearer_auth(&teacher_token)
        .json(&serde_json::json!({"locked": true, "unlock_code": "SECRET42"}))
        .send()
        .await
        .unwrap();
    assert_eq!(locked.status().as_u16(), 200);

    let student_token = login(&client, &address, &student_name).await;

    // No code, wrong code: rejected with 423
    for body in [
        serde_json::json!({}),
        serde_json::json!({"unlock_code": "WRONG"}),
    ] {
        let response = client
            .post(format!("{}/api/attempts/{}/start", address, attempt_id))
            .bearer_auth(&student_token)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 423);
    }

    // Correct code clears flag and code; the attempt starts
    let response = client
        .post(format!("{}/api/attempts/{}/start", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({"unlock_code": "SECRET42"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let (is_locked, unlock_code): (bool, Option<String>) =
        sqlx::query_as("SELECT is_locked, unlock_code FROM attempts WHERE id = $1")
            .bind(attempt_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(!is_locked);
    assert!(unlock_code.is_none());

    // Resuming afterwards needs no code
    let response = client
        .post(format!("{}/api/attempts/{}/start", address, attempt_id))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}
