// src/handlers/question.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::{PgPool, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        question::{
            CreateQuestionRequest, Interaction, ListQuestionsParams, Question,
            QuestionWithInteraction, UpdateInteractionRequest,
        },
        test::STATUS_IN_PROGRESS,
    },
    utils::{html::clean_html, jwt::Claims},
};

/// Creates a new question in the caller's bank.
///
/// Students only (admins manage, they do not author). Free-text fields are
/// sanitized before storage.
pub async fn create_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(mut payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != "student" {
        return Err(AppError::Forbidden(
            "Only students can create questions".to_string(),
        ));
    }
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;
    sanitize(&mut payload);

    let question = sqlx::query_as::<_, Question>(
        r#"
        INSERT INTO questions
            (user_id, question_text, options, correct_answers, explanation,
             media, categories, subjects, topics, difficulty, source_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&payload.question_text)
    .bind(SqlJson(&payload.options))
    .bind(&payload.correct_answers)
    .bind(SqlJson(&payload.explanation))
    .bind(&payload.media)
    .bind(&payload.categories)
    .bind(&payload.subjects)
    .bind(&payload.topics)
    .bind(&payload.difficulty)
    .bind(&payload.source_url)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create question: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(question)))
}

fn sanitize(payload: &mut CreateQuestionRequest) {
    payload.question_text = clean_html(&payload.question_text);
    payload.explanation.text = clean_html(&payload.explanation.text);
    for option in &mut payload.options {
        option.text = clean_html(&option.text);
    }
}

/// Lists the caller's questions, filtered by tags, difficulty and prior
/// interaction state (used/unused, correct, flagged).
pub async fn list_questions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ListQuestionsParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let used = match params.status.as_deref() {
        Some("used") => Some(true),
        Some("unused") => Some(false),
        _ => None,
    };

    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT * FROM questions
        WHERE user_id = $1
          AND ($2::TEXT[] IS NULL OR categories && $2)
          AND ($3::TEXT[] IS NULL OR subjects && $3)
          AND ($4::TEXT[] IS NULL OR topics && $4)
          AND ($5::TEXT IS NULL OR difficulty = $5)
          AND ($6::BOOLEAN IS NULL OR EXISTS (
                SELECT 1 FROM interactions i
                WHERE i.question_id = questions.id AND i.user_id = $1) = $6)
          AND ($7::BOOLEAN IS NULL OR EXISTS (
                SELECT 1 FROM interactions i
                WHERE i.question_id = questions.id AND i.user_id = $1
                  AND i.is_correct = $7))
          AND ($8::BOOLEAN IS NULL OR EXISTS (
                SELECT 1 FROM interactions i
                WHERE i.question_id = questions.id AND i.user_id = $1
                  AND i.is_flagged = $8))
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(split_tags(params.categories.as_deref()))
    .bind(split_tags(params.subjects.as_deref()))
    .bind(split_tags(params.topics.as_deref()))
    .bind(&params.difficulty)
    .bind(used)
    .bind(parse_bool(params.correct.as_deref()))
    .bind(parse_bool(params.flagged.as_deref()))
    .fetch_all(&pool)
    .await?;

    Ok(Json(questions))
}

/// Splits a comma-separated query value into a tag list; None imposes no
/// constraint.
fn split_tags(raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?;
    let tags: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() { None } else { Some(tags) }
}

fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct GetQuestionParams {
    pub test_id: Option<i64>,
}

/// Retrieves one of the caller's questions, optionally with the interaction
/// recorded for a given test.
pub async fn get_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Query(params): Query<GetQuestionParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let question =
        sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound(
                "Question not found or unauthorized".to_string(),
            ))?;

    let user_interaction = match params.test_id {
        Some(test_id) => {
            sqlx::query_as::<_, Interaction>(
                "SELECT * FROM interactions WHERE question_id = $1 AND user_id = $2 AND test_id = $3",
            )
            .bind(id)
            .bind(user_id)
            .bind(test_id)
            .fetch_optional(&pool)
            .await?
        }
        None => None,
    };

    Ok(Json(QuestionWithInteraction {
        question,
        user_interaction,
    }))
}

/// Replaces an existing question. Students only; owner only.
pub async fn update_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(mut payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != "student" {
        return Err(AppError::Forbidden(
            "Only students can update their questions".to_string(),
        ));
    }
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;
    sanitize(&mut payload);

    let question = sqlx::query_as::<_, Question>(
        r#"
        UPDATE questions
        SET question_text = $3, options = $4, correct_answers = $5,
            explanation = $6, media = $7, categories = $8, subjects = $9,
            topics = $10, difficulty = $11, source_url = $12, updated_at = now()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(&payload.question_text)
    .bind(SqlJson(&payload.options))
    .bind(&payload.correct_answers)
    .bind(SqlJson(&payload.explanation))
    .bind(&payload.media)
    .bind(&payload.categories)
    .bind(&payload.subjects)
    .bind(&payload.topics)
    .bind(&payload.difficulty)
    .bind(&payload.source_url)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound(
        "Question not found or unauthorized".to_string(),
    ))?;

    Ok(Json(question))
}

/// Deletes one of the caller's questions. Students only.
pub async fn delete_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != "student" {
        return Err(AppError::Forbidden(
            "Only students can delete their questions".to_string(),
        ));
    }
    let user_id = claims.user_id()?;

    let deleted =
        sqlx::query_scalar::<_, i64>("DELETE FROM questions WHERE id = $1 AND user_id = $2 RETURNING id")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&pool)
            .await?;

    if deleted.is_none() {
        return Err(AppError::NotFound(
            "Question not found or unauthorized".to_string(),
        ));
    }

    Ok(Json(serde_json::json!({ "message": "Question deleted" })))
}

/// Records or updates the caller's answer/flag/note for a question within one
/// active test.
///
/// The write is a single conditional upsert on the (question, user, test) key:
/// absent request fields leave the stored fields untouched, a supplied answer
/// recomputes correctness against the answer key, and `updated_at` always
/// refreshes. Replaying identical input is a no-op.
pub async fn update_interaction(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateInteractionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let user_id = claims.user_id()?;

    // The test must exist, belong to the caller and still be in progress.
    let test = sqlx::query_as::<_, (i64, String)>("SELECT user_id, status FROM tests WHERE id = $1")
        .bind(payload.test_id)
        .fetch_optional(&pool)
        .await?;

    match test {
        None => return Err(AppError::NotFound("Test not found or unauthorized".to_string())),
        Some((owner, _)) if owner != user_id => {
            return Err(AppError::NotFound("Test not found or unauthorized".to_string()));
        }
        Some((_, status)) if status != STATUS_IN_PROGRESS => {
            return Err(AppError::TestNotActive(
                "Cannot update interaction for completed or cancelled test".to_string(),
            ));
        }
        Some(_) => {}
    }

    let question =
        sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound(
                "Question not found or unauthorized".to_string(),
            ))?;

    let is_correct = payload.selected_answer.map(|s| question.check_answer(s));
    let note = payload.note.as_deref().map(clean_html);

    let user_interaction = sqlx::query_as::<_, Interaction>(
        r#"
        INSERT INTO interactions
            (question_id, user_id, test_id, selected_answer, is_correct, note, is_flagged)
        VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, FALSE))
        ON CONFLICT (question_id, user_id, test_id) DO UPDATE SET
            selected_answer = COALESCE(EXCLUDED.selected_answer, interactions.selected_answer),
            is_correct = CASE
                WHEN EXCLUDED.selected_answer IS NULL THEN interactions.is_correct
                ELSE EXCLUDED.is_correct
            END,
            note = COALESCE(EXCLUDED.note, interactions.note),
            is_flagged = COALESCE($7, interactions.is_flagged),
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(payload.test_id)
    .bind(payload.selected_answer)
    .bind(is_correct)
    .bind(note)
    .bind(payload.is_flagged)
    .fetch_one(&pool)
    .await?;

    Ok(Json(QuestionWithInteraction {
        question,
        user_interaction: Some(user_interaction),
    }))
}
