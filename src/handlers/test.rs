// src/handlers/test.rs

use std::collections::{BTreeMap, HashMap};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::{PgPool, types::Json as SqlJson};
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::{
        question::{Interaction, Question, QuestionWithInteraction},
        test::{
            CreateTestRequest, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_IN_PROGRESS, TagStat,
            Test, TestAnalytics, TestResponse,
        },
        usage_log,
    },
    utils::jwt::Claims,
};

/// Assembles a new test from the caller's question bank.
///
/// Runs as one transaction: the quota charge, the test row, the interaction
/// shells and the usage bumps either all land or none do. The quota charge is
/// an increment-if-under-limit upsert, so concurrent requests cannot slip
/// past the monthly limit; a later failure rolls the charge back with the
/// rest.
///
/// Sampling is a uniform random draw without replacement, done in a single
/// query over the filtered pool. The pool is author-scoped: tests draw only
/// from questions the caller wrote.
pub async fn create_test(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let user_id = claims.user_id()?;

    let caller = sqlx::query_as::<_, (String, bool)>(
        "SELECT subscription_plan, is_active FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::AuthError("User not found".to_string()))?;

    let (plan, is_active) = caller;
    if !is_active {
        return Err(AppError::Forbidden("Account is deactivated".to_string()));
    }

    let month = usage_log::month_key(Utc::now());
    let limit = config.quota.monthly_test_limit(&plan);

    let mut tx = pool.begin().await?;

    let charged =
        usage_log::try_increment(&mut *tx, user_id, usage_log::ACTIVITY_TEST, &month, limit).await?;
    if !charged {
        return Err(AppError::QuotaExceeded(
            "Monthly test limit reached".to_string(),
        ));
    }

    let sampled: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM questions
        WHERE user_id = $1
          AND ($2::TEXT[] IS NULL OR categories && $2)
          AND ($3::TEXT[] IS NULL OR subjects && $3)
          AND ($4::TEXT[] IS NULL OR topics && $4)
        ORDER BY RANDOM()
        LIMIT $5
        "#,
    )
    .bind(user_id)
    .bind(&payload.categories)
    .bind(&payload.subjects)
    .bind(&payload.topics)
    .bind(payload.count)
    .fetch_all(&mut *tx)
    .await?;

    if (sampled.len() as i64) < payload.count {
        return Err(AppError::InsufficientPool(
            "Not enough questions available".to_string(),
        ));
    }

    let test_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO tests (user_id, question_ids) VALUES ($1, $2) RETURNING id",
    )
    .bind(user_id)
    .bind(&sampled)
    .fetch_one(&mut *tx)
    .await?;

    // One empty interaction shell per sampled question.
    sqlx::query(
        r#"
        INSERT INTO interactions (question_id, user_id, test_id)
        SELECT q, $1, $2 FROM UNNEST($3::BIGINT[]) AS q
        "#,
    )
    .bind(user_id)
    .bind(test_id)
    .bind(&sampled)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE questions SET usage_count = usage_count + 1, updated_at = now() WHERE id = ANY($1)")
        .bind(&sampled)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("User {} assembled test {} ({} questions)", user_id, test_id, sampled.len());

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "test_id": test_id, "question_ids": sampled })),
    ))
}

/// Lists the caller's tests, newest first.
pub async fn get_tests(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let tests =
        sqlx::query_as::<_, Test>("SELECT * FROM tests WHERE user_id = $1 ORDER BY start_time DESC")
            .bind(user_id)
            .fetch_all(&pool)
            .await?;

    let responses: Vec<TestResponse> = tests.into_iter().map(TestResponse::from).collect();
    Ok(Json(responses))
}

#[derive(Debug, serde::Serialize)]
pub struct TestDetailResponse {
    #[serde(flatten)]
    pub test: TestResponse,
    pub questions: Vec<QuestionWithInteraction>,
}

/// Retrieves one test with its questions and the caller's interaction on each.
pub async fn get_test(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let test = sqlx::query_as::<_, Test>("SELECT * FROM tests WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Test not found".to_string()))?;

    let questions =
        sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = ANY($1)")
            .bind(&test.question_ids)
            .fetch_all(&pool)
            .await?;

    let mut interactions = load_interactions(&pool, id, user_id).await?;

    let mut by_id: HashMap<i64, Question> =
        questions.into_iter().map(|q| (q.id, q)).collect();

    // Preserve the sampled order; questions deleted from the bank since
    // assembly simply drop out.
    let questions: Vec<QuestionWithInteraction> = test
        .question_ids
        .iter()
        .filter_map(|qid| by_id.remove(qid))
        .map(|question| {
            let user_interaction = interactions.remove(&question.id);
            QuestionWithInteraction {
                question,
                user_interaction,
            }
        })
        .collect();

    Ok(Json(TestDetailResponse {
        test: TestResponse::from(test),
        questions,
    }))
}

/// Submits a test: transitions it to 'completed' and writes the aggregated
/// analytics onto it.
///
/// The status transition is a conditional update guarded on 'in-progress',
/// executed in the same transaction as the analytics write. Under concurrent
/// submits exactly one wins; the loser sees TestNotActive and the winner's
/// analytics are never recomputed.
pub async fn submit_test(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;

    let transitioned = sqlx::query_as::<_, Test>(
        r#"
        UPDATE tests
        SET status = $3, end_time = now(), updated_at = now()
        WHERE id = $1 AND user_id = $2 AND status = $4
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(STATUS_COMPLETED)
    .bind(STATUS_IN_PROGRESS)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(mut test) = transitioned else {
        drop(tx);
        return Err(terminal_transition_error(&pool, id, user_id).await?);
    };

    let questions = sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = ANY($1)")
        .bind(&test.question_ids)
        .fetch_all(&mut *tx)
        .await?;

    let interactions = sqlx::query_as::<_, Interaction>(
        "SELECT * FROM interactions WHERE test_id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await?;

    let by_question: HashMap<i64, Interaction> =
        interactions.into_iter().map(|i| (i.question_id, i)).collect();

    let analytics = aggregate_analytics(&questions, &by_question);

    sqlx::query(
        r#"
        UPDATE tests
        SET correct = $2, incorrect = $3, not_attempted = $4, flagged = $5,
            by_category = $6, by_subject = $7, by_topic = $8
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(analytics.correct)
    .bind(analytics.incorrect)
    .bind(analytics.not_attempted)
    .bind(analytics.flagged)
    .bind(SqlJson(&analytics.by_category))
    .bind(SqlJson(&analytics.by_subject))
    .bind(SqlJson(&analytics.by_topic))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    test.correct = analytics.correct;
    test.incorrect = analytics.incorrect;
    test.not_attempted = analytics.not_attempted;
    test.flagged = analytics.flagged;
    test.by_category = SqlJson(analytics.by_category);
    test.by_subject = SqlJson(analytics.by_subject);
    test.by_topic = SqlJson(analytics.by_topic);

    Ok(Json(TestResponse::from(test)))
}

/// Cancels an in-progress test. Terminal, no aggregation.
pub async fn cancel_test(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let cancelled = sqlx::query_as::<_, Test>(
        r#"
        UPDATE tests
        SET status = $3, end_time = now(), updated_at = now()
        WHERE id = $1 AND user_id = $2 AND status = $4
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(STATUS_CANCELLED)
    .bind(STATUS_IN_PROGRESS)
    .fetch_optional(&pool)
    .await?;

    let Some(test) = cancelled else {
        return Err(terminal_transition_error(&pool, id, user_id).await?);
    };

    Ok(Json(serde_json::json!({
        "message": "Test cancelled",
        "test": TestResponse::from(test),
    })))
}

/// Distinguishes "no such test" from "test already terminal" after a
/// conditional transition matched zero rows.
async fn terminal_transition_error(
    pool: &PgPool,
    id: i64,
    user_id: i64,
) -> Result<AppError, AppError> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM tests WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(match exists {
        Some(_) => AppError::TestNotActive("Test already completed or cancelled".to_string()),
        None => AppError::NotFound("Test not found".to_string()),
    })
}

async fn load_interactions(
    pool: &PgPool,
    test_id: i64,
    user_id: i64,
) -> Result<HashMap<i64, Interaction>, AppError> {
    let rows = sqlx::query_as::<_, Interaction>(
        "SELECT * FROM interactions WHERE test_id = $1 AND user_id = $2",
    )
    .bind(test_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|i| (i.question_id, i)).collect())
}

/// Tallies one test's interactions into scalar counts and per-tag breakdowns.
///
/// A question with no interaction, or one whose answer was never selected,
/// counts as not attempted. Flags are counted independently of correctness.
/// Tag fan-out applies: a question contributes to every category, subject and
/// topic bucket it carries.
fn aggregate_analytics(
    questions: &[Question],
    interactions: &HashMap<i64, Interaction>,
) -> TestAnalytics {
    let mut analytics = TestAnalytics::default();
    let mut category_stats: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    let mut subject_stats: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    let mut topic_stats: BTreeMap<String, (i64, i64)> = BTreeMap::new();

    for question in questions {
        let interaction = interactions.get(&question.id);
        let is_correct = interaction.and_then(|i| i.is_correct);

        match is_correct {
            Some(true) => analytics.correct += 1,
            Some(false) => analytics.incorrect += 1,
            None => analytics.not_attempted += 1,
        }

        if interaction.is_some_and(|i| i.is_flagged) {
            analytics.flagged += 1;
        }

        let correct = matches!(is_correct, Some(true));
        for (tags, stats) in [
            (&question.categories, &mut category_stats),
            (&question.subjects, &mut subject_stats),
            (&question.topics, &mut topic_stats),
        ] {
            for tag in tags {
                let entry = stats.entry(tag.clone()).or_insert((0, 0));
                entry.1 += 1;
                if correct {
                    entry.0 += 1;
                }
            }
        }
    }

    analytics.by_category = flatten_stats(category_stats);
    analytics.by_subject = flatten_stats(subject_stats);
    analytics.by_topic = flatten_stats(topic_stats);
    analytics
}

fn flatten_stats(stats: BTreeMap<String, (i64, i64)>) -> Vec<TagStat> {
    stats
        .into_iter()
        .map(|(name, (correct, total))| TagStat {
            name,
            correct,
            total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::Explanation;
    use sqlx::types::Json;

    fn question(id: i64, categories: &[&str], subjects: &[&str], topics: &[&str]) -> Question {
        Question {
            id,
            user_id: 1,
            question_text: format!("question {}", id),
            options: Json(vec![]),
            correct_answers: vec![0],
            explanation: Json(Explanation {
                text: String::new(),
                media: vec![],
            }),
            media: vec![],
            categories: categories.iter().map(|s| s.to_string()).collect(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            topics: topics.iter().map(|s| s.to_string()).collect(),
            difficulty: "easy".to_string(),
            source_url: None,
            usage_count: 0,
            created_at: None,
            updated_at: None,
        }
    }

    fn interaction(question_id: i64, is_correct: Option<bool>, is_flagged: bool) -> Interaction {
        Interaction {
            id: question_id,
            question_id,
            user_id: 1,
            test_id: 1,
            selected_answer: is_correct.map(|_| 0),
            is_flagged,
            is_correct,
            note: None,
            updated_at: None,
        }
    }

    fn by_question(interactions: Vec<Interaction>) -> HashMap<i64, Interaction> {
        interactions.into_iter().map(|i| (i.question_id, i)).collect()
    }

    #[test]
    fn counts_correct_incorrect_and_not_attempted() {
        let questions = vec![
            question(1, &["cardio"], &["medicine"], &[]),
            question(2, &["cardio"], &["medicine"], &[]),
            question(3, &["neuro"], &["medicine"], &[]),
        ];
        let interactions = by_question(vec![
            interaction(1, Some(true), false),
            interaction(2, Some(true), false),
            interaction(3, Some(false), false),
        ]);

        let analytics = aggregate_analytics(&questions, &interactions);
        assert_eq!(analytics.correct, 2);
        assert_eq!(analytics.incorrect, 1);
        assert_eq!(analytics.not_attempted, 0);
        assert_eq!(analytics.flagged, 0);
    }

    #[test]
    fn missing_or_unanswered_interactions_count_as_not_attempted() {
        let questions = vec![
            question(1, &[], &[], &[]),
            question(2, &[], &[], &[]),
        ];
        // Question 1 has a shell with no answer; question 2 has no row at all.
        let interactions = by_question(vec![interaction(1, None, false)]);

        let analytics = aggregate_analytics(&questions, &interactions);
        assert_eq!(analytics.not_attempted, 2);
        assert_eq!(analytics.correct, 0);
        assert_eq!(analytics.incorrect, 0);
    }

    #[test]
    fn flags_are_counted_independently_of_correctness() {
        let questions = vec![
            question(1, &[], &[], &[]),
            question(2, &[], &[], &[]),
            question(3, &[], &[], &[]),
        ];
        let interactions = by_question(vec![
            interaction(1, Some(true), true),
            interaction(2, Some(false), true),
            interaction(3, None, true),
        ]);

        let analytics = aggregate_analytics(&questions, &interactions);
        assert_eq!(analytics.flagged, 3);
        assert_eq!(analytics.correct, 1);
        assert_eq!(analytics.incorrect, 1);
        assert_eq!(analytics.not_attempted, 1);
    }

    #[test]
    fn tag_fan_out_contributes_to_every_bucket() {
        // 2 categories and 3 topics on one question -> 2 category buckets
        // and 3 topic buckets.
        let questions = vec![question(
            1,
            &["cardio", "neuro"],
            &["medicine"],
            &["ecg", "stroke", "anatomy"],
        )];
        let interactions = by_question(vec![interaction(1, Some(true), false)]);

        let analytics = aggregate_analytics(&questions, &interactions);
        assert_eq!(analytics.by_category.len(), 2);
        assert_eq!(analytics.by_subject.len(), 1);
        assert_eq!(analytics.by_topic.len(), 3);
        for stat in analytics
            .by_category
            .iter()
            .chain(&analytics.by_subject)
            .chain(&analytics.by_topic)
        {
            assert_eq!(stat.total, 1);
            assert_eq!(stat.correct, 1);
        }
    }

    #[test]
    fn breakdown_totals_sum_to_question_count_weighted_by_fan_out() {
        let questions = vec![
            question(1, &["cardio"], &["medicine"], &["ecg"]),
            question(2, &["cardio"], &["medicine"], &["ecg"]),
            question(3, &["neuro"], &["medicine"], &["stroke"]),
        ];
        let interactions = by_question(vec![
            interaction(1, Some(true), false),
            interaction(2, Some(true), false),
            interaction(3, Some(false), false),
        ]);

        let analytics = aggregate_analytics(&questions, &interactions);
        let category_total: i64 = analytics.by_category.iter().map(|s| s.total).sum();
        let subject_total: i64 = analytics.by_subject.iter().map(|s| s.total).sum();
        let topic_total: i64 = analytics.by_topic.iter().map(|s| s.total).sum();
        assert_eq!(category_total, 3);
        assert_eq!(subject_total, 3);
        assert_eq!(topic_total, 3);

        let cardio = analytics
            .by_category
            .iter()
            .find(|s| s.name == "cardio")
            .unwrap();
        assert_eq!(cardio.correct, 2);
        assert_eq!(cardio.total, 2);
        let neuro = analytics
            .by_category
            .iter()
            .find(|s| s.name == "neuro")
            .unwrap();
        assert_eq!(neuro.correct, 0);
        assert_eq!(neuro.total, 1);
    }

    #[test]
    fn empty_test_yields_empty_analytics() {
        let analytics = aggregate_analytics(&[], &HashMap::new());
        assert_eq!(analytics.correct, 0);
        assert_eq!(analytics.incorrect, 0);
        assert_eq!(analytics.not_attempted, 0);
        assert_eq!(analytics.flagged, 0);
        assert!(analytics.by_category.is_empty());
        assert!(analytics.by_subject.is_empty());
        assert!(analytics.by_topic.is_empty());
    }
}
