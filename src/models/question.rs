// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use url::Url;
use validator::Validate;

/// One answer option: display text plus optional media attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOption {
    pub text: String,
    #[serde(default)]
    pub media: Vec<String>,
}

/// Explanation shown after answering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub text: String,
    #[serde(default)]
    pub media: Vec<String>,
}

/// Represents the 'questions' table in the database.
/// Each question is owned by exactly one author.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    /// Author of the question.
    pub user_id: i64,

    pub question_text: String,

    /// Ordered answer options, stored as a JSON array.
    pub options: Json<Vec<AnswerOption>>,

    /// Indices into `options` that count as correct (supports multi-select).
    pub correct_answers: Vec<i32>,

    pub explanation: Json<Explanation>,

    /// Media attached to the question body.
    pub media: Vec<String>,

    /// Classification tags. A question may carry several of each.
    pub categories: Vec<String>,
    pub subjects: Vec<String>,
    pub topics: Vec<String>,

    /// 'easy', 'medium' or 'hard'.
    pub difficulty: String,

    pub source_url: Option<String>,

    /// Number of tests this question has been sampled into.
    pub usage_count: i64,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Question {
    /// Membership test against the answer-key set: any listed correct index
    /// counts, so multi-correct questions accept each of their answers.
    pub fn check_answer(&self, selected: i32) -> bool {
        self.correct_answers.contains(&selected)
    }
}

/// Represents the 'interactions' table: one user's answer/flag/note state for
/// one question within one specific test. Keyed uniquely by
/// (question_id, user_id, test_id).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    pub question_id: i64,
    pub user_id: i64,
    pub test_id: i64,
    pub selected_answer: Option<i32>,
    pub is_flagged: bool,
    /// Computed server-side from the question's answer key; NULL until the
    /// user selects an answer.
    pub is_correct: Option<bool>,
    pub note: Option<String>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for creating or replacing a question.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = validate_answer_key))]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, message = "At least one category is required."))]
    pub categories: Vec<String>,
    #[validate(length(min = 1, message = "At least one subject is required."))]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[validate(length(min = 1, max = 5000))]
    pub question_text: String,
    pub options: Vec<AnswerOption>,
    pub correct_answers: Vec<i32>,
    pub explanation: Explanation,
    #[serde(default)]
    #[validate(custom(function = validate_media_urls))]
    pub media: Vec<String>,
    #[validate(custom(function = validate_difficulty))]
    pub difficulty: String,
    pub source_url: Option<String>,
}

/// Cross-field invariants: at least two options, every option non-empty, and
/// every correct-answer index a valid index into `options`.
fn validate_answer_key(req: &CreateQuestionRequest) -> Result<(), validator::ValidationError> {
    if req.options.len() < 2 {
        return Err(validator::ValidationError::new("too_few_options"));
    }
    if req.options.iter().any(|o| o.text.is_empty()) {
        return Err(validator::ValidationError::new("empty_option_text"));
    }
    if req.correct_answers.is_empty() {
        return Err(validator::ValidationError::new("no_correct_answers"));
    }
    let len = req.options.len() as i32;
    if req.correct_answers.iter().any(|&i| i < 0 || i >= len) {
        return Err(validator::ValidationError::new("answer_index_out_of_range"));
    }
    Ok(())
}

fn validate_difficulty(difficulty: &str) -> Result<(), validator::ValidationError> {
    match difficulty {
        "easy" | "medium" | "hard" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_difficulty")),
    }
}

fn validate_media_urls(media: &[String]) -> Result<(), validator::ValidationError> {
    for item in media {
        if Url::parse(item).is_err() {
            return Err(validator::ValidationError::new("invalid_media_url"));
        }
    }
    Ok(())
}

/// DTO for recording a user's engagement with a question inside one active
/// test. Absent fields are left untouched (partial update semantics).
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInteractionRequest {
    pub test_id: i64,
    #[validate(range(min = 0))]
    pub selected_answer: Option<i32>,
    #[validate(length(max = 5000))]
    pub note: Option<String>,
    pub is_flagged: Option<bool>,
}

/// Query parameters for listing questions in the caller's bank.
/// Tag filters are comma-separated; any overlap qualifies.
#[derive(Debug, Deserialize)]
pub struct ListQuestionsParams {
    pub categories: Option<String>,
    pub subjects: Option<String>,
    pub topics: Option<String>,
    pub difficulty: Option<String>,
    /// 'used' or 'unused': whether the caller has any interaction with it.
    pub status: Option<String>,
    /// 'true'/'false': last answered correctly / incorrectly in some test.
    pub correct: Option<String>,
    /// 'true'/'false': flagged / explicitly unflagged in some test.
    pub flagged: Option<String>,
}

/// A question together with the caller's interaction for one test.
#[derive(Debug, Serialize)]
pub struct QuestionWithInteraction {
    #[serde(flatten)]
    pub question: Question,
    pub user_interaction: Option<Interaction>,
}
