// src/routes.rs

use std::sync::Arc;

use axum::{
    Router, http::Method, middleware,
    routing::{delete, get, post, put},
};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, question, test, upload, user},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, users, questions, tests, upload, admin).
/// * Applies global middleware (Trace, CORS) and rate limiting on auth.
/// * Injects global state (pool, config, mailer).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://localhost:5173".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    // Throttle the credential/OTP surface per client IP.
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(5)
        .burst_size(50)
        .finish()
        .unwrap();
    let governor_conf = Arc::new(governor_conf);

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/resend-otp", post(auth::resend_otp))
        .layer(GovernorLayer::new(governor_conf));

    let user_routes = Router::new()
        .route(
            "/profile",
            get(user::get_profile)
                .put(user::update_profile)
                .delete(user::delete_profile),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let question_routes = Router::new()
        .route(
            "/",
            post(question::create_question).get(question::list_questions),
        )
        .route(
            "/{id}",
            get(question::get_question)
                .put(question::update_question)
                .delete(question::delete_question),
        )
        .route("/{id}/interaction", put(question::update_interaction))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let test_routes = Router::new()
        .route("/", post(test::create_test).get(test::get_tests))
        .route("/{id}", get(test::get_test))
        .route("/{id}/submit", post(test::submit_test))
        .route("/{id}/cancel", post(test::cancel_test))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let upload_routes = Router::new()
        .route("/signature", get(upload::get_upload_signature))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route(
            "/users/{id}",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/users/{id}/plan", put(admin::update_user_plan))
        .route("/users/{id}/activate", put(admin::set_user_active))
        .route("/questions/{id}", delete(admin::delete_question))
        .route("/analytics", get(admin::get_analytics))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        .nest("/api/questions", question_routes)
        .nest("/api/tests", test_routes)
        .nest("/api/upload", upload_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
