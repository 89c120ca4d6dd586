//! HTTP request handlers.

use crate::auth::{ProfileUpdate, Registration};
use crate::catalog::ExternalBook;
use crate::db::{BookStats, User};
use crate::error::Result;
use crate::library::Book;
use crate::server::AppState;
use crate::server::extract::{AdminUser, AuthUser, BookSubmission, JsonBody, MaybeUser};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Token plus the user it was issued to.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    token: String,
    user: User,
}

/// Password change request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordChange {
    current_password: String,
    new_password: String,
}

/// Auth register.
pub async fn auth_register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<Registration>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let user = state.auth.register(&req)?;
    let token = state.auth.issue_token(&user.id)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let (user, token) = state.auth.authenticate(&req.email, &req.password)?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(AuthResponse { token, user }))
}

/// Get current user info.
pub async fn auth_me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// Update names, avatar and preferences.
pub async fn auth_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(update): JsonBody<ProfileUpdate>,
) -> Result<Json<User>> {
    Ok(Json(state.auth.update_profile(&user.id, &update)?))
}

/// Change own password.
pub async fn auth_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<PasswordChange>,
) -> Result<Json<Value>> {
    state
        .auth
        .change_password(&user.id, &req.current_password, &req.new_password)?;
    tracing::info!(user_id = %user.id, "Password changed");
    Ok(Json(json!({ "message": "Password updated" })))
}

// ============================================================================
// BOOKS API
// ============================================================================

/// Search query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    query: String,
}

/// Delete confirmation.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    message: &'static str,
    id: String,
    title: String,
    author: String,
}

/// Add a book.
pub async fn books_create(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    submission: BookSubmission,
) -> Result<(StatusCode, Json<Book>)> {
    let book = state
        .books
        .create(&user.id, &submission.fields, submission.cover)
        .await?;
    Ok((StatusCode::CREATED, Json(book)))
}

/// List the caller's books.
pub async fn books_list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.books.list(&user.id)?))
}

/// Fetch one book.
pub async fn books_get(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Book>> {
    Ok(Json(state.books.get(&user.id, &id)?))
}

/// Update a book.
pub async fn books_update(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    submission: BookSubmission,
) -> Result<Json<Book>> {
    let book = state
        .books
        .update(&user.id, &id, &submission.fields, submission.cover)
        .await?;
    Ok(Json(book))
}

/// Delete a book.
pub async fn books_delete(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let book = state.books.delete(&user.id, &id).await?;
    Ok(Json(DeleteResponse {
        message: "Book deleted successfully",
        id: book.id,
        title: book.title,
        author: book.author,
    }))
}

/// Search the caller's books.
pub async fn books_search(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.books.search(&user.id, &params.query)?))
}

/// Search the external catalog. Authentication is optional.
pub async fn books_search_external(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ExternalBook>>> {
    if let Some(user) = &user {
        tracing::debug!(user_id = %user.id, "External search");
    }
    Ok(Json(state.catalog.search(&params.query).await?))
}

/// Live statistics.
pub async fn books_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<BookStats>> {
    Ok(Json(state.books.stats(&user.id)?))
}

/// Distinct genres.
pub async fn books_genres(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<String>>> {
    Ok(Json(state.books.distinct_genres(&user.id)?))
}

/// Distinct authors.
pub async fn books_authors(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<String>>> {
    Ok(Json(state.books.distinct_authors(&user.id)?))
}

// ============================================================================
// ADMIN API
// ============================================================================

/// All users with their stats snapshots.
pub async fn admin_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Vec<User>>> {
    Ok(Json(state.auth.list_users()?))
}
