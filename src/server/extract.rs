//! Request extractors: the auth gate and book submissions.

use crate::db::User;
use crate::error::AppError;
use crate::library::RawSubmission;
use crate::server::AppState;
use crate::uploads::{COVER_FIELD, IncomingFile, UploadStore};
use axum::{
    Form,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Multipart, Request, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header, request::Parts},
};

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// A request that must carry a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthenticated("No token provided".to_string()))?;
        state.auth.user_from_token(token).map(AuthUser)
    }
}

/// A request that may carry a bearer token. Any token failure yields `None`.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = extract_token(&parts.headers)
            .and_then(|token| state.auth.user_from_token(token).ok());
        Ok(MaybeUser(user))
    }
}

/// A request from an administrator.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            tracing::warn!(user_id = %user.id, "Admin route refused");
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// `Json` with rejections reported through [`AppError`].
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<T> FromRequest<AppState> for JsonBody<T>
where
    T: serde::de::DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(JsonBody(value)),
            Err(e) if e.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                Err(AppError::UnsupportedMediaType(e.body_text()))
            }
            Err(e) => Err(AppError::BadRequest(e.body_text())),
        }
    }
}

/// Book fields plus an optional cover, from multipart, JSON or urlencoded bodies.
#[derive(Debug, Clone, Default)]
pub struct BookSubmission {
    /// Loosely typed fields, validated by the book store.
    pub fields: RawSubmission,
    /// Cover file under `coverImage`.
    pub cover: Option<IncomingFile>,
}

impl FromRequest<AppState> for BookSubmission {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let uploads = state.uploads();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            return read_multipart(multipart, uploads).await;
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            let mut fields = RawSubmission::new();
            for (name, value) in pairs {
                fields.push(name, value);
            }
            return Ok(BookSubmission { fields, cover: None });
        }

        if !content_type.is_empty() && !content_type.starts_with("application/json") {
            return Err(AppError::UnsupportedMediaType(format!(
                "Unsupported content type: {}",
                content_type
            )));
        }

        let body = Bytes::from_request(req, state).await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::PayloadTooLarge("Request body too large".to_string())
            } else {
                AppError::BadRequest(e.body_text())
            }
        })?;
        if body.is_empty() {
            return Ok(BookSubmission::default());
        }

        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Malformed JSON body: {}", e)))?;
        let fields = RawSubmission::from_json(&value).map_err(AppError::BadRequest)?;
        Ok(BookSubmission { fields, cover: None })
    }
}

fn multipart_error(uploads: &UploadStore, e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        uploads.too_large()
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// Collect text fields and at most one cover file.
///
/// The content type is checked before any file bytes are read, and the size
/// ceiling is enforced while streaming.
async fn read_multipart(
    mut multipart: Multipart,
    uploads: &UploadStore,
) -> Result<BookSubmission, AppError> {
    let mut submission = BookSubmission::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(uploads, e))?
    {
        let name = field.name().unwrap_or_default().to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await.map_err(|e| multipart_error(uploads, e))?;
            submission.fields.push(name, value);
            continue;
        };

        // Browsers send an empty part for an untouched file input.
        if file_name.is_empty() {
            continue;
        }
        if name != COVER_FIELD {
            return Err(AppError::BadRequest(format!("Unexpected file field '{}'", name)));
        }
        if submission.cover.is_some() {
            return Err(AppError::BadRequest(
                "Only one cover image may be uploaded".to_string(),
            ));
        }

        let content_type = field.content_type().map(str::to_string);
        uploads.check_content_type(content_type.as_deref())?;

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(uploads, e))? {
            uploads.check_size((data.len() + chunk.len()) as u64)?;
            data.extend_from_slice(&chunk);
        }

        submission.cover = Some(IncomingFile {
            file_name: Some(file_name),
            content_type,
            data: Bytes::from(data),
        });
    }

    Ok(submission)
}
