//! Authentication module.

use crate::config::AuthConfig;
use crate::db::{self, Database, Preferences, User, UserStats};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-facing message for failed logins, regardless of cause.
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a random signing secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 48];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Bearer token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Issued at (seconds).
    pub iat: i64,
    /// Expires at (seconds).
    pub exp: i64,
}

/// Why a bearer token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Past its expiry.
    Expired,
    /// Not a decodable token.
    Malformed,
    /// Signature does not verify.
    BadSignature,
}

impl TokenError {
    /// Message returned to the client for this class of failure.
    pub fn client_message(&self) -> &'static str {
        match self {
            TokenError::Expired => "Token expired",
            TokenError::Malformed | TokenError::BadSignature => "Invalid token",
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TokenError::Expired => "expired",
            TokenError::Malformed => "malformed",
            TokenError::BadSignature => "verification failed",
        };
        f.write_str(kind)
    }
}

/// Registration request body. Missing members deserialize as empty and fail
/// validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Registration {
    /// Username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Plaintext password.
    pub password: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
}

/// Profile update request body. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// New first name.
    pub first_name: Option<String>,
    /// New last name.
    pub last_name: Option<String>,
    /// New avatar reference; empty string removes it.
    pub avatar: Option<String>,
    /// New preferences.
    pub preferences: Option<Preferences>,
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_days: u32,
    registration_enabled: bool,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            db,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_days: config.token_days,
            registration_enabled: config.registration_enabled(),
        }
    }

    /// Register a new user.
    pub fn register(&self, registration: &Registration) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::Forbidden("Registration is disabled".to_string()));
        }

        self.create_user(registration, false)
    }

    /// Create a new user (admin function).
    pub fn create_user(&self, registration: &Registration, is_admin: bool) -> Result<User> {
        let username = registration.username.trim();
        let email = normalize_email(&registration.email);
        let first_name = registration.first_name.trim();
        let last_name = registration.last_name.trim();

        let mut errors = Vec::new();

        if username.len() < 3 || username.len() > 30 {
            errors.push("Username must be 3-30 characters".to_string());
        } else if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            errors.push("Username can only contain letters, numbers, _ and -".to_string());
        }

        if !is_plausible_email(&email) {
            errors.push("Please provide a valid email".to_string());
        }

        if registration.password.chars().count() < 6 {
            errors.push("Password must be at least 6 characters".to_string());
        }

        for (label, value) in [("First name", first_name), ("Last name", last_name)] {
            if value.is_empty() || value.chars().count() > 50 {
                errors.push(format!("{} must be 1-50 characters", label));
            }
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(AppError::DuplicateKey(
                "Email already registered".to_string(),
            ));
        }
        if self.db.get_user_by_username(username)?.is_some() {
            return Err(AppError::DuplicateKey(format!(
                "Username '{}' already exists",
                username
            )));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email,
            password_hash: hash_password(&registration.password)?,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            avatar: None,
            preferences: Preferences::default(),
            stats: UserStats::default(),
            is_admin,
            created_at: db::now(),
            last_login: None,
        };

        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    /// Check credentials and issue a token.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<(User, String)> {
        let email = normalize_email(email);
        let Some(mut user) = self.db.get_user_by_email(&email)? else {
            tracing::debug!("Login for unknown email");
            return Err(AppError::Unauthenticated(INVALID_CREDENTIALS.to_string()));
        };

        if !verify_password(password, &user.password_hash)? {
            tracing::debug!(user_id = %user.id, "Login with wrong password");
            return Err(AppError::Unauthenticated(INVALID_CREDENTIALS.to_string()));
        }

        let now = db::now();
        self.db.update_user_last_login(&user.id, now)?;
        user.last_login = Some(now);

        let token = self.issue_token(&user.id)?;
        Ok((user, token))
    }

    /// Issue a signed token for a user.
    pub fn issue_token(&self, user_id: &str) -> Result<String> {
        self.issue_token_at(user_id, Utc::now())
    }

    pub(crate) fn issue_token_at(&self, user_id: &str, issued_at: DateTime<Utc>) -> Result<String> {
        let expires_at = issued_at + Duration::days(i64::from(self.token_days));
        let claims = Claims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify a token's signature and expiry.
    pub fn verify_token(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            })
    }

    /// Resolve a bearer token to its user.
    pub fn user_from_token(&self, token: &str) -> Result<User> {
        let claims = self.verify_token(token).map_err(|kind| {
            tracing::warn!(reason = %kind, "Rejected bearer token");
            AppError::Unauthenticated(kind.client_message().to_string())
        })?;

        self.db.get_user_by_id(&claims.sub)?.ok_or_else(|| {
            tracing::warn!(user_id = %claims.sub, "Token for deleted user");
            AppError::Unauthenticated("User no longer exists".to_string())
        })
    }

    /// Fetch a user by ID.
    pub fn get_user(&self, user_id: &str) -> Result<User> {
        self.db
            .get_user_by_id(user_id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Update names, avatar and preferences.
    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<User> {
        let mut user = self.get_user(user_id)?;
        let mut errors = Vec::new();

        for (label, value, target) in [
            ("First name", &update.first_name, &mut user.first_name),
            ("Last name", &update.last_name, &mut user.last_name),
        ] {
            if let Some(value) = value {
                let value = value.trim();
                if value.is_empty() || value.chars().count() > 50 {
                    errors.push(format!("{} must be 1-50 characters", label));
                } else {
                    *target = value.to_string();
                }
            }
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        if let Some(avatar) = &update.avatar {
            let avatar = avatar.trim();
            user.avatar = (!avatar.is_empty()).then(|| avatar.to_string());
        }
        if let Some(preferences) = update.preferences {
            user.preferences = preferences;
        }

        self.db.update_user_profile(&user)?;
        Ok(user)
    }

    /// Change a user's own password after checking the current one.
    pub fn change_password(&self, user_id: &str, current: &str, new_password: &str) -> Result<()> {
        let user = self.get_user(user_id)?;

        if !verify_password(current, &user.password_hash)? {
            return Err(AppError::Unauthenticated(
                "Current password is incorrect".to_string(),
            ));
        }
        if new_password.chars().count() < 6 {
            return Err(AppError::Validation(vec![
                "Password must be at least 6 characters".to_string(),
            ]));
        }
        // Hash is only rewritten when the plaintext actually changes.
        if new_password == current {
            return Ok(());
        }

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(&user.id, &password_hash)?;
        Ok(())
    }

    /// Set a password by username (admin function).
    pub fn reset_password(&self, username: &str, new_password: &str) -> Result<bool> {
        if new_password.chars().count() < 6 {
            return Err(AppError::Validation(vec![
                "Password must be at least 6 characters".to_string(),
            ]));
        }

        let Some(user) = self.db.get_user_by_username(username)? else {
            return Ok(false);
        };
        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(&user.id, &password_hash)
    }

    /// Grant or revoke administrator rights.
    pub fn set_admin(&self, username: &str, is_admin: bool) -> Result<bool> {
        self.db.set_user_admin(username, is_admin)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    /// Overwrite the user's cached stats snapshot from their books.
    ///
    /// A user that no longer exists is logged and otherwise ignored.
    pub fn recompute_stats(&self, user_id: &str) -> Result<()> {
        match self.db.recompute_user_stats(user_id)? {
            Some(stats) => {
                tracing::debug!(user_id, total = stats.total_books, "Stats snapshot refreshed");
            }
            None => {
                tracing::warn!(user_id, "Stats refresh for missing user");
            }
        }
        Ok(())
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !email.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}
