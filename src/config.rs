use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Personal library tracker server.
#[derive(Parser, Debug, Clone)]
#[command(name = "shelf-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "SHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Email address.
        #[arg(short, long)]
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// First name.
        #[arg(long, default_value = "Admin")]
        first_name: String,
        /// Last name.
        #[arg(long, default_value = "User")]
        last_name: String,
        /// Grant administrator rights.
        #[arg(long)]
        admin: bool,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Grant or revoke administrator rights.
    Admin {
        /// Username.
        username: String,
        /// Revoke instead of grant.
        #[arg(long)]
        revoke: bool,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upload configuration.
    #[serde(default)]
    pub uploads: UploadsConfig,

    /// External catalog configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        5000,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/shelf.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign bearer tokens.
    #[serde(default)]
    pub jwt_secret: String,

    /// Token lifetime in days.
    #[serde(default = "default_token_days")]
    pub token_days: u32,

    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_days: default_token_days(),
            registration: default_registration(),
        }
    }
}

fn default_token_days() -> u32 {
    7
}

fn default_registration() -> String {
    "open".to_string()
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Directory where cover images are stored.
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,

    /// Maximum accepted file size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}

/// External catalog (Google Books) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// API key. External search is unavailable without it.
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL.
    #[serde(default = "default_catalog_url")]
    pub base_url: String,

    /// Maximum number of results per query.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_catalog_url(),
            max_results: default_max_results(),
        }
    }
}

fn default_catalog_url() -> String {
    "https://www.googleapis.com/books/v1".to_string()
}

fn default_max_results() -> u32 {
    20
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Apply `SHELF_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> crate::error::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::error::Result<()> {
        if let Some(secret) = lookup("SHELF_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(max) = lookup("SHELF_MAX_UPLOAD_BYTES") {
            self.uploads.max_bytes = max.trim().parse().map_err(|_| {
                crate::error::AppError::Config(format!(
                    "SHELF_MAX_UPLOAD_BYTES is not a number: {}",
                    max
                ))
            })?;
        }
        if let Some(key) = lookup("SHELF_BOOKS_API_KEY") {
            self.catalog.api_key = Some(key).filter(|k| !k.trim().is_empty());
        }
        if let Some(path) = lookup("SHELF_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("shelf-rs.toml"),
            dirs::config_dir()
                .map(|p| p.join("shelf-rs").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/shelf-rs/config.toml"),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Generate default config file content with the given signing secret.
    pub fn generate_default(jwt_secret: &str) -> String {
        format!(
            r#"# shelf-rs configuration

[server]
bind = "0.0.0.0:5000"

[database]
# path = "/var/lib/shelf-rs/shelf.db"

[auth]
# Secret used to sign bearer tokens (override with SHELF_JWT_SECRET)
jwt_secret = "{jwt_secret}"
# Token lifetime in days
token_days = 7
# Registration mode: "open" or "disabled"
registration = "open"

[uploads]
# dir = "/var/lib/shelf-rs/uploads"
# Maximum cover size in bytes (override with SHELF_MAX_UPLOAD_BYTES)
max_bytes = 5242880

[catalog]
# Google Books API key (override with SHELF_BOOKS_API_KEY)
# api_key = ""
max_results = 20
"#
        )
    }
}
