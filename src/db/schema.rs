use crate::db::*;
use crate::error::{AppError, Result};
use crate::library::book::{Book, ReadingStatus};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, avatar,
     theme, default_status, total_books, books_read, currently_reading, want_to_read,
     is_admin, created_at, last_login";

const BOOK_COLUMNS: &str = "id, user_id, title, author, status, genre, description, isbn,
     published_date, page_count, current_page, rating, notes, cover_image, tags_json,
     series_name, series_number, language, format, purchase_date, purchase_price, location,
     date_started, date_finished, reading_duration, created_at, updated_at";

/// Column that [`Database::distinct_values`] can enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctField {
    /// `books.genre`
    Genre,
    /// `books.author`
    Author,
}

impl DistinctField {
    fn column(&self) -> &'static str {
        match self {
            DistinctField::Genre => "genre",
            DistinctField::Author => "author",
        }
    }
}

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                avatar TEXT,
                theme TEXT NOT NULL DEFAULT 'light',
                default_status TEXT NOT NULL DEFAULT 'To Read',
                total_books INTEGER NOT NULL DEFAULT 0,
                books_read INTEGER NOT NULL DEFAULT 0,
                currently_reading INTEGER NOT NULL DEFAULT 0,
                want_to_read INTEGER NOT NULL DEFAULT 0,
                is_admin INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'To Read',
                genre TEXT,
                description TEXT,
                isbn TEXT,
                published_date TEXT,
                page_count INTEGER,
                current_page INTEGER,
                rating INTEGER,
                notes TEXT,
                cover_image TEXT,
                tags_json TEXT NOT NULL DEFAULT '[]',
                series_name TEXT,
                series_number REAL,
                language TEXT,
                format TEXT,
                purchase_date TEXT,
                purchase_price REAL,
                location TEXT,
                date_started INTEGER,
                date_finished INTEGER,
                reading_duration INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_user_created ON books(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_books_user_status ON books(user_id, status);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, first_name, last_name, avatar,
                                theme, default_status, is_admin, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.first_name,
                user.last_name,
                user.avatar,
                user.preferences.theme.as_str(),
                user.preferences.default_status.as_str(),
                user.is_admin,
                user.created_at.timestamp_millis(),
                user.last_login.map(|t| t.timestamp_millis()),
            ],
        )
        .map_err(|e| {
            let message = e.to_string();
            if message.contains("UNIQUE constraint") {
                if message.contains("users.email") {
                    AppError::DuplicateKey("Email already registered".to_string())
                } else {
                    AppError::DuplicateKey(format!("Username '{}' already exists", user.username))
                }
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    fn query_user(&self, clause: &str, value: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, clause),
            params![value],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.query_user("id", id)
    }

    /// Get user by (normalized) email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_user("email", email)
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.query_user("username", username)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users ORDER BY username",
                USER_COLUMNS
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Update user password hash.
    pub fn update_user_password(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update names, avatar and preferences.
    pub fn update_user_profile(&self, user: &User) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET first_name = ?1, last_name = ?2, avatar = ?3,
                                  theme = ?4, default_status = ?5
                 WHERE id = ?6",
                params![
                    user.first_name,
                    user.last_name,
                    user.avatar,
                    user.preferences.theme.as_str(),
                    user.preferences.default_status.as_str(),
                    user.id,
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update profile: {}", e)))?;
        Ok(rows > 0)
    }

    /// Grant or revoke the administrator flag.
    pub fn set_user_admin(&self, username: &str, is_admin: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET is_admin = ?1 WHERE username = ?2",
                params![is_admin, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update user: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![at.timestamp_millis(), user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Recount a user's books by status and overwrite the cached snapshot.
    ///
    /// Returns `None` when the user does not exist.
    pub fn recompute_user_stats(&self, user_id: &str) -> Result<Option<UserStats>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM books WHERE user_id = ?1 GROUP BY status")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let groups = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })
            .map_err(|e| AppError::Internal(format!("Failed to count books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to count books: {}", e)))?;

        let mut stats = UserStats::default();
        for (status, count) in groups {
            stats.total_books += count;
            match status.parse::<ReadingStatus>() {
                Ok(ReadingStatus::ToRead) => stats.want_to_read += count,
                Ok(ReadingStatus::Reading) => stats.currently_reading += count,
                Ok(ReadingStatus::Read) => stats.books_read += count,
                Err(_) => {}
            }
        }

        let rows = conn
            .execute(
                "UPDATE users SET total_books = ?1, books_read = ?2, currently_reading = ?3,
                                  want_to_read = ?4
                 WHERE id = ?5",
                params![
                    stats.total_books,
                    stats.books_read,
                    stats.currently_reading,
                    stats.want_to_read,
                    user_id,
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update stats: {}", e)))?;

        Ok((rows > 0).then_some(stats))
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a new book.
    pub fn insert_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO books ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                 ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
                BOOK_COLUMNS
            ),
            params![
                book.id,
                book.user_id,
                book.title,
                book.author,
                book.status.as_str(),
                book.genre,
                book.description,
                book.isbn,
                book.published_date,
                book.page_count,
                book.current_page,
                book.rating,
                book.notes,
                book.cover_image,
                tags_to_json(&book.tags)?,
                book.series_name,
                book.series_number,
                book.language,
                book.format.map(|f| f.as_str()),
                book.purchase_date.map(|d| d.to_string()),
                book.purchase_price,
                book.location,
                book.date_started.map(|t| t.timestamp_millis()),
                book.date_finished.map(|t| t.timestamp_millis()),
                book.reading_duration,
                book.created_at.timestamp_millis(),
                book.updated_at.timestamp_millis(),
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save book: {}", e)))?;
        Ok(())
    }

    /// Overwrite a book owned by `book.user_id`. Returns false if no such row.
    pub fn update_book(&self, book: &Book) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET
                    title = ?3, author = ?4, status = ?5, genre = ?6, description = ?7,
                    isbn = ?8, published_date = ?9, page_count = ?10, current_page = ?11,
                    rating = ?12, notes = ?13, cover_image = ?14, tags_json = ?15,
                    series_name = ?16, series_number = ?17, language = ?18, format = ?19,
                    purchase_date = ?20, purchase_price = ?21, location = ?22,
                    date_started = ?23, date_finished = ?24, reading_duration = ?25,
                    updated_at = ?26
                 WHERE id = ?1 AND user_id = ?2",
                params![
                    book.id,
                    book.user_id,
                    book.title,
                    book.author,
                    book.status.as_str(),
                    book.genre,
                    book.description,
                    book.isbn,
                    book.published_date,
                    book.page_count,
                    book.current_page,
                    book.rating,
                    book.notes,
                    book.cover_image,
                    tags_to_json(&book.tags)?,
                    book.series_name,
                    book.series_number,
                    book.language,
                    book.format.map(|f| f.as_str()),
                    book.purchase_date.map(|d| d.to_string()),
                    book.purchase_price,
                    book.location,
                    book.date_started.map(|t| t.timestamp_millis()),
                    book.date_finished.map(|t| t.timestamp_millis()),
                    book.reading_duration,
                    book.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Get a book by ID, scoped to its owner.
    pub fn get_book(&self, user_id: &str, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM books WHERE id = ?1 AND user_id = ?2",
                BOOK_COLUMNS
            ),
            params![id, user_id],
            Self::row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// All books of a user, newest first.
    pub fn list_books(&self, user_id: &str) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM books WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
                BOOK_COLUMNS
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![user_id], Self::row_to_book)
            .map_err(|e| AppError::Internal(format!("Failed to get books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Delete a book, scoped to its owner.
    pub fn delete_book(&self, user_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM books WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Aggregate statistics over a user's books.
    ///
    /// `year_start` is the millisecond timestamp from which finished books count
    /// towards `read_this_year`.
    pub fn book_stats(&self, user_id: &str, year_start: i64) -> Result<BookStats> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*),
                    AVG(rating),
                    COALESCE(SUM(page_count), 0),
                    COALESCE(SUM(CASE WHEN status = 'Read' THEN page_count END), 0),
                    COUNT(CASE WHEN status = 'Read' AND date_finished >= ?2 THEN 1 END),
                    COUNT(CASE WHEN status = 'To Read' THEN 1 END),
                    COUNT(CASE WHEN status = 'Reading' THEN 1 END),
                    COUNT(CASE WHEN status = 'Read' THEN 1 END)
             FROM books WHERE user_id = ?1",
            params![user_id, year_start],
            |row| {
                let average: Option<f64> = row.get(1)?;
                Ok(BookStats {
                    total_books: row.get(0)?,
                    average_rating: average.map(|a| (a * 10.0).round() / 10.0),
                    total_pages: row.get::<_, i64>(2)?.max(0) as u64,
                    pages_read: row.get::<_, i64>(3)?.max(0) as u64,
                    read_this_year: row.get(4)?,
                    by_status: StatusCounts {
                        to_read: row.get(5)?,
                        reading: row.get(6)?,
                        read: row.get(7)?,
                    },
                })
            },
        )
        .map_err(|e| AppError::Internal(format!("Failed to compute stats: {}", e)))
    }

    /// Distinct non-empty values of a column for a user.
    pub fn distinct_values(&self, user_id: &str, field: DistinctField) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let column = field.column();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT {column} FROM books
                 WHERE user_id = ?1 AND {column} IS NOT NULL AND TRIM({column}) != ''
                 ORDER BY {column}"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let values = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Internal(format!("Failed to list values: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect values: {}", e)))?;

        Ok(values)
    }

    // ========== ROW MAPPING ==========

    fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            first_name: row.get(4)?,
            last_name: row.get(5)?,
            avatar: row.get(6)?,
            preferences: Preferences {
                theme: parse_column(row, 7)?,
                default_status: parse_column(row, 8)?,
            },
            stats: UserStats {
                total_books: row.get(9)?,
                books_read: row.get(10)?,
                currently_reading: row.get(11)?,
                want_to_read: row.get(12)?,
            },
            is_admin: row.get(13)?,
            created_at: millis_to_datetime(row.get(14)?),
            last_login: row.get::<_, Option<i64>>(15)?.map(millis_to_datetime),
        })
    }

    fn row_to_book(row: &Row<'_>) -> rusqlite::Result<Book> {
        let tags_json: String = row.get(14)?;
        let tags = serde_json::from_str(&tags_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?;

        let format = match row.get::<_, Option<String>>(18)? {
            Some(_) => Some(parse_column(row, 18)?),
            None => None,
        };

        let purchase_date = match row.get::<_, Option<String>>(19)? {
            Some(s) => Some(NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(19, Type::Text, Box::new(e))
            })?),
            None => None,
        };

        let mut book = Book {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            status: parse_column(row, 4)?,
            genre: row.get(5)?,
            description: row.get(6)?,
            isbn: row.get(7)?,
            published_date: row.get(8)?,
            page_count: row.get(9)?,
            current_page: row.get(10)?,
            rating: row.get(11)?,
            notes: row.get(12)?,
            cover_image: row.get(13)?,
            tags,
            series_name: row.get(15)?,
            series_number: row.get(16)?,
            language: row.get(17)?,
            format,
            purchase_date,
            purchase_price: row.get(20)?,
            location: row.get(21)?,
            date_started: row.get::<_, Option<i64>>(22)?.map(millis_to_datetime),
            date_finished: row.get::<_, Option<i64>>(23)?.map(millis_to_datetime),
            reading_duration: row.get(24)?,
            progress: 0,
            created_at: millis_to_datetime(row.get(25)?),
            updated_at: millis_to_datetime(row.get(26)?),
        };
        book.progress = book.compute_progress();
        Ok(book)
    }
}

/// Parse a text column through `FromStr`.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let value: String = row.get(idx)?;
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn tags_to_json(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags)
        .map_err(|e| AppError::Internal(format!("Failed to encode tags: {}", e)))
}
