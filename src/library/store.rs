//! Per-user book store.
//!
//! Every operation is scoped by the owning user: another user's book is
//! reported as not found. Successful mutations are announced to registered
//! [`BookObserver`]s after the write has been committed.

use crate::auth::AuthService;
use crate::db::{self, BookStats, Database, DistinctField};
use crate::error::{AppError, Result};
use crate::library::book::Book;
use crate::library::validate::{FieldError, RawSubmission, validate_submission};
use crate::uploads::{IncomingFile, UploadStore};
use chrono::{Datelike, NaiveDate, Utc};
use std::sync::Arc;

/// A committed change to a user's collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEvent {
    /// A book was added.
    Created {
        /// Owner.
        user_id: String,
        /// Book.
        book_id: String,
    },
    /// A book was modified.
    Updated {
        /// Owner.
        user_id: String,
        /// Book.
        book_id: String,
    },
    /// A book was removed.
    Deleted {
        /// Owner.
        user_id: String,
        /// Book.
        book_id: String,
    },
}

impl BookEvent {
    /// Owner of the affected book.
    pub fn user_id(&self) -> &str {
        match self {
            BookEvent::Created { user_id, .. }
            | BookEvent::Updated { user_id, .. }
            | BookEvent::Deleted { user_id, .. } => user_id,
        }
    }

    /// Affected book.
    pub fn book_id(&self) -> &str {
        match self {
            BookEvent::Created { book_id, .. }
            | BookEvent::Updated { book_id, .. }
            | BookEvent::Deleted { book_id, .. } => book_id,
        }
    }
}

/// Callback run after a book mutation has been committed.
///
/// Failures are logged by the store and never undo the mutation.
pub trait BookObserver: Send + Sync {
    /// Handle a committed event.
    fn after_commit(&self, event: &BookEvent) -> Result<()>;
}

/// Keeps each user's stats snapshot in line with their books.
pub struct StatsRefresher {
    auth: Arc<AuthService>,
}

impl StatsRefresher {
    /// Create a refresher backed by the credential store.
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self { auth }
    }
}

impl BookObserver for StatsRefresher {
    fn after_commit(&self, event: &BookEvent) -> Result<()> {
        self.auth.recompute_stats(event.user_id())
    }
}

/// Book store.
pub struct BookStore {
    db: Database,
    uploads: UploadStore,
    observers: Vec<Arc<dyn BookObserver>>,
}

fn validation_error(errors: Vec<FieldError>) -> AppError {
    AppError::Validation(errors.into_iter().map(|e| e.message).collect())
}

fn not_found() -> AppError {
    AppError::NotFound("Book not found".to_string())
}

impl BookStore {
    /// Create a store without observers.
    pub fn new(db: Database, uploads: UploadStore) -> Self {
        Self {
            db,
            uploads,
            observers: Vec::new(),
        }
    }

    /// Register a post-commit observer.
    pub fn with_observer(mut self, observer: Arc<dyn BookObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Upload store used for covers.
    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    fn publish(&self, event: BookEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.after_commit(&event) {
                tracing::warn!(
                    user_id = event.user_id(),
                    book_id = event.book_id(),
                    error = %e,
                    "Post-commit observer failed"
                );
            }
        }
    }

    /// Validate a submission and add it to the user's collection.
    pub async fn create(
        &self,
        user_id: &str,
        raw: &RawSubmission,
        cover: Option<IncomingFile>,
    ) -> Result<Book> {
        let draft = validate_submission(raw, None).map_err(validation_error)?;

        let cover_path = match cover {
            Some(file) => Some(self.uploads.store(file).await?),
            None => None,
        };

        let mut book = Book::from_draft(user_id, draft, db::now());
        book.cover_image = cover_path.clone();

        if let Err(e) = self.db.insert_book(&book) {
            if let Some(path) = &cover_path {
                self.uploads.remove(path).await;
            }
            return Err(e);
        }

        tracing::info!(user_id, book_id = %book.id, "Book created");
        self.publish(BookEvent::Created {
            user_id: user_id.to_string(),
            book_id: book.id.clone(),
        });
        Ok(book)
    }

    /// Apply a partial submission to an existing book.
    ///
    /// A new cover replaces the old file; `removeCover=true` drops it.
    pub async fn update(
        &self,
        user_id: &str,
        book_id: &str,
        raw: &RawSubmission,
        cover: Option<IncomingFile>,
    ) -> Result<Book> {
        let existing = self.get(user_id, book_id)?;
        let draft =
            validate_submission(raw, Some(&existing.draft())).map_err(validation_error)?;
        let remove_cover = raw
            .get("removeCover")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        let new_cover = match cover {
            Some(file) => Some(self.uploads.store(file).await?),
            None => None,
        };

        let mut book = existing.clone();
        book.apply_draft(draft, db::now());
        if new_cover.is_some() {
            book.cover_image = new_cover.clone();
        } else if remove_cover {
            book.cover_image = None;
        }

        let written = match self.db.update_book(&book) {
            Ok(true) => Ok(()),
            Ok(false) => Err(not_found()),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Some(path) = &new_cover {
                self.uploads.remove(path).await;
            }
            return Err(e);
        }

        if let Some(old) = &existing.cover_image
            && book.cover_image.as_ref() != Some(old)
        {
            self.uploads.remove(old).await;
        }

        tracing::info!(user_id, book_id, status = %book.status, "Book updated");
        self.publish(BookEvent::Updated {
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
        });
        Ok(book)
    }

    /// Remove a book and its cover. Returns the removed record.
    pub async fn delete(&self, user_id: &str, book_id: &str) -> Result<Book> {
        let existing = self.get(user_id, book_id)?;

        if !self.db.delete_book(user_id, book_id)? {
            return Err(not_found());
        }

        if let Some(cover) = &existing.cover_image {
            self.uploads.remove(cover).await;
        }

        tracing::info!(user_id, book_id, "Book deleted");
        self.publish(BookEvent::Deleted {
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
        });
        Ok(existing)
    }

    /// Fetch one of the user's books.
    pub fn get(&self, user_id: &str, book_id: &str) -> Result<Book> {
        self.db.get_book(user_id, book_id)?.ok_or_else(not_found)
    }

    /// All of the user's books, newest first.
    pub fn list(&self, user_id: &str) -> Result<Vec<Book>> {
        self.db.list_books(user_id)
    }

    /// Case-insensitive substring search over the user's books.
    pub fn search(&self, user_id: &str, query: &str) -> Result<Vec<Book>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(AppError::BadRequest("Search query is required".to_string()));
        }

        Ok(self
            .list(user_id)?
            .into_iter()
            .filter(|book| book.matches(&needle))
            .collect())
    }

    /// Live statistics over the user's books.
    pub fn stats(&self, user_id: &str) -> Result<BookStats> {
        let today = Utc::now().date_naive();
        let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0);
        self.db.book_stats(user_id, year_start)
    }

    /// Distinct genres, sorted.
    pub fn distinct_genres(&self, user_id: &str) -> Result<Vec<String>> {
        self.db.distinct_values(user_id, DistinctField::Genre)
    }

    /// Distinct authors, sorted.
    pub fn distinct_authors(&self, user_id: &str) -> Result<Vec<String>> {
        self.db.distinct_values(user_id, DistinctField::Author)
    }
}
