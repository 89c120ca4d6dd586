//! Book record model and the status-transition rule.

use crate::library::validate::BookDraft;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Reading status of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadingStatus {
    /// Not started yet.
    #[default]
    #[serde(rename = "To Read")]
    ToRead,
    /// Currently being read.
    #[serde(rename = "Reading")]
    Reading,
    /// Finished.
    #[serde(rename = "Read")]
    Read,
}

impl ReadingStatus {
    /// All statuses, in display order.
    pub const ALL: [ReadingStatus; 3] = [
        ReadingStatus::ToRead,
        ReadingStatus::Reading,
        ReadingStatus::Read,
    ];

    /// The literal stored and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::ToRead => "To Read",
            ReadingStatus::Reading => "Reading",
            ReadingStatus::Read => "Read",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReadingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown status: {}", s))
    }
}

/// Physical form of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookFormat {
    /// Printed copy.
    Physical,
    /// Electronic copy.
    Ebook,
    /// Audio recording.
    Audiobook,
}

impl BookFormat {
    /// All formats.
    pub const ALL: [BookFormat; 3] = [
        BookFormat::Physical,
        BookFormat::Ebook,
        BookFormat::Audiobook,
    ];

    /// The literal stored and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Physical => "Physical",
            BookFormat::Ebook => "Ebook",
            BookFormat::Audiobook => "Audiobook",
        }
    }
}

impl FromStr for BookFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| format!("Unknown format: {}", s))
    }
}

/// A book in a user's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Unique identifier.
    pub id: String,
    /// Owning user. Never changes after creation.
    pub user_id: String,
    /// Book title.
    pub title: String,
    /// Author name(s).
    pub author: String,
    /// Reading status.
    pub status: ReadingStatus,
    /// Genre.
    pub genre: Option<String>,
    /// Description or summary.
    pub description: Option<String>,
    /// ISBN, digits only.
    pub isbn: Option<String>,
    /// Publication date as entered.
    pub published_date: Option<String>,
    /// Number of pages.
    pub page_count: Option<u32>,
    /// Page the reader is on.
    pub current_page: Option<u32>,
    /// Rating from 1 to 5.
    pub rating: Option<u8>,
    /// Personal notes.
    pub notes: Option<String>,
    /// Public path of the uploaded cover (`/uploads/...`).
    pub cover_image: Option<String>,
    /// Free-form tags, in submission order.
    pub tags: Vec<String>,
    /// Series name.
    pub series_name: Option<String>,
    /// Position in series.
    pub series_number: Option<f64>,
    /// Language.
    pub language: Option<String>,
    /// Physical form.
    pub format: Option<BookFormat>,
    /// Date of purchase.
    pub purchase_date: Option<NaiveDate>,
    /// Price paid.
    pub purchase_price: Option<f64>,
    /// Shelf or storage location.
    pub location: Option<String>,
    /// First time the status became Reading.
    pub date_started: Option<DateTime<Utc>>,
    /// First time the status became Read.
    pub date_finished: Option<DateTime<Utc>>,
    /// Days between start and finish, rounded up.
    pub reading_duration: Option<i64>,
    /// Reading progress percentage.
    pub progress: u8,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Build a new book from a validated draft.
    pub fn from_draft(user_id: &str, draft: BookDraft, now: DateTime<Utc>) -> Self {
        let mut book = Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: String::new(),
            author: String::new(),
            status: ReadingStatus::default(),
            genre: None,
            description: None,
            isbn: None,
            published_date: None,
            page_count: None,
            current_page: None,
            rating: None,
            notes: None,
            cover_image: None,
            tags: Vec::new(),
            series_name: None,
            series_number: None,
            language: None,
            format: None,
            purchase_date: None,
            purchase_price: None,
            location: None,
            date_started: None,
            date_finished: None,
            reading_duration: None,
            progress: 0,
            created_at: now,
            updated_at: now,
        };
        book.apply_draft(draft, now);
        book
    }

    /// Overwrite the editable fields and re-evaluate derived ones.
    pub fn apply_draft(&mut self, draft: BookDraft, now: DateTime<Utc>) {
        self.title = draft.title;
        self.author = draft.author;
        self.status = draft.status;
        self.genre = draft.genre;
        self.description = draft.description;
        self.isbn = draft.isbn;
        self.published_date = draft.published_date;
        self.page_count = draft.page_count;
        self.current_page = draft.current_page;
        self.rating = draft.rating;
        self.notes = draft.notes;
        self.tags = draft.tags;
        self.series_name = draft.series_name;
        self.series_number = draft.series_number;
        self.language = draft.language;
        self.format = draft.format;
        self.purchase_date = draft.purchase_date;
        self.purchase_price = draft.purchase_price;
        self.location = draft.location;
        self.updated_at = now;

        self.apply_status_transition(now);
        self.progress = self.compute_progress();
    }

    /// Editable fields of this book, as the base for a partial update.
    pub fn draft(&self) -> BookDraft {
        BookDraft {
            title: self.title.clone(),
            author: self.author.clone(),
            status: self.status,
            genre: self.genre.clone(),
            description: self.description.clone(),
            isbn: self.isbn.clone(),
            published_date: self.published_date.clone(),
            page_count: self.page_count,
            current_page: self.current_page,
            rating: self.rating,
            notes: self.notes.clone(),
            tags: self.tags.clone(),
            series_name: self.series_name.clone(),
            series_number: self.series_number,
            language: self.language.clone(),
            format: self.format,
            purchase_date: self.purchase_date,
            purchase_price: self.purchase_price,
            location: self.location.clone(),
        }
    }

    /// Stamp start/finish dates the first time their status is reached.
    ///
    /// Dates already recorded are never overwritten, so the duration is
    /// computed exactly once, when the finish date is first stamped.
    pub fn apply_status_transition(&mut self, now: DateTime<Utc>) {
        match self.status {
            ReadingStatus::Reading if self.date_started.is_none() => {
                self.date_started = Some(now);
            }
            ReadingStatus::Read if self.date_finished.is_none() => {
                self.date_finished = Some(now);
                if let Some(started) = self.date_started {
                    self.reading_duration = Some(duration_days(started, now));
                }
            }
            _ => {}
        }
    }

    /// Progress percentage derived from status and pages.
    pub fn compute_progress(&self) -> u8 {
        if self.status == ReadingStatus::Read {
            return 100;
        }
        match (self.current_page, self.page_count) {
            (Some(current), Some(total)) if total > 0 => {
                ((current.min(total) as u64 * 100) / total as u64) as u8
            }
            _ => 0,
        }
    }

    /// Case-insensitive substring match over the searchable fields.
    ///
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        let hit = |s: &str| s.to_lowercase().contains(needle);

        hit(&self.title)
            || hit(&self.author)
            || self.genre.as_deref().is_some_and(hit)
            || self.description.as_deref().is_some_and(hit)
            || self.notes.as_deref().is_some_and(hit)
            || self.tags.iter().any(|t| hit(t))
    }
}

/// Whole days from `start` to `finish`, rounded up. Never negative.
pub fn duration_days(start: DateTime<Utc>, finish: DateTime<Utc>) -> i64 {
    let millis = (finish - start).num_milliseconds().max(0);
    (millis + DAY_MILLIS - 1) / DAY_MILLIS
}
