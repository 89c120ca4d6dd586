//! Book submission validation.
//!
//! Clients send loosely typed fields, either as multipart text parts or as a
//! JSON object. Both are collected into a [`RawSubmission`] and turned into a
//! typed [`BookDraft`] by [`validate_submission`] before anything touches the
//! disk or the database.

use crate::library::book::{BookFormat, ReadingStatus};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    /// Loose ISBN shape: digits and hyphens only.
    static ref ISBN_REGEX: Regex = Regex::new(r"^[0-9-]{10,17}$").unwrap();
}

/// Maximum number of tags per book.
pub const MAX_TAGS: usize = 10;
/// Maximum length of a single tag.
pub const MAX_TAG_LEN: usize = 30;

/// Untyped submitted fields.
///
/// Each field may carry several values (repeated multipart parts, JSON arrays).
#[derive(Debug, Clone, Default)]
pub struct RawSubmission {
    fields: HashMap<String, Vec<String>>,
}

impl RawSubmission {
    /// Create an empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for a field.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.push(name, value);
        self
    }

    /// First value of a field, if submitted.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a field, if submitted.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Build from a JSON object body.
    ///
    /// `null` members are treated as absent, arrays become repeated values and
    /// scalars their string form.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "Request body must be a JSON object".to_string())?;

        let mut raw = Self::new();
        for (key, value) in object {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::Array(items) => {
                    // An explicit empty array still counts as submitted.
                    raw.fields.entry(key.clone()).or_default();
                    for item in items.iter().filter_map(scalar_to_string) {
                        raw.push(key.clone(), item);
                    }
                }
                other => {
                    if let Some(s) = scalar_to_string(other) {
                        raw.push(key.clone(), s);
                    }
                }
            }
        }
        Ok(raw)
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Validated, typed book fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookDraft {
    /// Book title.
    pub title: String,
    /// Author name(s).
    pub author: String,
    /// Reading status.
    pub status: ReadingStatus,
    /// Genre.
    pub genre: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// ISBN, digits only.
    pub isbn: Option<String>,
    /// Publication date as entered.
    pub published_date: Option<String>,
    /// Number of pages.
    pub page_count: Option<u32>,
    /// Current page.
    pub current_page: Option<u32>,
    /// Rating 1-5.
    pub rating: Option<u8>,
    /// Notes.
    pub notes: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Series name.
    pub series_name: Option<String>,
    /// Position in series.
    pub series_number: Option<f64>,
    /// Language.
    pub language: Option<String>,
    /// Format.
    pub format: Option<BookFormat>,
    /// Purchase date.
    pub purchase_date: Option<NaiveDate>,
    /// Purchase price.
    pub purchase_price: Option<f64>,
    /// Shelf location.
    pub location: Option<String>,
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Submitted field name.
    pub field: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

struct Checker<'a> {
    raw: &'a RawSubmission,
    errors: Vec<FieldError>,
}

impl Checker<'_> {
    fn fail(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    /// Submitted value, trimmed. `Some("")` means "clear".
    fn value(&self, field: &str) -> Option<String> {
        self.raw.get(field).map(|v| v.trim().to_string())
    }

    fn text(
        &mut self,
        field: &'static str,
        label: &str,
        max: usize,
        base: Option<String>,
    ) -> Option<String> {
        let Some(value) = self.value(field) else {
            return base;
        };
        if value.is_empty() {
            return None;
        }
        if value.chars().count() > max {
            self.fail(
                field,
                format!("{} must be at most {} characters", label, max),
            );
            return base;
        }
        Some(value)
    }

    fn required_text(
        &mut self,
        field: &'static str,
        label: &str,
        max: usize,
        base: Option<String>,
    ) -> String {
        match self.text(field, label, max, base) {
            Some(value) => value,
            None => {
                if !self.errors.iter().any(|e| e.field == field) {
                    self.fail(field, format!("{} is required", label));
                }
                String::new()
            }
        }
    }

    fn integer(
        &mut self,
        field: &'static str,
        label: &str,
        min: i64,
        max: i64,
        base: Option<i64>,
    ) -> Option<i64> {
        let Some(value) = self.value(field) else {
            return base;
        };
        if value.is_empty() {
            return None;
        }
        match value.parse::<i64>() {
            Ok(n) if (min..=max).contains(&n) => Some(n),
            Ok(_) => {
                self.fail(
                    field,
                    format!("{} must be between {} and {}", label, min, max),
                );
                base
            }
            Err(_) => {
                self.fail(field, format!("{} must be a whole number", label));
                base
            }
        }
    }

    fn non_negative(&mut self, field: &'static str, label: &str, base: Option<f64>) -> Option<f64> {
        let Some(value) = self.value(field) else {
            return base;
        };
        if value.is_empty() {
            return None;
        }
        match value.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => Some(n),
            Ok(_) => {
                self.fail(field, format!("{} must be zero or greater", label));
                base
            }
            Err(_) => {
                self.fail(field, format!("{} must be a number", label));
                base
            }
        }
    }

    fn status(&mut self, base: Option<ReadingStatus>) -> ReadingStatus {
        let fallback = base.unwrap_or_default();
        match self.value("status") {
            None => fallback,
            Some(v) if v.is_empty() => fallback,
            Some(v) => v.parse().unwrap_or_else(|_| {
                self.fail("status", "Status must be one of: To Read, Reading, Read");
                fallback
            }),
        }
    }

    fn format(&mut self, base: Option<BookFormat>) -> Option<BookFormat> {
        let Some(value) = self.value("format") else {
            return base;
        };
        if value.is_empty() {
            return None;
        }
        match value.parse() {
            Ok(format) => Some(format),
            Err(_) => {
                self.fail("format", "Format must be one of: Physical, Ebook, Audiobook");
                base
            }
        }
    }

    fn isbn(&mut self, base: Option<String>) -> Option<String> {
        let Some(value) = self.value("isbn") else {
            return base;
        };
        if value.is_empty() {
            return None;
        }
        let digits: String = value.chars().filter(|c| *c != '-').collect();
        if !ISBN_REGEX.is_match(&value) || !matches!(digits.len(), 10 | 13) {
            self.fail("isbn", "ISBN must be 10 or 13 digits");
            return base;
        }
        Some(digits)
    }

    fn purchase_date(&mut self, base: Option<NaiveDate>) -> Option<NaiveDate> {
        let Some(value) = self.value("purchaseDate") else {
            return base;
        };
        if value.is_empty() {
            return None;
        }
        // Accept full timestamps by keeping only the date part.
        let date_part = value.split('T').next().unwrap_or(&value);
        match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                self.fail("purchaseDate", "Purchase date must be a date (YYYY-MM-DD)");
                base
            }
        }
    }

    fn tags(&mut self, base: Vec<String>) -> Vec<String> {
        let Some(values) = self.raw.get_all("tags") else {
            return base;
        };

        let tags: Vec<String> = values.iter().flat_map(|v| split_tags(v)).collect();

        if tags.len() > MAX_TAGS {
            self.fail("tags", format!("At most {} tags are allowed", MAX_TAGS));
            return base;
        }
        if tags.iter().any(|t| t.chars().count() > MAX_TAG_LEN) {
            self.fail(
                "tags",
                format!("Each tag must be at most {} characters", MAX_TAG_LEN),
            );
            return base;
        }
        tags
    }
}

/// Split one submitted tags value: a JSON array string or a comma list.
fn split_tags(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.starts_with('[')
        && let Ok(list) = serde_json::from_str::<Vec<String>>(value)
    {
        return list
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    value
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Validate a submission, merging it over `base` for updates.
///
/// On create `base` is `None` and missing fields take their defaults. On update
/// absent fields keep the stored value and an empty string clears an optional
/// one. Fields not listed here are ignored.
pub fn validate_submission(
    raw: &RawSubmission,
    base: Option<&BookDraft>,
) -> Result<BookDraft, Vec<FieldError>> {
    let b = base;
    let mut c = Checker {
        raw,
        errors: Vec::new(),
    };

    let title = c.required_text("title", "Title", 200, b.map(|d| d.title.clone()));
    let author = c.required_text("author", "Author", 100, b.map(|d| d.author.clone()));
    let status = c.status(b.map(|d| d.status));
    let genre = c.text("genre", "Genre", 50, b.and_then(|d| d.genre.clone()));
    let description = c.text(
        "description",
        "Description",
        2000,
        b.and_then(|d| d.description.clone()),
    );
    let isbn = c.isbn(b.and_then(|d| d.isbn.clone()));
    let published_date = c.text(
        "publishedDate",
        "Published date",
        50,
        b.and_then(|d| d.published_date.clone()),
    );
    let page_count = c
        .integer(
            "pageCount",
            "Page count",
            1,
            50_000,
            b.and_then(|d| d.page_count).map(i64::from),
        )
        .map(|n| n as u32);
    let current_page = c
        .integer(
            "currentPage",
            "Current page",
            0,
            50_000,
            b.and_then(|d| d.current_page).map(i64::from),
        )
        .map(|n| n as u32);
    let rating = c
        .integer("rating", "Rating", 1, 5, b.and_then(|d| d.rating).map(i64::from))
        .map(|n| n as u8);
    let notes = c.text("notes", "Notes", 5000, b.and_then(|d| d.notes.clone()));
    let tags = c.tags(b.map(|d| d.tags.clone()).unwrap_or_default());
    let series_name = c.text(
        "seriesName",
        "Series name",
        100,
        b.and_then(|d| d.series_name.clone()),
    );
    let series_number = c.non_negative(
        "seriesNumber",
        "Series number",
        b.and_then(|d| d.series_number),
    );
    let language = c.text(
        "language",
        "Language",
        50,
        b.and_then(|d| d.language.clone()),
    );
    let format = c.format(b.and_then(|d| d.format));
    let purchase_date = c.purchase_date(b.and_then(|d| d.purchase_date));
    let purchase_price = c.non_negative(
        "purchasePrice",
        "Purchase price",
        b.and_then(|d| d.purchase_price),
    );
    let location = c.text(
        "location",
        "Location",
        100,
        b.and_then(|d| d.location.clone()),
    );

    if let (Some(current), Some(total)) = (current_page, page_count)
        && current > total
    {
        if raw.get("currentPage").is_none() && raw.get("pageCount").is_some() {
            c.fail("pageCount", "Page count cannot be less than current page");
        } else {
            c.fail("currentPage", "Current page cannot exceed page count");
        }
    }

    if !c.errors.is_empty() {
        return Err(c.errors);
    }

    Ok(BookDraft {
        title,
        author,
        status,
        genre,
        description,
        isbn,
        published_date,
        page_count,
        current_page,
        rating,
        notes,
        tags,
        series_name,
        series_number,
        language,
        format,
        purchase_date,
        purchase_price,
        location,
    })
}
