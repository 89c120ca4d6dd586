//! Book records, submission validation and the per-user store.

pub mod book;
pub mod store;
pub mod validate;

pub use book::{Book, BookFormat, ReadingStatus};
pub use store::{BookEvent, BookObserver, BookStore, StatsRefresher};
pub use validate::{BookDraft, RawSubmission, validate_submission};
