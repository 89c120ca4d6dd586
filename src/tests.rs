use crate::auth::{AuthService, Registration};
use crate::config::{Config, UploadsConfig};
use crate::db::{Database, DistinctField, Preferences, User, UserStats};
use crate::error::{AppError, Result};
use crate::library::store::{BookEvent, BookObserver, BookStore, StatsRefresher};
use crate::library::{Book, BookDraft, RawSubmission, ReadingStatus};
use crate::server::{AppState, create_router};
use crate::uploads::{IncomingFile, UploadStore};
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{Value, json};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn make_user(id: &str, username: &str, email: &str) -> User {
    User {
        id: id.to_string(),
        username: username.to_string(),
        email: email.to_string(),
        password_hash: "hash".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        avatar: None,
        preferences: Preferences::default(),
        stats: UserStats::default(),
        is_admin: false,
        created_at: Utc::now(),
        last_login: None,
    }
}

fn make_book(user_id: &str, title: &str, author: &str) -> Book {
    let draft = BookDraft {
        title: title.to_string(),
        author: author.to_string(),
        ..BookDraft::default()
    };
    Book::from_draft(user_id, draft, Utc::now())
}

fn registration(username: &str) -> Registration {
    Registration {
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password: "secret1".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
    }
}

fn test_auth(db: &Database) -> Arc<AuthService> {
    let mut config = Config::default();
    config.auth.jwt_secret = "test-secret".to_string();
    Arc::new(AuthService::new(db.clone(), &config.auth))
}

fn upload_store(dir: &Path, max_bytes: u64) -> UploadStore {
    UploadStore::new(&UploadsConfig {
        dir: dir.to_path_buf(),
        max_bytes,
    })
    .unwrap()
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

fn png_bytes(width: u32, height: u32) -> Bytes {
    let mut data = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
        .unwrap();
    Bytes::from(data)
}

fn png_cover() -> IncomingFile {
    IncomingFile {
        file_name: Some("cover.png".to_string()),
        content_type: Some("image/png".to_string()),
        data: png_bytes(20, 30),
    }
}

// ========== DATABASE ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();

    let by_id = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(by_id.username, "alice");
    assert_eq!(by_id.preferences, Preferences::default());

    let by_email = db.get_user_by_email("alice@example.com").unwrap().unwrap();
    assert_eq!(by_email.id, "user-1");
    assert!(db.get_user_by_username("bob").unwrap().is_none());
}

#[test]
fn db_duplicate_keys_rejected() {
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();

    let same_email = db.create_user(&make_user("user-2", "alice2", "alice@example.com"));
    assert!(matches!(same_email, Err(AppError::DuplicateKey(_))));

    let same_name = db.create_user(&make_user("user-3", "alice", "other@example.com"));
    assert!(matches!(same_name, Err(AppError::DuplicateKey(_))));
}

#[test]
fn db_book_roundtrip_keeps_tag_order() {
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();

    let mut book = make_book("user-1", "Dune", "Frank Herbert");
    book.tags = vec!["sf".to_string(), "classic".to_string(), "desert".to_string()];
    book.page_count = Some(412);
    db.insert_book(&book).unwrap();

    let stored = db.get_book("user-1", &book.id).unwrap().unwrap();
    assert_eq!(stored.tags, vec!["sf", "classic", "desert"]);
    assert_eq!(stored.page_count, Some(412));
    assert_eq!(stored.status, ReadingStatus::ToRead);
}

#[test]
fn db_books_scoped_by_owner() {
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();
    db.create_user(&make_user("user-2", "bob", "bob@example.com"))
        .unwrap();

    let book = make_book("user-1", "Dune", "Frank Herbert");
    db.insert_book(&book).unwrap();

    assert!(db.get_book("user-2", &book.id).unwrap().is_none());
    assert!(db.list_books("user-2").unwrap().is_empty());
    assert!(!db.delete_book("user-2", &book.id).unwrap());

    let mut foreign = book.clone();
    foreign.user_id = "user-2".to_string();
    foreign.title = "Hijacked".to_string();
    assert!(!db.update_book(&foreign).unwrap());
    assert_eq!(db.get_book("user-1", &book.id).unwrap().unwrap().title, "Dune");
}

#[test]
fn db_list_newest_first() {
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();

    for title in ["First", "Second", "Third"] {
        db.insert_book(&make_book("user-1", title, "Someone")).unwrap();
    }

    let titles: Vec<String> = db
        .list_books("user-1")
        .unwrap()
        .into_iter()
        .map(|b| b.title)
        .collect();
    assert_eq!(titles, vec!["Third", "Second", "First"]);
}

#[test]
fn db_stats_and_distinct_values() {
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();

    let now = Utc::now();
    let mut read = make_book("user-1", "Dune", "Frank Herbert");
    read.status = ReadingStatus::Read;
    read.date_finished = Some(now);
    read.page_count = Some(400);
    read.rating = Some(5);
    read.genre = Some("Science Fiction".to_string());

    let mut reading = make_book("user-1", "Emma", "Jane Austen");
    reading.status = ReadingStatus::Reading;
    reading.page_count = Some(300);
    reading.rating = Some(4);
    reading.genre = Some("Classic".to_string());

    let mut queued = make_book("user-1", "Persuasion", "Jane Austen");
    queued.genre = Some("  ".to_string());

    for book in [&read, &reading, &queued] {
        db.insert_book(book).unwrap();
    }

    let stats = db.book_stats("user-1", 0).unwrap();
    assert_eq!(stats.total_books, 3);
    assert_eq!(stats.average_rating, Some(4.5));
    assert_eq!(stats.total_pages, 700);
    assert_eq!(stats.pages_read, 400);
    assert_eq!(stats.read_this_year, 1);
    assert_eq!(stats.by_status.to_read, 1);
    assert_eq!(stats.by_status.reading, 1);
    assert_eq!(stats.by_status.read, 1);

    let future = (now + chrono::Duration::days(1)).timestamp_millis();
    assert_eq!(db.book_stats("user-1", future).unwrap().read_this_year, 0);

    assert_eq!(
        db.distinct_values("user-1", DistinctField::Genre).unwrap(),
        vec!["Classic", "Science Fiction"]
    );
    assert_eq!(
        db.distinct_values("user-1", DistinctField::Author).unwrap(),
        vec!["Frank Herbert", "Jane Austen"]
    );

    let empty = db.book_stats("nobody", 0).unwrap();
    assert_eq!(empty.total_books, 0);
    assert_eq!(empty.average_rating, None);
}

#[test]
fn db_recompute_user_stats() {
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();

    let mut reading = make_book("user-1", "Emma", "Jane Austen");
    reading.status = ReadingStatus::Reading;
    db.insert_book(&reading).unwrap();
    db.insert_book(&make_book("user-1", "Persuasion", "Jane Austen"))
        .unwrap();

    let stats = db.recompute_user_stats("user-1").unwrap().unwrap();
    assert_eq!(stats.total_books, 2);
    assert_eq!(stats.currently_reading, 1);
    assert_eq!(stats.want_to_read, 1);
    assert_eq!(stats.books_read, 0);

    let user = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(user.stats, stats);

    assert!(db.recompute_user_stats("missing").unwrap().is_none());
}

// ========== AUTH ==========

#[test]
fn auth_register_and_login() {
    let db = test_db();
    let auth = test_auth(&db);

    let user = auth.register(&registration("alice")).unwrap();
    assert!(!user.is_admin);

    let (logged_in, token) = auth.authenticate("ALICE@example.com ", "secret1").unwrap();
    assert_eq!(logged_in.id, user.id);
    assert!(logged_in.last_login.is_some());
    assert_eq!(auth.user_from_token(&token).unwrap().id, user.id);

    let wrong = auth.authenticate("alice@example.com", "nope");
    assert!(matches!(wrong, Err(AppError::Unauthenticated(_))));
}

#[test]
fn auth_registration_validation_collects_errors() {
    let db = test_db();
    let auth = test_auth(&db);

    let err = auth
        .register(&Registration {
            username: "a".to_string(),
            email: "not-an-email".to_string(),
            password: "123".to_string(),
            first_name: String::new(),
            last_name: "User".to_string(),
        })
        .unwrap_err();
    match err {
        AppError::Validation(details) => assert_eq!(details.len(), 4),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn auth_registration_disabled() {
    let db = test_db();
    let mut config = Config::default();
    config.auth.jwt_secret = "test-secret".to_string();
    config.auth.registration = "disabled".to_string();
    let auth = AuthService::new(db, &config.auth);

    assert!(matches!(
        auth.register(&registration("alice")),
        Err(AppError::Forbidden(_))
    ));
    assert!(auth.create_user(&registration("admin"), true).unwrap().is_admin);
}

#[test]
fn auth_token_for_deleted_user_rejected() {
    let db = test_db();
    let auth = test_auth(&db);

    let token = auth.issue_token("ghost").unwrap();
    assert!(matches!(
        auth.user_from_token(&token),
        Err(AppError::Unauthenticated(msg)) if msg == "User no longer exists"
    ));
}

#[test]
fn auth_change_password() {
    let db = test_db();
    let auth = test_auth(&db);
    let user = auth.register(&registration("alice")).unwrap();

    assert!(matches!(
        auth.change_password(&user.id, "wrong", "newsecret"),
        Err(AppError::Unauthenticated(_))
    ));
    assert!(matches!(
        auth.change_password(&user.id, "secret1", "abc"),
        Err(AppError::Validation(_))
    ));

    auth.change_password(&user.id, "secret1", "newsecret").unwrap();
    assert!(auth.authenticate("alice@example.com", "secret1").is_err());
    assert!(auth.authenticate("alice@example.com", "newsecret").is_ok());
}

// ========== BOOK STORE ==========

struct Fixture {
    _dir: tempfile::TempDir,
    uploads_dir: std::path::PathBuf,
    auth: Arc<AuthService>,
    books: BookStore,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let uploads_dir = dir.path().join("uploads");
    let db = test_db();
    let auth = test_auth(&db);
    let books = BookStore::new(db, upload_store(&uploads_dir, 1024 * 1024))
        .with_observer(Arc::new(StatsRefresher::new(auth.clone())));
    Fixture {
        _dir: dir,
        uploads_dir,
        auth,
        books,
    }
}

fn submission(title: &str, author: &str) -> RawSubmission {
    RawSubmission::new()
        .with("title", title)
        .with("author", author)
}

#[tokio::test]
async fn store_mutations_refresh_stats_snapshot() {
    let fx = fixture();
    let alice = fx.auth.register(&registration("alice")).unwrap();

    let book = fx
        .books
        .create(
            &alice.id,
            &submission("Emma", "Jane Austen").with("status", "Reading"),
            None,
        )
        .await
        .unwrap();
    let stats = fx.auth.get_user(&alice.id).unwrap().stats;
    assert_eq!(stats.total_books, 1);
    assert_eq!(stats.currently_reading, 1);

    fx.books
        .update(
            &alice.id,
            &book.id,
            &RawSubmission::new().with("status", "Read"),
            None,
        )
        .await
        .unwrap();
    let stats = fx.auth.get_user(&alice.id).unwrap().stats;
    assert_eq!(stats.books_read, 1);
    assert_eq!(stats.currently_reading, 0);

    fx.books.delete(&alice.id, &book.id).await.unwrap();
    assert_eq!(fx.auth.get_user(&alice.id).unwrap().stats, UserStats::default());
}

#[tokio::test]
async fn store_status_transitions_stamp_dates() {
    let fx = fixture();
    let alice = fx.auth.register(&registration("alice")).unwrap();

    let created = fx
        .books
        .create(&alice.id, &submission("Emma", "Jane Austen"), None)
        .await
        .unwrap();
    assert_eq!(created.status, ReadingStatus::ToRead);
    assert!(created.date_started.is_none());

    let reading = fx
        .books
        .update(
            &alice.id,
            &created.id,
            &RawSubmission::new().with("status", "Reading"),
            None,
        )
        .await
        .unwrap();
    let started = reading.date_started.unwrap().timestamp_millis();

    let finished = fx
        .books
        .update(
            &alice.id,
            &created.id,
            &RawSubmission::new().with("status", "Read"),
            None,
        )
        .await
        .unwrap();
    let millis = |d: Option<chrono::DateTime<Utc>>| d.map(|d| d.timestamp_millis());
    assert_eq!(millis(finished.date_started), Some(started));
    assert!(finished.date_finished.is_some());
    assert!(finished.reading_duration.unwrap() >= 0);
    assert_eq!(finished.progress, 100);

    // Editing other fields leaves the stamps alone.
    let edited = fx
        .books
        .update(
            &alice.id,
            &created.id,
            &RawSubmission::new().with("notes", "Loved it"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(millis(edited.date_finished), millis(finished.date_finished));
    assert_eq!(edited.reading_duration, finished.reading_duration);
    assert_eq!(edited.title, "Emma");
}

#[tokio::test]
async fn store_cross_user_access_is_not_found() {
    let fx = fixture();
    let alice = fx.auth.register(&registration("alice")).unwrap();
    let bob = fx.auth.register(&registration("bob")).unwrap();

    let book = fx
        .books
        .create(&alice.id, &submission("Emma", "Jane Austen"), None)
        .await
        .unwrap();

    assert!(matches!(fx.books.get(&bob.id, &book.id), Err(AppError::NotFound(_))));
    assert!(matches!(
        fx.books
            .update(
                &bob.id,
                &book.id,
                &RawSubmission::new().with("title", "Mine"),
                None,
            )
            .await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        fx.books.delete(&bob.id, &book.id).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(fx.books.get(&alice.id, &book.id).unwrap().title, "Emma");
}

#[tokio::test]
async fn store_invalid_submission_leaves_no_file() {
    let fx = fixture();
    let alice = fx.auth.register(&registration("alice")).unwrap();

    let err = fx
        .books
        .create(
            &alice.id,
            &RawSubmission::new().with("rating", "9"),
            Some(png_cover()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(file_count(&fx.uploads_dir), 0);
    assert!(fx.books.list(&alice.id).unwrap().is_empty());
}

#[tokio::test]
async fn store_cover_lifecycle() {
    let fx = fixture();
    let alice = fx.auth.register(&registration("alice")).unwrap();

    let book = fx
        .books
        .create(&alice.id, &submission("Emma", "Jane Austen"), Some(png_cover()))
        .await
        .unwrap();
    let first = book.cover_image.clone().unwrap();
    assert!(first.starts_with("/uploads/cover-"));
    assert_eq!(file_count(&fx.uploads_dir), 1);

    let updated = fx
        .books
        .update(&alice.id, &book.id, &RawSubmission::new(), Some(png_cover()))
        .await
        .unwrap();
    let second = updated.cover_image.clone().unwrap();
    assert_ne!(first, second);
    assert_eq!(file_count(&fx.uploads_dir), 1);
    assert!(fx.books.uploads().resolve(&second).unwrap().exists());

    let removed = fx
        .books
        .update(
            &alice.id,
            &book.id,
            &RawSubmission::new().with("removeCover", "true"),
            None,
        )
        .await
        .unwrap();
    assert!(removed.cover_image.is_none());
    assert_eq!(file_count(&fx.uploads_dir), 0);

    let again = fx
        .books
        .update(&alice.id, &book.id, &RawSubmission::new(), Some(png_cover()))
        .await
        .unwrap();
    assert!(again.cover_image.is_some());
    fx.books.delete(&alice.id, &book.id).await.unwrap();
    assert_eq!(file_count(&fx.uploads_dir), 0);
}

#[tokio::test]
async fn store_search_is_scoped_and_case_insensitive() {
    let fx = fixture();
    let alice = fx.auth.register(&registration("alice")).unwrap();
    let bob = fx.auth.register(&registration("bob")).unwrap();

    fx.books
        .create(
            &alice.id,
            &submission("Dune", "Frank Herbert").with("tags", "desert, spice"),
            None,
        )
        .await
        .unwrap();
    fx.books
        .create(&alice.id, &submission("Emma", "Jane Austen"), None)
        .await
        .unwrap();
    fx.books
        .create(&bob.id, &submission("Dune Messiah", "Frank Herbert"), None)
        .await
        .unwrap();

    let hits = fx.books.search(&alice.id, "SPICE").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Dune");

    assert_eq!(fx.books.search(&alice.id, "herbert").unwrap().len(), 1);
    assert!(matches!(
        fx.books.search(&alice.id, "  "),
        Err(AppError::BadRequest(_))
    ));
}

struct Recorder(parking_lot::Mutex<Vec<BookEvent>>);

impl BookObserver for Recorder {
    fn after_commit(&self, event: &BookEvent) -> Result<()> {
        self.0.lock().push(event.clone());
        Ok(())
    }
}

struct Failing;

impl BookObserver for Failing {
    fn after_commit(&self, _event: &BookEvent) -> Result<()> {
        Err(AppError::Internal("observer down".to_string()))
    }
}

#[tokio::test]
async fn store_observer_failure_keeps_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    db.create_user(&make_user("user-1", "alice", "alice@example.com"))
        .unwrap();

    let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
    let books = BookStore::new(db, upload_store(dir.path(), 1024))
        .with_observer(Arc::new(Failing))
        .with_observer(recorder.clone());

    let book = books
        .create("user-1", &submission("Emma", "Jane Austen"), None)
        .await
        .unwrap();
    assert!(books.get("user-1", &book.id).is_ok());

    books.delete("user-1", &book.id).await.unwrap();

    let events = recorder.0.lock().clone();
    assert_eq!(
        events,
        vec![
            BookEvent::Created {
                user_id: "user-1".to_string(),
                book_id: book.id.clone(),
            },
            BookEvent::Deleted {
                user_id: "user-1".to_string(),
                book_id: book.id.clone(),
            },
        ]
    );
}

// ========== HTTP ==========

const BOUNDARY: &str = "shelf-test-boundary";

struct TestApp {
    _dir: tempfile::TempDir,
    uploads_dir: std::path::PathBuf,
    state: AppState,
}

impl TestApp {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let uploads_dir = dir.path().join("uploads");
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        config.uploads.dir = uploads_dir.clone();
        let state = AppState::new(config, test_db()).unwrap();
        Self {
            _dir: dir,
            uploads_dir,
            state,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = create_router(self.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn json(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }

    async fn multipart(
        &self,
        uri: &str,
        token: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
    ) -> (StatusCode, Value) {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, content_type, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"coverImage\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(req).await
    }

    async fn register(&self, username: &str) -> String {
        let (status, body) = self
            .json(
                "POST",
                "/api/auth/register",
                None,
                json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "secret1",
                    "firstName": "Test",
                    "lastName": "User",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["token"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn http_health() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn http_reading_lifecycle() {
    let app = TestApp::new();

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/register",
            None,
            json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "secret1",
                "firstName": "Alice",
                "lastName": "Liddell",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["username"], "alice");
    assert!(body["user"].get("passwordHash").is_none());

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "alice@example.com", "password": "wrong" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid email or password");

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "alice@example.com", "password": "secret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, book) = app
        .json(
            "POST",
            "/api/books",
            Some(&token),
            json!({
                "title": "Dune",
                "author": "Frank Herbert",
                "status": "Reading",
                "pageCount": 412,
                "currentPage": 103,
                "tags": ["sf", "classic"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(book["status"], "Reading");
    assert!(book["dateStarted"].is_string());
    assert_eq!(book["tags"], json!(["sf", "classic"]));
    assert_eq!(book["progress"], 25);
    let id = book["id"].as_str().unwrap().to_string();

    let (_, me) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(me["stats"]["totalBooks"], 1);
    assert_eq!(me["stats"]["currentlyReading"], 1);

    let (status, book) = app
        .json(
            "PUT",
            &format!("/api/books/{}", id),
            Some(&token),
            json!({ "status": "Read" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(book["dateFinished"].is_string());
    assert!(book["readingDuration"].as_i64().unwrap() >= 0);
    assert_eq!(book["progress"], 100);

    let (status, stats) = app.get("/api/books/stats", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["byStatus"]["read"], 1);

    let (status, body) = app
        .json("DELETE", &format!("/api/books/{}", id), Some(&token), Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["title"], "Dune");
    assert_eq!(body["author"], "Frank Herbert");

    let (_, stats) = app.get("/api/books/stats", Some(&token)).await;
    assert_eq!(stats["totalBooks"], 0);
    let (_, me) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(me["stats"]["totalBooks"], 0);
}

#[tokio::test]
async fn http_timestamps_match_stored_values() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    let (status, created) = app
        .json(
            "POST",
            "/api/books",
            Some(&token),
            json!({ "title": "Dune", "author": "Herbert", "status": "Reading" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/books/{}", created["id"].as_str().unwrap());

    let (_, fetched) = app.get(&uri, Some(&token)).await;
    for field in ["dateStarted", "createdAt", "updatedAt"] {
        assert_eq!(created[field], fetched[field], "{field}");
    }

    let (status, finished) = app
        .json("PUT", &uri, Some(&token), json!({ "status": "Read" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, fetched) = app.get(&uri, Some(&token)).await;
    for field in ["dateStarted", "dateFinished", "createdAt", "updatedAt"] {
        assert_eq!(finished[field], fetched[field], "{field}");
    }
    assert_eq!(finished["dateStarted"], created["dateStarted"]);

    let (status, login) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "alice@example.com", "password": "secret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, me) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(login["user"]["lastLogin"], me["lastLogin"]);
    assert_eq!(login["user"]["createdAt"], me["createdAt"]);
}

#[tokio::test]
async fn http_requires_valid_token() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/books", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, body) = app.get("/api/books", Some("not.a.token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn http_validation_errors_listed() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    let (status, body) = app
        .json(
            "POST",
            "/api/books",
            Some(&token),
            json!({ "title": "", "rating": 7, "isbn": "12" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation failed");
    assert!(body["details"].as_array().unwrap().len() >= 4);
}

#[tokio::test]
async fn http_other_users_books_hidden() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let (_, book) = app
        .json(
            "POST",
            "/api/books",
            Some(&alice),
            json!({ "title": "Emma", "author": "Jane Austen" }),
        )
        .await;
    let uri = format!("/api/books/{}", book["id"].as_str().unwrap());

    let (status, _) = app.get(&uri, Some(&bob)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.json("DELETE", &uri, Some(&bob), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&uri, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn http_multipart_create_with_cover() {
    let app = TestApp::new();
    let token = app.register("alice").await;
    let png = png_bytes(800, 1200);

    let (status, book) = app
        .multipart(
            "/api/books",
            &token,
            &[("title", "Emma"), ("author", "Jane Austen"), ("tags", "regency")],
            Some(("emma.png", "image/png", &png[..])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(book["tags"], json!(["regency"]));
    let cover = book["coverImage"].as_str().unwrap();
    assert!(cover.starts_with("/uploads/cover-"));
    assert_eq!(file_count(&app.uploads_dir), 1);

    assert!(cover.ends_with(".jpg"));

    let resp = create_router(app.state.clone())
        .oneshot(Request::builder().uri(cover).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
}

#[tokio::test]
async fn http_oversized_upload_rejected() {
    let app = TestApp::new();
    let token = app.register("alice").await;
    let big = vec![0u8; 8 * 1024 * 1024];

    let (status, _) = app
        .multipart(
            "/api/books",
            &token,
            &[("title", "Big"), ("author", "Someone")],
            Some(("big.png", "image/png", &big[..])),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(file_count(&app.uploads_dir), 0);

    let (_, books) = app.get("/api/books", Some(&token)).await;
    assert_eq!(books, json!([]));
}

#[tokio::test]
async fn http_non_image_upload_rejected() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    let (status, body) = app
        .multipart(
            "/api/books",
            &token,
            &[("title", "Notes"), ("author", "Someone")],
            Some(("notes.txt", "text/plain", &b"plain text"[..])),
        )
        .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"], "Only image files are allowed");
    assert_eq!(file_count(&app.uploads_dir), 0);

    let (_, books) = app.get("/api/books", Some(&token)).await;
    assert_eq!(books, json!([]));
}

#[tokio::test]
async fn http_admin_route_gated() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    let (status, _) = app.get("/api/admin/users", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.get("/api/admin/users", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert!(app.state.auth.set_admin("alice", true).unwrap());
    let (status, users) = app.get("/api/admin/users", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn http_external_search_without_key_unavailable() {
    let app = TestApp::new();

    let (status, body) = app
        .get("/api/books/search-external?query=dune", Some("garbage"))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    let (status, _) = app.get("/api/books/search-external", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn http_genres_authors_and_search() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    for (title, author, genre) in [
        ("Emma", "Jane Austen", "Classic"),
        ("Dune", "Frank Herbert", "Science Fiction"),
        ("Persuasion", "Jane Austen", "Classic"),
    ] {
        let (status, _) = app
            .json(
                "POST",
                "/api/books",
                Some(&token),
                json!({ "title": title, "author": author, "genre": genre }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, genres) = app.get("/api/books/genres", Some(&token)).await;
    assert_eq!(genres, json!(["Classic", "Science Fiction"]));
    let (_, authors) = app.get("/api/books/authors", Some(&token)).await;
    assert_eq!(authors, json!(["Frank Herbert", "Jane Austen"]));

    let (status, hits) = app.get("/api/books/search?query=austen", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().unwrap().len(), 2);
    assert_eq!(hits[0]["title"], "Persuasion");

    let (status, _) = app.get("/api/books/search?query=", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
