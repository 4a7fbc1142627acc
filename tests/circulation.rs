use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Duration as ChronoDuration;
use http_body_util::BodyExt;
use libris_app::{build_registry, Services};
use libris_kernel::{settings::Settings, ManualClock};
use serde_json::{json, Value};
use tower::ServiceExt;

struct App {
    router: Router,
    clock: ManualClock,
}

fn app_with(settings: Settings) -> App {
    let clock = ManualClock::default();
    let services = Services::with_clock(settings, clock.shared()).unwrap();
    let registry = build_registry(&services);
    let router =
        libris_http::build_router(&registry, &services.settings, Some(services.gate.clone()));
    App { router, clock }
}

fn app() -> App {
    app_with(Settings::default())
}

#[derive(Clone, Copy)]
enum As {
    Anonymous,
    Staff,
    Member(u64),
}

fn request(method: Method, uri: &str, caller: As, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.9");
    builder = match caller {
        As::Anonymous => builder,
        As::Staff => builder
            .header("x-user-id", "1")
            .header("x-user-role", "staff"),
        As::Member(id) => builder
            .header("x-user-id", id.to_string())
            .header("x-user-role", "member"),
    };
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &App, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_book(app: &App, title: &str, copies: u32) -> u64 {
    let author = send(
        app,
        request(
            Method::POST,
            "/api/books/authors",
            As::Staff,
            Some(json!({ "name": format!("Author of {title}") })),
        ),
    )
    .await;
    assert_eq!(author.status(), StatusCode::CREATED);
    let author_id = json_body(author).await["id"].as_u64().unwrap();

    let book = send(
        app,
        request(
            Method::POST,
            "/api/books",
            As::Staff,
            Some(json!({
                "title": title,
                "author_id": author_id,
                "price": "12.50",
                "copies": copies
            })),
        ),
    )
    .await;
    assert_eq!(book.status(), StatusCode::CREATED);
    json_body(book).await["id"].as_u64().unwrap()
}

async fn borrow(app: &App, user: u64, book_id: u64) -> Response {
    send(
        app,
        request(
            Method::POST,
            "/api/circulation/borrow",
            As::Member(user),
            Some(json!({ "book_id": book_id })),
        ),
    )
    .await
}

async fn give_back(app: &App, user: u64, book_id: u64) -> Response {
    send(
        app,
        request(
            Method::POST,
            "/api/circulation/return",
            As::Member(user),
            Some(json!({ "book_id": book_id })),
        ),
    )
    .await
}

async fn stock_of(app: &App, book_id: u64) -> u64 {
    let response = send(
        app,
        request(
            Method::GET,
            &format!("/api/books/{book_id}"),
            As::Anonymous,
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["stock"].as_u64().unwrap()
}

async fn list_books(app: &App) -> Value {
    let response = send(app, request(Method::GET, "/api/books", As::Anonymous, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn single_copy_passes_from_one_member_to_the_next() {
    let app = app();
    let book = create_book(&app, "Dune", 1).await;

    assert_eq!(borrow(&app, 10, book).await.status(), StatusCode::CREATED);
    assert_eq!(stock_of(&app, book).await, 0);

    let refused = borrow(&app, 11, book).await;
    assert_eq!(refused.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(refused).await["error"]["code"], "out_of_stock");

    let returned = give_back(&app, 10, book).await;
    assert_eq!(returned.status(), StatusCode::OK);
    let returned = json_body(returned).await;
    assert_eq!(returned["loan"]["status"], "returned");
    assert!(returned.get("warning").is_none());
    assert_eq!(stock_of(&app, book).await, 1);

    assert_eq!(borrow(&app, 11, book).await.status(), StatusCode::CREATED);
    assert_eq!(stock_of(&app, book).await, 0);
}

#[tokio::test]
async fn listing_reflects_borrows_immediately() {
    let app = app();
    let book = create_book(&app, "Solaris", 2).await;

    let before = list_books(&app).await;
    assert_eq!(before["results"][0]["stock"], 2);

    assert_eq!(borrow(&app, 3, book).await.status(), StatusCode::CREATED);
    let after = list_books(&app).await;
    assert_eq!(after["results"][0]["stock"], 1);
    assert_eq!(after["results"][0]["is_available"], true);
}

#[tokio::test]
async fn sixth_active_borrow_is_refused() {
    let mut settings = Settings::default();
    settings.throttle.borrow = "100/day".to_string();
    let app = app_with(settings);

    let mut books = Vec::new();
    for n in 0..6 {
        books.push(create_book(&app, &format!("Volume {n}"), 1).await);
    }
    for book in &books[..5] {
        assert_eq!(borrow(&app, 7, *book).await.status(), StatusCode::CREATED);
    }

    let sixth = borrow(&app, 7, books[5]).await;
    assert_eq!(sixth.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(sixth).await["error"]["code"], "borrow_limit_exceeded");
    assert_eq!(stock_of(&app, books[5]).await, 1);

    let mine = send(
        &app,
        request(Method::GET, "/api/circulation/mine", As::Member(7), None),
    )
    .await;
    assert_eq!(json_body(mine).await.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn borrow_scope_throttles_with_retry_after() {
    let app = app();
    let mut books = Vec::new();
    for n in 0..6 {
        books.push(create_book(&app, &format!("Issue {n}"), 1).await);
    }
    // Five borrows a day; returns do not refund the budget.
    for book in &books[..5] {
        assert_eq!(borrow(&app, 8, *book).await.status(), StatusCode::CREATED);
        assert_eq!(give_back(&app, 8, *book).await.status(), StatusCode::OK);
    }

    let throttled = borrow(&app, 8, books[5]).await;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = throttled.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 86_400);
    assert_eq!(stock_of(&app, books[5]).await, 1);

    // Another member has their own budget.
    assert_eq!(borrow(&app, 9, books[5]).await.status(), StatusCode::CREATED);

    app.clock.advance(ChronoDuration::days(1));
    assert_eq!(borrow(&app, 8, books[0]).await.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn overdue_listing_is_staff_only_and_strict() {
    let app = app();
    let book = create_book(&app, "Ubik", 2).await;

    let short = send(
        &app,
        request(
            Method::POST,
            "/api/circulation/borrow",
            As::Member(20),
            Some(json!({ "book_id": book, "loan_days": 1 })),
        ),
    )
    .await;
    assert_eq!(short.status(), StatusCode::CREATED);
    assert_eq!(borrow(&app, 21, book).await.status(), StatusCode::CREATED);

    app.clock.advance(ChronoDuration::days(2));

    let forbidden = send(
        &app,
        request(Method::GET, "/api/circulation/overdue", As::Member(20), None),
    )
    .await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let overdue = send(
        &app,
        request(Method::GET, "/api/circulation/overdue", As::Staff, None),
    )
    .await;
    assert_eq!(overdue.status(), StatusCode::OK);
    let overdue = json_body(overdue).await;
    let records = overdue.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["user_id"], 20);
    assert_eq!(records[0]["status"], "overdue");
    assert_eq!(records[0]["days_overdue"], 1);
}

#[tokio::test]
async fn anonymous_callers_cannot_mutate() {
    let app = app();
    let book = create_book(&app, "Roadside Picnic", 1).await;

    let response = send(
        &app,
        request(
            Method::POST,
            "/api/circulation/borrow",
            As::Anonymous,
            Some(json!({ "book_id": book })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(stock_of(&app, book).await, 1);

    let delete = send(
        &app,
        request(
            Method::DELETE,
            &format!("/api/books/{book}"),
            As::Member(5),
            None,
        ),
    )
    .await;
    assert_eq!(delete.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn lent_books_cannot_be_deleted() {
    let app = app();
    let book = create_book(&app, "Hyperion", 1).await;
    assert_eq!(borrow(&app, 4, book).await.status(), StatusCode::CREATED);

    let uri = format!("/api/books/{book}");
    let refused = send(&app, request(Method::DELETE, &uri, As::Staff, None)).await;
    assert_eq!(refused.status(), StatusCode::CONFLICT);

    assert_eq!(give_back(&app, 4, book).await.status(), StatusCode::OK);
    let deleted = send(&app, request(Method::DELETE, &uri, As::Staff, None)).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = send(&app, request(Method::GET, &uri, As::Anonymous, None)).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_borrows_never_oversell() {
    let app = app();
    let book = create_book(&app, "Neuromancer", 3).await;

    let attempts = (100..110).map(|user| {
        let router = app.router.clone();
        tokio::spawn(async move {
            let response = router
                .oneshot(request(
                    Method::POST,
                    "/api/circulation/borrow",
                    As::Member(user),
                    Some(json!({ "book_id": book })),
                ))
                .await
                .unwrap();
            response.status()
        })
    });
    let mut statuses = Vec::new();
    for attempt in attempts.collect::<Vec<_>>() {
        statuses.push(attempt.await.unwrap());
    }

    let granted = statuses
        .iter()
        .filter(|status| **status == StatusCode::CREATED)
        .count();
    let refused = statuses
        .iter()
        .filter(|status| **status == StatusCode::CONFLICT)
        .count();
    assert_eq!((granted, refused), (3, 7));
    assert_eq!(stock_of(&app, book).await, 0);
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let app = app();
    let health = send(&app, request(Method::GET, "/healthz", As::Anonymous, None)).await;
    assert_eq!(health.status(), StatusCode::OK);

    let docs = send(
        &app,
        request(Method::GET, "/docs/openapi.json", As::Anonymous, None),
    )
    .await;
    let docs = json_body(docs).await;
    assert!(docs["paths"]["/api/circulation/borrow"]["post"].is_object());
    assert!(docs["paths"]["/api/books/{id}"]["delete"].is_object());
}
