use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use inkpost::services::mailer::{Mailer, OutgoingEmail};
use inkpost::web::{self, AppState};
use inkpost::{Config, Database};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const PASSWORD: &str = "Password123";
const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

struct TestApp {
    _dir: TempDir,
    app: Router,
    outbox: Arc<Mutex<Vec<OutgoingEmail>>>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

fn spawn_app_with_limit(registration_limit: usize) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = format!(
        r#"
[site]
name = "Inkpost Test"
url = "http://testserver"

[database]
path = "{db}"

[media]
upload_dir = "{media}"
max_upload_size = "1KB"

[auth]
secret_key = "api-test-secret-api-test-secret-0000"
registration_limit = {limit}
"#,
        db = dir.path().join("test.db").display(),
        media = dir.path().join("media").display(),
        limit = registration_limit,
    );
    let config = Config::parse(&config).expect("Failed to parse config");
    let db = Database::open(&config.database.path, 4).expect("Failed to open database");
    db.migrate().expect("Failed to run migrations");

    let (mailer, outbox) = Mailer::memory();
    let state = AppState::new(config, db, mailer).expect("Failed to create app state");
    TestApp {
        _dir: dir,
        app: web::router(Arc::new(state)),
        outbox,
    }
}

fn spawn_app() -> TestApp {
    spawn_app_with_limit(50)
}

impl TestApp {
    async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn register(&self, username: &str) -> Reply {
        self.request(
            Method::POST,
            "/register/",
            Some(json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "first_name": "Test",
                "last_name": "User",
                "password": PASSWORD,
            })),
            None,
        )
        .await
    }

    fn last_verify_path(&self) -> String {
        let outbox = self.outbox.lock().unwrap();
        let email = outbox.last().expect("no email sent");
        let start = email.text_body.find("/verify-email/").expect("no link in email");
        let link = email.text_body[start..]
            .split_whitespace()
            .next()
            .unwrap()
            .to_string();
        link
    }

    async fn login(&self, username: &str) -> Reply {
        self.request(
            Method::POST,
            "/login/",
            Some(json!({ "username": username, "password": PASSWORD })),
            None,
        )
        .await
    }

    /// Registers, verifies and logs in; returns the session token.
    async fn signed_in(&self, username: &str) -> String {
        assert_eq!(self.register(username).await.status, StatusCode::CREATED);
        let verify = self.last_verify_path();
        assert_eq!(
            self.request(Method::GET, &verify, None, None).await.status,
            StatusCode::OK
        );
        let reply = self.login(username).await;
        assert_eq!(reply.status, StatusCode::OK);
        reply.body["token"].as_str().unwrap().to_string()
    }

    async fn create_blog(&self, token: &str, title: &str) -> Value {
        let reply = self
            .request(
                Method::POST,
                "/blogs/",
                Some(json!({
                    "title": title,
                    "content": "Body text",
                    "category": "Backend",
                    "is_draft": false,
                })),
                Some(token),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{:?}", reply.body);
        reply.body
    }
}

#[tokio::test]
async fn test_health() {
    let app = spawn_app();
    let reply = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "status": "ok" }));
    assert_eq!(reply.headers["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn test_registration_and_verification_flow() {
    let app = spawn_app();

    let reply = app.register("jane").await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["username"], "jane");
    assert_eq!(reply.body["email"], "jane@example.com");
    assert!(reply.body["message"].is_string());

    {
        let outbox = app.outbox.lock().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].to, "jane@example.com");
        assert!(outbox[0]
            .text_body
            .contains("http://testserver/verify-email/?token="));
    }

    // not verified yet
    let reply = app.login("jane").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        reply.body["detail"],
        "No active account found with the given credentials"
    );

    let verify = app.last_verify_path();
    let reply = app.request(Method::GET, &verify, None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.body["message"],
        "Email verified successfully. You can now log in."
    );

    let reply = app.request(Method::GET, &verify, None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["message"], "Account already activated.");

    let reply = app.login("jane").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["token"].is_string());
    assert!(reply.body["expires_at"].is_string());
    let cookie = reply.headers[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_bad_verification_links() {
    let app = spawn_app();

    let reply = app.request(Method::GET, "/verify-email/", None, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "Token is missing.");

    app.register("jane").await;
    let verify = app.last_verify_path();
    let tampered = format!("{}x", verify);
    let reply = app.request(Method::GET, &tampered, None, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "Invalid verification link.");
}

#[tokio::test]
async fn test_registration_validation() {
    let app = spawn_app();

    let reply = app
        .request(
            Method::POST,
            "/register/",
            Some(json!({
                "username": "weak",
                "email": "not-an-email",
                "password": "abcdefg1",
            })),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body["password"],
        json!(["Password must contain at least one uppercase letter."])
    );
    assert!(reply.body["email"].is_array());

    app.register("jane").await;
    let reply = app
        .request(
            Method::POST,
            "/register/",
            Some(json!({
                "username": "other",
                "email": "JANE@EXAMPLE.COM",
                "password": PASSWORD,
            })),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["email"].is_array());

    let reply = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/register/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_registration_is_throttled() {
    let app = spawn_app_with_limit(2);

    assert_eq!(app.register("one").await.status, StatusCode::CREATED);
    assert_eq!(app.register("two").await.status, StatusCode::CREATED);

    let reply = app.register("three").await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(reply.headers.contains_key(header::RETRY_AFTER));
    assert!(reply.body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Request was throttled."));
}

#[tokio::test]
async fn test_resend_verification() {
    let app = spawn_app();
    app.register("jane").await;
    assert_eq!(app.outbox.lock().unwrap().len(), 1);

    let reply = app
        .request(
            Method::POST,
            "/resend-verification/",
            Some(json!({ "email": "jane@example.com" })),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(app.outbox.lock().unwrap().len(), 2);

    // unknown addresses get the same answer and no mail
    let unknown = app
        .request(
            Method::POST,
            "/resend-verification/",
            Some(json!({ "email": "nobody@example.com" })),
            None,
        )
        .await;
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(unknown.body, reply.body);
    assert_eq!(app.outbox.lock().unwrap().len(), 2);

    let verify = app.last_verify_path();
    assert_eq!(
        app.request(Method::GET, &verify, None, None).await.status,
        StatusCode::OK
    );

    // active accounts get nothing either
    app.request(
        Method::POST,
        "/resend-verification/",
        Some(json!({ "email": "jane@example.com" })),
        None,
    )
    .await;
    assert_eq!(app.outbox.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_blog_crud_and_ownership() {
    let app = spawn_app();
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;

    let reply = app
        .request(
            Method::POST,
            "/blogs/",
            Some(json!({ "title": "Anon", "content": "x" })),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        reply.body["detail"],
        "Authentication credentials were not provided."
    );

    let created = app.create_blog(&alice, "My First Post").await;
    assert_eq!(created["slug"], "my-first-post");
    assert_eq!(created["author"]["username"], "alice");
    assert_eq!(created["category"], "Backend");
    assert!(created["published_date"].is_string());
    let id = created["id"].as_i64().unwrap();

    let duplicate = app.create_blog(&bob, "My First Post").await;
    assert_eq!(duplicate["slug"], "my-first-post-1");
    assert_eq!(duplicate["author"]["username"], "bob");

    let reply = app
        .request(Method::GET, "/blogs/my-first-post/", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["id"], id);

    let reply = app
        .request(Method::GET, "/blogs/no-such-post/", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, json!({ "error": "Blog not found" }));

    // bob cannot touch alice's post
    let reply = app
        .request(
            Method::PUT,
            &format!("/blogs/{}/", id),
            Some(json!({ "title": "Hijacked" })),
            Some(&bob),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], "You are not the author of this blog");

    let reply = app
        .request(Method::POST, &format!("/blogs/{}/delete/", id), None, Some(&bob))
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let unchanged = app
        .request(Method::GET, "/blogs/my-first-post/", None, None)
        .await;
    assert_eq!(unchanged.body["title"], "My First Post");

    let reply = app
        .request(
            Method::PUT,
            &format!("/blogs/{}/", id),
            Some(json!({ "content": "Edited body" })),
            Some(&alice),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["slug"], "my-first-post");
    assert_eq!(reply.body["content"], "Edited body");
    assert_eq!(reply.body["published_date"], created["published_date"]);

    let reply = app
        .request(
            Method::PUT,
            "/blogs/9999/",
            Some(json!({ "title": "Ghost" })),
            Some(&alice),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, json!({ "error": "Blog not found" }));

    let reply = app
        .request(
            Method::PUT,
            &format!("/blogs/{}/", id),
            Some(json!({ "category": "Cooking" })),
            Some(&alice),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["category"].is_array());

    let reply = app
        .request(
            Method::POST,
            &format!("/blogs/{}/delete/", id),
            None,
            Some(&alice),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = app
        .request(Method::GET, "/blogs/my-first-post/", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pagination() {
    let app = spawn_app();

    let reply = app.request(Method::GET, "/blogs/", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.body,
        json!({ "count": 0, "next": null, "previous": null, "results": [] })
    );

    let token = app.signed_in("writer").await;
    for i in 1..=7 {
        app.create_blog(&token, &format!("Post {}", i)).await;
    }

    let page1 = app.request(Method::GET, "/blogs/", None, None).await;
    assert_eq!(page1.body["count"], 7);
    assert_eq!(page1.body["results"].as_array().unwrap().len(), 3);
    assert_eq!(page1.body["next"], "http://testserver/blogs/?page=2");
    assert_eq!(page1.body["previous"], Value::Null);
    assert_eq!(page1.body["results"][0]["title"], "Post 7");

    let page2 = app.request(Method::GET, "/blogs/?page=2", None, None).await;
    assert_eq!(page2.body["results"].as_array().unwrap().len(), 3);
    assert_eq!(page2.body["previous"], "http://testserver/blogs/?page=1");

    let page3 = app.request(Method::GET, "/blogs/?page=3", None, None).await;
    assert_eq!(page3.body["results"].as_array().unwrap().len(), 1);
    assert_eq!(page3.body["next"], Value::Null);

    for bad in ["4", "0", "abc"] {
        let reply = app
            .request(Method::GET, &format!("/blogs/?page={}", bad), None, None)
            .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND, "page={}", bad);
        assert_eq!(reply.body, json!({ "detail": "Invalid page." }));
    }
}

#[tokio::test]
async fn test_profiles() {
    let app = spawn_app();
    let token = app.signed_in("author").await;
    for i in 0..8 {
        app.create_blog(&token, &format!("Entry {}", i)).await;
    }

    let reply = app
        .request(Method::GET, "/whoami/", None, Some(&token))
        .await;
    assert_eq!(reply.body, json!({ "username": "author" }));

    let reply = app.request(Method::GET, "/whoami/", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = app
        .request(
            Method::PUT,
            "/profile/",
            Some(json!({
                "bio": "Writes a lot",
                "job_title": "Columnist",
                "twitter": "https://twitter.com/author",
            })),
            Some(&token),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["bio"], "Writes a lot");

    let reply = app
        .request(
            Method::PUT,
            "/profile/",
            Some(json!({ "youtube": "not a url" })),
            Some(&token),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["youtube"].is_array());

    let reply = app
        .request(Method::GET, "/users/author/", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["job_title"], "Columnist");
    assert_eq!(reply.body["author_posts"].as_array().unwrap().len(), 6);
    assert!(reply.body.get("password_hash").is_none());

    let reply = app
        .request(Method::GET, "/users/nobody/", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, json!({ "error": "User not found" }));
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = spawn_app();
    let token = app.signed_in("leaver").await;

    let reply = app
        .request(Method::POST, "/logout/", None, Some(&token))
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reply = app
        .request(Method::GET, "/whoami/", None, Some(&token))
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_cookie_authenticates() {
    let app = spawn_app();
    let token = app.signed_in("cookie").await;

    let reply = app
        .send(
            Request::builder()
                .uri("/whoami/")
                .header(header::COOKIE, format!("session={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["username"], "cookie");
}

#[tokio::test]
async fn test_login_lockout() {
    let app = spawn_app();
    app.signed_in("target").await;

    for _ in 0..5 {
        let reply = app
            .request(
                Method::POST,
                "/login/",
                Some(json!({ "username": "target", "password": "Wrong1234" })),
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    let reply = app.login("target").await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
}

fn multipart_upload(token: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let boundary = "inkpost-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = boundary,
            f = filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/media/")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_media_upload_and_serve() {
    let app = spawn_app();
    let token = app.signed_in("uploader").await;

    let reply = app.send(multipart_upload(&token, "avatar.png", PNG)).await;
    assert_eq!(reply.status, StatusCode::CREATED, "{:?}", reply.body);
    assert_eq!(reply.body["mime_type"], "image/png");
    let filename = reply.body["filename"].as_str().unwrap().to_string();
    assert_eq!(
        reply.body["url"],
        format!("http://testserver/media/{}", filename)
    );

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/media/{}", filename))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], PNG);

    let reply = app
        .send(multipart_upload(&token, "notes.png", b"just some text"))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = app
        .request(Method::GET, "/media/..%2Finkpost.toml", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = app
        .request(Method::GET, "/media/missing.png", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}
