use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use cinevault::app::{build_router, AppState};
use cinevault::auth::{hash_password, TokenSigner};
use cinevault::models::{Movie, Rating, SearchPage};
use cinevault::omdb::{OmdbApi, OmdbError};
use cinevault::store::MovieStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::util::ServiceExt;

const TOKEN_SECRET: &str = "test-secret";

struct FakeOmdb {
    by_title: HashMap<String, Movie>,
}

#[async_trait::async_trait]
impl OmdbApi for FakeOmdb {
    async fn search_page(&self, _term: &str, _page: u32) -> Result<SearchPage, OmdbError> {
        Ok(SearchPage::empty())
    }

    async fn fetch_by_imdb_id(&self, imdb_id: &str) -> Result<Movie, OmdbError> {
        self.by_title
            .values()
            .find(|m| m.imdb_id == imdb_id)
            .cloned()
            .ok_or_else(|| OmdbError::NotFound {
                body: imdb_id.to_string(),
            })
    }

    async fn fetch_by_title(&self, title: &str) -> Result<Movie, OmdbError> {
        self.by_title
            .get(title)
            .cloned()
            .ok_or_else(|| OmdbError::NotFound {
                body: r#"{"Response":"False","Error":"Movie not found!"}"#.to_string(),
            })
    }
}

fn movie(imdb_id: &str, title: &str) -> Movie {
    Movie {
        title: title.to_string(),
        year: Some(1989),
        rated: Some("PG-13".to_string()),
        released: NaiveDate::from_ymd_opt(1989, 6, 23),
        runtime: Some("126 min".to_string()),
        genre: Some("Action, Adventure".to_string()),
        director: Some("Tim Burton".to_string()),
        writer: None,
        actors: Some("Michael Keaton, Jack Nicholson".to_string()),
        plot: None,
        language: Some("English".to_string()),
        country: Some("United States, United Kingdom".to_string()),
        awards: None,
        poster: None,
        ratings: vec![Rating {
            source: "Internet Movie Database".to_string(),
            value: "7.5/10".to_string(),
        }],
        metascore: Some(69),
        imdb_rating: Some(7.5),
        imdb_votes: Some(397_000),
        imdb_id: imdb_id.to_string(),
        media_type: "movie".to_string(),
        dvd: None,
        box_office: Some("$251,409,241".to_string()),
        production: None,
        website: None,
    }
}

async fn app_with_fakes() -> (Router, MovieStore) {
    let store = MovieStore::in_memory().await.expect("in-memory store");
    store
        .bulk_insert(&[
            movie("tt0096895", "Batman"),
            movie("tt0103776", "Batman Returns"),
            movie("tt0118688", "Batman & Robin"),
        ])
        .await
        .expect("fixture movies");
    store
        .create_member("alice", &hash_password("alice-pw").unwrap(), false)
        .await
        .expect("regular member");
    store
        .create_member("root", &hash_password("root-pw").unwrap(), true)
        .await
        .expect("admin member");

    let omdb = FakeOmdb {
        by_title: HashMap::from([(
            "Batman Begins".to_string(),
            movie("tt0372784", "Batman Begins"),
        )]),
    };
    let state = AppState {
        store: store.clone(),
        omdb: Arc::new(omdb),
        tokens: Arc::new(TokenSigner::new(TOKEN_SECRET, chrono::Duration::minutes(5)).unwrap()),
    };
    (build_router(state), store)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/v1/users/login",
            None,
            json!({ "username": username, "password": password }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().expect("token").to_string()
}

fn titles(body: &Value) -> Vec<String> {
    body["movies"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["title"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = app_with_fakes().await;
    let res = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_unknown_user_and_wrong_password() {
    let (app, _) = app_with_fakes().await;
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/users/login",
            None,
            json!({ "username": "mallory", "password": "x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/users/login",
            None,
            json!({ "username": "alice", "password": "wrong" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["status"], 403);
}

#[tokio::test]
async fn listing_requires_a_valid_token() {
    let (app, _) = app_with_fakes().await;
    let res = app
        .clone()
        .oneshot(Request::get("/api/v1/movies").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let foreign = TokenSigner::new("someone-else", chrono::Duration::minutes(5))
        .unwrap()
        .issue("alice")
        .unwrap();
    let (status, _) = send(&app, authed("GET", "/api/v1/movies", &foreign)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let (app, _) = app_with_fakes().await;
    let expired = TokenSigner::new(TOKEN_SECRET, chrono::Duration::minutes(5))
        .unwrap()
        .issue_at("alice", chrono::Utc::now() - chrono::Duration::hours(1))
        .unwrap();

    let (status, body) = send(&app, authed("GET", "/api/v1/movies", &expired)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["status"], 401);
}

fn assert_bad_request_envelope(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
    assert_eq!(body["error"]["status"], 400, "body: {body}");
    assert!(body["error"]["message"].as_str().is_some(), "body: {body}");
}

#[tokio::test]
async fn malformed_query_and_path_get_json_errors() {
    let (app, _) = app_with_fakes().await;
    let token = login(&app, "alice", "alice-pw").await;

    for uri in [
        "/api/v1/movies?page=-1",
        "/api/v1/movies?page_size=abc",
        "/api/v1/movies/abc",
    ] {
        let (status, body) = send(&app, authed("GET", uri, &token)).await;
        assert_bad_request_envelope(status, &body);
    }
}

#[tokio::test]
async fn malformed_json_bodies_get_json_errors() {
    let (app, _) = app_with_fakes().await;
    let token = login(&app, "root", "root-pw").await;

    let broken_login = Request::builder()
        .method("POST")
        .uri("/api/v1/users/login")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"username": "alice","#))
        .unwrap();
    let (status, body) = send(&app, broken_login).await;
    assert_bad_request_envelope(status, &body);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/movies",
            Some(&token),
            json!({ "name": "Batman Begins" }),
        ),
    )
    .await;
    assert_bad_request_envelope(status, &body);

    let (status, body) = send(&app, authed("DELETE", "/api/v1/movies/abc", &token)).await;
    assert_bad_request_envelope(status, &body);
}

#[tokio::test]
async fn lists_movies_ordered_by_title() {
    let (app, _) = app_with_fakes().await;
    let token = login(&app, "alice", "alice-pw").await;

    let (status, body) = send(&app, authed("GET", "/api/v1/movies", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["page"], 1);
    assert_eq!(body["page_size"], 10);
    assert_eq!(body["order_by"], "title");
    assert_eq!(body["order_type"], "asc");
    assert_eq!(titles(&body), vec!["Batman", "Batman & Robin", "Batman Returns"]);
    assert_eq!(body["movies"][0]["ratings"][0]["value"], "7.5/10");
    assert_eq!(body["movies"][0]["released"], "1989-06-23");

    let (status, body) = send(
        &app,
        authed("GET", "/api/v1/movies?page=2&page_size=2", &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(titles(&body), vec!["Batman Returns"]);
}

#[tokio::test]
async fn title_filter_orders_by_id() {
    let (app, _) = app_with_fakes().await;
    let token = login(&app, "alice", "alice-pw").await;
    let (status, body) = send(
        &app,
        authed("GET", "/api/v1/movies?title=Batman%20Returns", &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_by"], "id");
    assert_eq!(body["total"], 1);
    assert_eq!(titles(&body), vec!["Batman Returns"]);
}

#[tokio::test]
async fn rejects_out_of_range_pagination() {
    let (app, _) = app_with_fakes().await;
    let token = login(&app, "alice", "alice-pw").await;
    let (status, _) = send(
        &app,
        authed("GET", "/api/v1/movies?page_size=101", &token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, authed("GET", "/api/v1/movies?page=0", &token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn fetches_single_movie() {
    let (app, store) = app_with_fakes().await;
    let token = login(&app, "alice", "alice-pw").await;
    let (movies, _) = store
        .list(&cinevault::store::MovieFilter {
            title: Some("Batman".to_string()),
            page: 1,
            page_size: 1,
        })
        .await
        .unwrap();
    let id = movies[0].id;

    let (status, body) = send(&app, authed("GET", &format!("/api/v1/movies/{id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
    assert_eq!(body["imdb_id"], "tt0096895");

    let (status, _) = send(&app, authed("GET", "/api/v1/movies/9999", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn regular_member_cannot_modify() {
    let (app, store) = app_with_fakes().await;
    let token = login(&app, "alice", "alice-pw").await;

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/movies",
            Some(&token),
            json!({ "title": "Batman Begins" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, authed("DELETE", "/api/v1/movies/1", &token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn admin_inserts_from_catalog() {
    let (app, store) = app_with_fakes().await;
    let token = login(&app, "root", "root-pw").await;
    let insert = || {
        json_request(
            "POST",
            "/api/v1/movies",
            Some(&token),
            json!({ "title": "Batman Begins" }),
        )
    };

    let (status, body) = send(&app, insert()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["imdb_id"], "tt0372784");
    assert!(body["id"].as_i64().is_some());
    assert_eq!(store.count().await.unwrap(), 4);

    let (status, _) = send(&app, insert()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(store.count().await.unwrap(), 4);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/movies",
            Some(&token),
            json!({ "title": "Batman Forever" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_deletes_movie() {
    let (app, store) = app_with_fakes().await;
    let token = login(&app, "root", "root-pw").await;
    let (movies, _) = store
        .list(&cinevault::store::MovieFilter {
            title: None,
            page: 1,
            page_size: 1,
        })
        .await
        .unwrap();
    let uri = format!("/api/v1/movies/{}", movies[0].id);

    let (status, _) = send(&app, authed("DELETE", &uri, &token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(store.count().await.unwrap(), 2);

    let (status, _) = send(&app, authed("GET", &uri, &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, authed("DELETE", &uri, &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
