use crate::auth::{self, AuthMember, TokenSigner};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{MoviePage, StoredMovie};
use crate::omdb::{OmdbApi, OmdbClient};
use crate::seed::{self, SeedOutcome};
use crate::store::{MovieFilter, MovieStore};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB safety cap
const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: MovieStore,
    pub omdb: Arc<dyn OmdbApi>,
    pub tokens: Arc<TokenSigner>,
}

pub async fn run_server(config: Config) -> Result<()> {
    let store = MovieStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to open the movie store")?;
    let omdb: Arc<dyn OmdbApi> = Arc::new(
        OmdbClient::new(&config.omdb_api_url, &config.omdb_api_key)
            .context("Failed to build OMDb client")?,
    );
    let tokens = Arc::new(TokenSigner::new(
        &config.token_secret,
        chrono::Duration::minutes(config.token_ttl_minutes),
    )?);

    match seed::seed_if_empty(&store, omdb.as_ref(), &config.seed)
        .await
        .context("Startup seeding failed")?
    {
        SeedOutcome::Skipped { existing } => info!("Serving {} existing movies", existing),
        SeedOutcome::Seeded { movies, members } => {
            info!("Seeded {} movies and {} members", movies, members)
        }
    }

    let state = AppState {
        store,
        omdb,
        tokens,
    };
    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/users/login", post(login))
        .route("/api/v1/movies", get(list_movies).post(insert_movie))
        .route("/api/v1/movies/:id", get(get_movie).delete(delete_movie))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state
        .store
        .ping()
        .await
        .map_err(|e| ApiError::Internal(format!("Healthcheck failed: {e}")))?;
    Ok("OK")
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

async fn login(
    State(state): State<AppState>,
    WithRejection(Json(request), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<Json<LoginResponse>, ApiError> {
    let member = state
        .store
        .member_by_username(&request.username)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if !auth::verify_password(&request.password, &member.hashed_password)? {
        warn!("Failed login for '{}'", member.username);
        return Err(ApiError::Forbidden(
            "Could not validate credentials".to_string(),
        ));
    }

    let token = state.tokens.issue(&member.username)?;
    info!("Issued token for '{}'", member.username);
    Ok(Json(LoginResponse { token }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub title: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

async fn list_movies(
    State(state): State<AppState>,
    _member: AuthMember,
    WithRejection(Query(query), _): WithRejection<Query<ListQuery>, ApiError>,
) -> Result<Json<MoviePage>, ApiError> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page < 1 {
        return Err(ApiError::BadRequest("page must be at least 1".to_string()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ApiError::BadRequest(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let title = query.title.filter(|t| !t.is_empty());
    let order_by = if title.is_some() { "id" } else { "title" };
    let filter = MovieFilter {
        title,
        page,
        page_size,
    };
    let (movies, total) = state.store.list(&filter).await?;
    Ok(Json(MoviePage {
        page,
        page_size,
        total,
        order_by,
        order_type: "asc",
        movies,
    }))
}

async fn get_movie(
    State(state): State<AppState>,
    _member: AuthMember,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<StoredMovie>, ApiError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| movie_not_found(id))
}

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    pub title: String,
}

async fn insert_movie(
    State(state): State<AppState>,
    member: AuthMember,
    WithRejection(Json(request), _): WithRejection<Json<InsertRequest>, ApiError>,
) -> Result<(StatusCode, Json<StoredMovie>), ApiError> {
    member.require_admin()?;
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }

    let movie = state.omdb.fetch_by_title(title).await?;
    let stored = state.store.insert(&movie).await?;
    info!(
        "Inserted '{}' ({}) as movie {}",
        stored.movie.title, stored.movie.imdb_id, stored.id
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn delete_movie(
    State(state): State<AppState>,
    member: AuthMember,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<StatusCode, ApiError> {
    member.require_admin()?;
    if !state.store.delete(id).await? {
        return Err(movie_not_found(id));
    }
    info!("Deleted movie {}", id);
    Ok(StatusCode::NO_CONTENT)
}

fn movie_not_found(id: i64) -> ApiError {
    warn!("Movie not found in the database: {}", id);
    ApiError::NotFound(format!("Movie {id} not found"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
