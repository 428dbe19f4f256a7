use crate::models::{Movie, Rating, SearchPage, SearchResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_OMDB_URL: &str = "http://www.omdbapi.com/";
const TYPE_MOVIE: &str = "movie";
const NOT_AVAILABLE: &str = "N/A";
const RELEASED_FORMAT: &str = "%d %b %Y";
const NO_RESULTS_MESSAGE: &str = "Movie not found!";

#[derive(Debug, Error)]
pub enum OmdbError {
    #[error("OMDb rejected the API key: {body}")]
    Unauthorized { body: String },
    #[error("invalid or missing OMDb parameters: {body}")]
    BadRequest { body: String },
    #[error("no OMDb match: {body}")]
    NotFound { body: String },
    #[error("unexpected OMDb status {status}: {body}")]
    InternalError { status: u16, body: String },
    #[error("invalid OMDb response format: {reason}")]
    InvalidResponseFormat { reason: String, body: String },
    #[error("search term must not be empty")]
    EmptySearchTerm,
    #[error("OMDb request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl OmdbError {
    /// Raw response body behind a classified failure.
    pub fn body(&self) -> Option<&str> {
        match self {
            OmdbError::Unauthorized { body }
            | OmdbError::BadRequest { body }
            | OmdbError::NotFound { body }
            | OmdbError::InternalError { body, .. }
            | OmdbError::InvalidResponseFormat { body, .. } => Some(body),
            OmdbError::EmptySearchTerm | OmdbError::Request(_) => None,
        }
    }
}

/// Paging bounds for the search phase. `page_size` must match what OMDb
/// actually returns per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_pages: 10,
        }
    }
}

pub fn pages_needed(total_results: u32, limits: SearchLimits) -> u32 {
    total_results
        .div_ceil(limits.page_size.max(1))
        .min(limits.max_pages)
}

#[async_trait]
pub trait OmdbApi: Send + Sync {
    async fn search_page(&self, term: &str, page: u32) -> Result<SearchPage, OmdbError>;
    async fn fetch_by_imdb_id(&self, imdb_id: &str) -> Result<Movie, OmdbError>;
    async fn fetch_by_title(&self, title: &str) -> Result<Movie, OmdbError>;
}

/// Collects the imdb ids of every result of `term`, up to `limits.max_pages`
/// pages. Page 1 decides how many pages exist; the rest are fetched together
/// and the first failure aborts the search.
pub async fn search_imdb_ids(
    api: &dyn OmdbApi,
    term: &str,
    limits: SearchLimits,
) -> Result<Vec<String>, OmdbError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(OmdbError::EmptySearchTerm);
    }

    let first = api.search_page(term, 1).await?;
    let total_pages = pages_needed(first.total_results, limits);
    info!(
        "OMDb search '{}' reports {} results, reading {} page(s)",
        term,
        first.total_results,
        total_pages.max(1)
    );

    let remaining = try_join_all((2..=total_pages).map(|page| api.search_page(term, page))).await?;

    let mut ids: Vec<String> = first.results.into_iter().map(|r| r.imdb_id).collect();
    for page in remaining {
        ids.extend(page.results.into_iter().map(|r| r.imdb_id));
    }
    Ok(ids)
}

/// Fetches one detail record per id with at most `concurrency` requests in
/// flight. Records come back in completion order, not input order.
pub async fn fetch_details(
    api: &dyn OmdbApi,
    ids: &[String],
    concurrency: usize,
) -> Result<Vec<Movie>, OmdbError> {
    stream::iter(ids)
        .map(|id| api.fetch_by_imdb_id(id))
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await
}

#[derive(Debug, Clone)]
pub struct OmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OmdbClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, OmdbError> {
        let user_agent = format!("cinevault/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, query: &str) -> String {
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{sep}{query}&apikey={}&type={TYPE_MOVIE}",
            self.base_url,
            urlencoding::encode(&self.api_key)
        )
    }

    async fn get_body(&self, url: &str) -> Result<String, OmdbError> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        let body = res.text().await?;
        classify(status, body)
    }
}

#[async_trait]
impl OmdbApi for OmdbClient {
    async fn search_page(&self, term: &str, page: u32) -> Result<SearchPage, OmdbError> {
        debug!("Fetching OMDb search page {} for '{}'", page, term);
        let url = self.url(&format!("s={}&page={page}", urlencoding::encode(term)));
        let body = self.get_body(&url).await?;
        parse_search_page(body)
    }

    async fn fetch_by_imdb_id(&self, imdb_id: &str) -> Result<Movie, OmdbError> {
        debug!("Fetching OMDb detail for {}", imdb_id);
        let url = self.url(&format!("i={}", urlencoding::encode(imdb_id)));
        let body = self.get_body(&url).await?;
        parse_movie(body)
    }

    async fn fetch_by_title(&self, title: &str) -> Result<Movie, OmdbError> {
        debug!("Fetching OMDb detail for title '{}'", title);
        let url = self.url(&format!("t={}", urlencoding::encode(title)));
        let body = self.get_body(&url).await?;
        parse_movie(body)
    }
}

/// Maps an HTTP status to either the body (200) or a classified failure.
pub fn classify(status: StatusCode, body: String) -> Result<String, OmdbError> {
    match status {
        StatusCode::OK => Ok(body),
        StatusCode::UNAUTHORIZED => {
            warn!("Invalid OMDb API key: {}", body);
            Err(OmdbError::Unauthorized { body })
        }
        StatusCode::BAD_REQUEST => {
            warn!("Invalid or missing OMDb parameters: {}", body);
            Err(OmdbError::BadRequest { body })
        }
        StatusCode::NOT_FOUND => {
            info!("No OMDb results: {}", body);
            Err(OmdbError::NotFound { body })
        }
        other => {
            error!("Unexpected OMDb status {}: {}", other, body);
            Err(OmdbError::InternalError {
                status: other.as_u16(),
                body,
            })
        }
    }
}

fn decode<T: DeserializeOwned>(body: String) -> Result<T, OmdbError> {
    serde_json::from_str(&body).map_err(|e| {
        error!("Invalid OMDb response format: {}", e);
        OmdbError::InvalidResponseFormat {
            reason: e.to_string(),
            body,
        }
    })
}

// OMDb answers logical failures with 200 and {"Response":"False","Error":..}.
fn rejection(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "Response")]
        response: Option<String>,
        #[serde(rename = "Error")]
        error: Option<String>,
    }

    let envelope: Envelope = serde_json::from_str(body).ok()?;
    if envelope.response?.eq_ignore_ascii_case("false") {
        Some(envelope.error.unwrap_or_default())
    } else {
        None
    }
}

pub fn parse_search_page(body: String) -> Result<SearchPage, OmdbError> {
    #[derive(Deserialize)]
    struct SearchEnvelope {
        #[serde(rename = "Search")]
        search: Vec<SearchResult>,
        #[serde(rename = "totalResults", deserialize_with = "de_count")]
        total_results: u32,
    }

    if let Some(message) = rejection(&body) {
        if message.eq_ignore_ascii_case(NO_RESULTS_MESSAGE) {
            return Ok(SearchPage::empty());
        }
        warn!("OMDb refused search: {}", message);
        return Err(OmdbError::BadRequest { body });
    }
    let envelope: SearchEnvelope = decode(body)?;
    Ok(SearchPage {
        results: envelope.search,
        total_results: envelope.total_results,
    })
}

pub fn parse_movie(body: String) -> Result<Movie, OmdbError> {
    if let Some(message) = rejection(&body) {
        info!("OMDb has no match: {}", message);
        return Err(OmdbError::NotFound { body });
    }
    let raw: OmdbMovie = decode(body)?;
    Ok(raw.into())
}

pub fn none_if_na(value: String) -> Option<String> {
    if value == NOT_AVAILABLE {
        None
    } else {
        Some(value)
    }
}

fn na_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(none_if_na))
}

fn na_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.and_then(none_if_na) {
        None => Ok(None),
        Some(v) => v
            .replace(',', "")
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid number '{v}': {e}"))),
    }
}

fn na_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.and_then(none_if_na) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v.trim(), RELEASED_FORMAT)
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid release date '{v}': {e}"))),
    }
}

fn de_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.replace(',', "")
        .trim()
        .parse()
        .map_err(|e| de::Error::custom(format!("invalid totalResults '{raw}': {e}")))
}

#[derive(Debug, Deserialize)]
struct OmdbRating {
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct OmdbMovie {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Year", deserialize_with = "na_number")]
    year: Option<i32>,
    #[serde(rename = "Rated", deserialize_with = "na_text")]
    rated: Option<String>,
    #[serde(rename = "Released", deserialize_with = "na_date")]
    released: Option<NaiveDate>,
    #[serde(rename = "Runtime", deserialize_with = "na_text")]
    runtime: Option<String>,
    #[serde(rename = "Genre", deserialize_with = "na_text")]
    genre: Option<String>,
    #[serde(rename = "Director", deserialize_with = "na_text")]
    director: Option<String>,
    #[serde(rename = "Writer", deserialize_with = "na_text")]
    writer: Option<String>,
    #[serde(rename = "Actors", deserialize_with = "na_text")]
    actors: Option<String>,
    #[serde(rename = "Plot", deserialize_with = "na_text")]
    plot: Option<String>,
    #[serde(rename = "Language", deserialize_with = "na_text")]
    language: Option<String>,
    #[serde(rename = "Country", deserialize_with = "na_text")]
    country: Option<String>,
    #[serde(rename = "Awards", deserialize_with = "na_text")]
    awards: Option<String>,
    #[serde(rename = "Poster", deserialize_with = "na_text")]
    poster: Option<String>,
    #[serde(rename = "Ratings")]
    ratings: Vec<OmdbRating>,
    #[serde(rename = "Metascore", deserialize_with = "na_number")]
    metascore: Option<i32>,
    #[serde(rename = "imdbRating", deserialize_with = "na_number")]
    imdb_rating: Option<f64>,
    #[serde(rename = "imdbVotes", deserialize_with = "na_number")]
    imdb_votes: Option<i64>,
    #[serde(rename = "imdbID")]
    imdb_id: String,
    #[serde(rename = "Type")]
    media_type: String,
    // OMDb leaves the commercial fields out for many titles.
    #[serde(rename = "DVD", default, deserialize_with = "na_text")]
    dvd: Option<String>,
    #[serde(rename = "BoxOffice", default, deserialize_with = "na_text")]
    box_office: Option<String>,
    #[serde(rename = "Production", default, deserialize_with = "na_text")]
    production: Option<String>,
    #[serde(rename = "Website", default, deserialize_with = "na_text")]
    website: Option<String>,
}

impl From<OmdbMovie> for Movie {
    fn from(raw: OmdbMovie) -> Self {
        Movie {
            title: raw.title,
            year: raw.year,
            rated: raw.rated,
            released: raw.released,
            runtime: raw.runtime,
            genre: raw.genre,
            director: raw.director,
            writer: raw.writer,
            actors: raw.actors,
            plot: raw.plot,
            language: raw.language,
            country: raw.country,
            awards: raw.awards,
            poster: raw.poster,
            ratings: raw
                .ratings
                .into_iter()
                .map(|r| Rating {
                    source: r.source,
                    value: r.value,
                })
                .collect(),
            metascore: raw.metascore,
            imdb_rating: raw.imdb_rating,
            imdb_votes: raw.imdb_votes,
            imdb_id: raw.imdb_id,
            media_type: raw.media_type,
            dvd: raw.dvd,
            box_office: raw.box_office,
            production: raw.production,
            website: raw.website,
        }
    }
}
