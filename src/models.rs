use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One entry of an OMDb search page. Only the identifier is carried forward.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Year")]
    pub year: String,
    #[serde(rename = "imdbID")]
    pub imdb_id: String,
    #[serde(rename = "Type")]
    pub media_type: String,
    #[serde(rename = "Poster")]
    pub poster: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub total_results: u32,
}

impl SearchPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rating {
    pub source: String,
    pub value: String,
}

/// Normalized movie record, as fetched from the catalog and as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub title: String,
    pub year: Option<i32>,
    pub rated: Option<String>,
    pub released: Option<NaiveDate>,
    pub runtime: Option<String>,
    pub genre: Option<String>,
    pub director: Option<String>,
    pub writer: Option<String>,
    pub actors: Option<String>,
    pub plot: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub awards: Option<String>,
    pub poster: Option<String>,
    pub ratings: Vec<Rating>,
    pub metascore: Option<i32>,
    pub imdb_rating: Option<f64>,
    pub imdb_votes: Option<i64>,
    pub imdb_id: String,
    pub media_type: String,
    pub dvd: Option<String>,
    pub box_office: Option<String>,
    pub production: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMovie {
    pub id: i64,
    #[serde(flatten)]
    pub movie: Movie,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoviePage {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub order_by: &'static str,
    pub order_type: &'static str,
    pub movies: Vec<StoredMovie>,
}
