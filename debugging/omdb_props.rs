//! Fetch OMDb records and print them as normalized JSON.
//! Usage:
//!   cargo run --bin omdb_props -- id <imdb_id>
//!   cargo run --bin omdb_props -- title <title>
//!   cargo run --bin omdb_props -- search <term>
//! Requires OMDB_API_KEY in the environment (.env supported).

use anyhow::{Context, Result};
use cinevault::omdb::{self, OmdbApi, OmdbClient, SearchLimits, DEFAULT_OMDB_URL};
use dotenvy::dotenv;
use serde_json::json;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Lookup {
    Id,
    Title,
    Search,
}

impl FromStr for Lookup {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "id" => Ok(Lookup::Id),
            "title" => Ok(Lookup::Title),
            "search" => Ok(Lookup::Search),
            _ => Err(anyhow::anyhow!("lookup must be 'id', 'title' or 'search'")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    let mut args = env::args().skip(1);
    let lookup: Lookup = args
        .next()
        .context("missing lookup kind (id | title | search)")?
        .parse()?;
    let query = args.collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("missing query");
    }

    let api_key = env::var("OMDB_API_KEY").context("OMDB_API_KEY not set")?;
    let base_url = env::var("OMDB_API_URL").unwrap_or_else(|_| DEFAULT_OMDB_URL.to_string());
    let client = OmdbClient::new(base_url, api_key)?;

    let output = match lookup {
        Lookup::Id => serde_json::to_value(client.fetch_by_imdb_id(&query).await?)?,
        Lookup::Title => serde_json::to_value(client.fetch_by_title(&query).await?)?,
        Lookup::Search => {
            let ids = omdb::search_imdb_ids(&client, &query, SearchLimits::default()).await?;
            json!({ "count": ids.len(), "imdb_ids": ids })
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
