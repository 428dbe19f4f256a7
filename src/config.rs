use crate::omdb::{SearchLimits, DEFAULT_OMDB_URL};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::info;

const DEFAULT_DATABASE_URL: &str = "sqlite://cinevault.db";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_SEED_TERM: &str = "Batman";
const MAX_TOKEN_TTL_MINUTES: i64 = 525_600; // one year

#[derive(Debug, Clone)]
pub struct DemoMember {
    pub username: String,
    pub password: String,
    pub is_admin: bool,
}

/// Everything the seeding run needs besides the store and the catalog.
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub search_term: String,
    pub limits: SearchLimits,
    pub detail_concurrency: usize,
    pub demo_members: Vec<DemoMember>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub omdb_api_url: String,
    pub omdb_api_key: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub bind_addr: SocketAddr,
    pub seed: SeedPlan,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let omdb_api_key = required("OMDB_API_KEY")?;
        let token_secret = required("TOKEN_SECRET")?;

        let limits = SearchLimits {
            page_size: parsed("SEED_PAGE_SIZE", 10)?,
            max_pages: parsed("SEED_MAX_PAGES", 10)?,
        };
        if limits.page_size == 0 || limits.max_pages == 0 {
            anyhow::bail!("SEED_PAGE_SIZE and SEED_MAX_PAGES must be at least 1");
        }

        let mut demo_members = Vec::new();
        if let Some(member) = demo_member("REGULAR_USER", false)? {
            demo_members.push(member);
        }
        if let Some(member) = demo_member("ADMIN_USER", true)? {
            demo_members.push(member);
        }

        let config = Self {
            omdb_api_url: optional("OMDB_API_URL").unwrap_or_else(|| DEFAULT_OMDB_URL.to_string()),
            omdb_api_key,
            database_url: optional("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 5)?,
            token_secret,
            token_ttl_minutes: token_ttl(parsed("TOKEN_TTL_MINUTES", 30)?)?,
            bind_addr: parsed("BIND_ADDR", DEFAULT_BIND_ADDR.parse()?)?,
            seed: SeedPlan {
                search_term: optional("SEED_SEARCH_TERM")
                    .unwrap_or_else(|| DEFAULT_SEED_TERM.to_string()),
                limits,
                detail_concurrency: parsed("SEED_DETAIL_CONCURRENCY", 10)?,
                demo_members,
            },
        };
        info!("Configuration loaded from environment");
        Ok(config)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).ok_or_else(|| anyhow!("Missing required environment variable: {}", key))
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

fn token_ttl(minutes: i64) -> Result<i64> {
    if (1..=MAX_TOKEN_TTL_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(anyhow!(
            "TOKEN_TTL_MINUTES must be between 1 and {MAX_TOKEN_TTL_MINUTES}, got {minutes}"
        ))
    }
}

// Both halves of a pair must be present, or neither.
fn demo_member(prefix: &str, is_admin: bool) -> Result<Option<DemoMember>> {
    let username = optional(&format!("{prefix}_USERNAME"));
    let password = optional(&format!("{prefix}_PASSWORD"));
    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(DemoMember {
            username,
            password,
            is_admin,
        })),
        (None, None) => Ok(None),
        _ => Err(anyhow!(
            "{prefix}_USERNAME and {prefix}_PASSWORD must be set together"
        )),
    }
}
