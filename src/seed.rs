//! One-shot startup seeding of the movie store from OMDb.

use crate::auth::{self, AuthError};
use crate::config::SeedPlan;
use crate::omdb::{self, OmdbApi, OmdbError};
use crate::store::{MovieStore, NewMember, StoreError};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] OmdbError),
    #[error("storing seed data failed: {0}")]
    Store(#[from] StoreError),
    #[error("creating demo members failed: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Skipped { existing: i64 },
    Seeded { movies: usize, members: usize },
}

/// Populates an empty store. A store holding at least one movie is left
/// untouched and no remote call is made. Movies and demo members are
/// committed together, so any failure leaves the store empty.
pub async fn seed_if_empty(
    store: &MovieStore,
    api: &dyn OmdbApi,
    plan: &SeedPlan,
) -> Result<SeedOutcome, SeedError> {
    let existing = store.count().await?;
    if existing > 0 {
        info!("Store already holds {} movies, skipping seed", existing);
        return Ok(SeedOutcome::Skipped { existing });
    }

    // Hashed before any remote call.
    let members = plan
        .demo_members
        .iter()
        .map(|demo| {
            Ok(NewMember {
                username: demo.username.clone(),
                hashed_password: auth::hash_password(&demo.password)?,
                is_admin: demo.is_admin,
            })
        })
        .collect::<Result<Vec<_>, AuthError>>()?;

    info!("Seeding store from OMDb search '{}'", plan.search_term);
    let found = omdb::search_imdb_ids(api, &plan.search_term, plan.limits).await?;
    let ids = dedupe_ids(found);
    let movies = omdb::fetch_details(api, &ids, plan.detail_concurrency).await?;
    let created = store.seed_batch(&movies, &members).await?;

    info!(
        "Seed finished: {} movies, {} demo members",
        movies.len(),
        created
    );
    Ok(SeedOutcome::Seeded {
        movies: movies.len(),
        members: created,
    })
}

// First occurrence wins, order preserved.
fn dedupe_ids(ids: Vec<String>) -> Vec<String> {
    let total = ids.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
    if unique.len() < total {
        warn!(
            "Dropped {} duplicate imdb ids from search results",
            total - unique.len()
        );
    }
    unique
}
