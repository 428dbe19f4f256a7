//! SQLite persistence for movies, their ratings and members.

use crate::models::{Member, Movie, Rating, StoredMovie};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS movie (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        year INTEGER,
        rated TEXT,
        released TEXT,
        runtime TEXT,
        genre TEXT,
        director TEXT,
        writer TEXT,
        actors TEXT,
        plot TEXT,
        language TEXT,
        country TEXT,
        awards TEXT,
        poster TEXT,
        metascore INTEGER,
        imdb_rating REAL,
        imdb_votes INTEGER,
        imdb_id TEXT NOT NULL,
        media_type TEXT NOT NULL,
        dvd TEXT,
        box_office TEXT,
        production TEXT,
        website TEXT,
        CONSTRAINT imdb_id_unique UNIQUE (imdb_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_movie_title ON movie (title)",
    r#"
    CREATE TABLE IF NOT EXISTS rating (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        movie_id INTEGER NOT NULL REFERENCES movie (id) ON DELETE CASCADE,
        source TEXT NOT NULL,
        value TEXT NOT NULL,
        CONSTRAINT movie_source_value_unique UNIQUE (movie_id, source, value)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_rating_movie_id ON rating (movie_id)",
    r#"
    CREATE TABLE IF NOT EXISTS member (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        hashed_password TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0,
        CONSTRAINT username_unique UNIQUE (username)
    )
    "#,
];

const MOVIE_COLUMNS: &str = "id, title, year, rated, released, runtime, genre, director, writer, \
     actors, plot, language, country, awards, poster, metascore, imdb_rating, imdb_votes, \
     imdb_id, media_type, dvd, box_office, production, website";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a movie with imdb id '{0}' already exists")]
    UniqueConstraintViolation(String),
    #[error("username '{0}' is already taken")]
    UsernameTaken(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Page request for [`MovieStore::list`]; `page` starts at 1.
#[derive(Debug, Clone)]
pub struct MovieFilter {
    pub title: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl MovieFilter {
    pub fn limit_offset(&self) -> (i64, i64) {
        let limit = i64::from(self.page_size);
        let offset = i64::from(self.page.saturating_sub(1)) * limit;
        (limit, offset)
    }
}

/// Member row to create, with the password already hashed.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub username: String,
    pub hashed_password: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct MovieStore {
    pool: SqlitePool,
}

impl MovieStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Connected to {}", url);
        Ok(store)
    }

    /// Private in-memory database. A single connection that never expires
    /// keeps the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        debug!("Health probe returned {}", one);
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movie")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts every movie and its ratings in one transaction. Any duplicate
    /// imdb id rolls back the whole batch.
    pub async fn bulk_insert(&self, movies: &[Movie]) -> Result<(), StoreError> {
        if movies.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for movie in movies {
            insert_movie(&mut *tx, movie).await?;
        }
        tx.commit().await?;
        info!("Stored {} movies", movies.len());
        Ok(())
    }

    /// Stores a seed batch: every movie plus the members in one transaction.
    /// Members whose username already exists are left alone. Returns how many
    /// members were created.
    pub async fn seed_batch(
        &self,
        movies: &[Movie],
        members: &[NewMember],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for movie in movies {
            insert_movie(&mut *tx, movie).await?;
        }
        let mut created = 0;
        for member in members {
            let result = sqlx::query(
                "INSERT INTO member (username, hashed_password, is_admin) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (username) DO NOTHING",
            )
            .bind(&member.username)
            .bind(&member.hashed_password)
            .bind(member.is_admin)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                created += 1;
            } else {
                info!("Member '{}' already exists", member.username);
            }
        }
        tx.commit().await?;
        info!("Stored {} movies and {} members", movies.len(), created);
        Ok(created)
    }

    pub async fn insert(&self, movie: &Movie) -> Result<StoredMovie, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = insert_movie(&mut *tx, movie).await?;
        tx.commit().await?;
        Ok(StoredMovie {
            id,
            movie: Movie {
                ratings: dedupe_ratings(&movie.ratings),
                ..movie.clone()
            },
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<StoredMovie>, StoreError> {
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movie WHERE id = ?1");
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let mut movies = vec![movie_from_row(&row)?];
        self.attach_ratings(&mut movies).await?;
        Ok(movies.pop())
    }

    /// Returns one page of movies and the number of movies matching the
    /// filter. Without a title the order is alphabetical, with one it is by id.
    pub async fn list(&self, filter: &MovieFilter) -> Result<(Vec<StoredMovie>, i64), StoreError> {
        let (limit, offset) = filter.limit_offset();
        let (rows, total) = match filter.title.as_deref() {
            Some(title) => {
                let sql = format!(
                    "SELECT {MOVIE_COLUMNS} FROM movie WHERE title = ?1 ORDER BY id LIMIT ?2 OFFSET ?3"
                );
                let rows = sqlx::query(&sql)
                    .bind(title)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movie WHERE title = ?1")
                    .bind(title)
                    .fetch_one(&self.pool)
                    .await?;
                (rows, total)
            }
            None => {
                let sql = format!(
                    "SELECT {MOVIE_COLUMNS} FROM movie ORDER BY title, id LIMIT ?1 OFFSET ?2"
                );
                let rows = sqlx::query(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                (rows, self.count().await?)
            }
        };

        let mut movies = rows
            .iter()
            .map(movie_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_ratings(&mut movies).await?;
        Ok((movies, total))
    }

    /// Deletes a movie and, through the foreign key, its ratings.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM movie WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn create_member(
        &self,
        username: &str,
        hashed_password: &str,
        is_admin: bool,
    ) -> Result<Member, StoreError> {
        let result = sqlx::query(
            "INSERT INTO member (username, hashed_password, is_admin) VALUES (?1, ?2, ?3)",
        )
        .bind(username)
        .bind(hashed_password)
        .bind(is_admin)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::UsernameTaken(username.to_string())
            }
            other => StoreError::Database(other),
        })?;
        Ok(Member {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            hashed_password: hashed_password.to_string(),
            is_admin,
        })
    }

    pub async fn member_by_username(&self, username: &str) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, hashed_password, is_admin FROM member WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> Result<Member, StoreError> {
            Ok(Member {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                hashed_password: row.try_get("hashed_password")?,
                is_admin: row.try_get("is_admin")?,
            })
        })
        .transpose()
    }

    async fn attach_ratings(&self, movies: &mut [StoredMovie]) -> Result<(), StoreError> {
        if movies.is_empty() {
            return Ok(());
        }
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT movie_id, source, value FROM rating WHERE movie_id IN (");
        let mut ids = query.separated(", ");
        for movie in movies.iter() {
            ids.push_bind(movie.id);
        }
        ids.push_unseparated(") ORDER BY id");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut by_movie: HashMap<i64, Vec<Rating>> = HashMap::new();
        for row in rows {
            by_movie
                .entry(row.try_get("movie_id")?)
                .or_default()
                .push(Rating {
                    source: row.try_get("source")?,
                    value: row.try_get("value")?,
                });
        }
        for movie in movies.iter_mut() {
            movie.movie.ratings = by_movie.remove(&movie.id).unwrap_or_default();
        }
        Ok(())
    }
}

async fn insert_movie(conn: &mut SqliteConnection, movie: &Movie) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO movie (
            title, year, rated, released, runtime, genre, director, writer, actors, plot,
            language, country, awards, poster, metascore, imdb_rating, imdb_votes, imdb_id,
            media_type, dvd, box_office, production, website
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23)
        "#,
    )
    .bind(&movie.title)
    .bind(movie.year)
    .bind(&movie.rated)
    .bind(movie.released)
    .bind(&movie.runtime)
    .bind(&movie.genre)
    .bind(&movie.director)
    .bind(&movie.writer)
    .bind(&movie.actors)
    .bind(&movie.plot)
    .bind(&movie.language)
    .bind(&movie.country)
    .bind(&movie.awards)
    .bind(&movie.poster)
    .bind(movie.metascore)
    .bind(movie.imdb_rating)
    .bind(movie.imdb_votes)
    .bind(&movie.imdb_id)
    .bind(&movie.media_type)
    .bind(&movie.dvd)
    .bind(&movie.box_office)
    .bind(&movie.production)
    .bind(&movie.website)
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::UniqueConstraintViolation(movie.imdb_id.clone())
        }
        other => StoreError::Database(other),
    })?;
    let movie_id = result.last_insert_rowid();

    for rating in dedupe_ratings(&movie.ratings) {
        sqlx::query("INSERT INTO rating (movie_id, source, value) VALUES (?1, ?2, ?3)")
            .bind(movie_id)
            .bind(&rating.source)
            .bind(&rating.value)
            .execute(&mut *conn)
            .await?;
    }
    Ok(movie_id)
}

fn dedupe_ratings(ratings: &[Rating]) -> Vec<Rating> {
    let mut seen = HashSet::new();
    ratings
        .iter()
        .filter(|r| seen.insert((*r).clone()))
        .cloned()
        .collect()
}

fn movie_from_row(row: &SqliteRow) -> Result<StoredMovie, StoreError> {
    Ok(StoredMovie {
        id: row.try_get("id")?,
        movie: Movie {
            title: row.try_get("title")?,
            year: row.try_get("year")?,
            rated: row.try_get("rated")?,
            released: row.try_get("released")?,
            runtime: row.try_get("runtime")?,
            genre: row.try_get("genre")?,
            director: row.try_get("director")?,
            writer: row.try_get("writer")?,
            actors: row.try_get("actors")?,
            plot: row.try_get("plot")?,
            language: row.try_get("language")?,
            country: row.try_get("country")?,
            awards: row.try_get("awards")?,
            poster: row.try_get("poster")?,
            ratings: Vec::new(),
            metascore: row.try_get("metascore")?,
            imdb_rating: row.try_get("imdb_rating")?,
            imdb_votes: row.try_get("imdb_votes")?,
            imdb_id: row.try_get("imdb_id")?,
            media_type: row.try_get("media_type")?,
            dvd: row.try_get("dvd")?,
            box_office: row.try_get("box_office")?,
            production: row.try_get("production")?,
            website: row.try_get("website")?,
        },
    })
}
