use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info, instrument};

use super::traits::PhotoStore;
use crate::domain::{Photo, PhotoFilter};
use crate::error::Result;

const PHOTO_COLUMNS: &str =
    "vk_id, owner_id, object_id, album_id, album, user_id, text, link, date_time, posted";

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Compile a filter into a parameterized SELECT
pub fn select_photos(filter: &PhotoFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(format!("SELECT {} FROM photos WHERE TRUE", PHOTO_COLUMNS));

    if let Some(owner_id) = filter.owner_id {
        query.push(" AND owner_id = ").push_bind(owner_id);
    }
    if let Some(albums) = &filter.albums {
        query.push(" AND album = ANY(").push_bind(albums.clone()).push(")");
    }
    if let Some(restricted) = &filter.restricted_albums {
        query
            .push(" AND album <> ALL(")
            .push_bind(restricted.clone())
            .push(")");
    }
    if let Some(start) = filter.start_datetime {
        query.push(" AND date_time >= ").push_bind(start);
    }
    if let Some(end) = filter.end_datetime {
        query.push(" AND date_time <= ").push_bind(end);
    }
    if let Some(posted) = filter.posted {
        query.push(" AND posted = ").push_bind(posted);
    }

    if filter.random {
        query.push(" ORDER BY random()");
    } else {
        // byte order on ties, same as the in-memory store
        query.push(" ORDER BY date_time, vk_id COLLATE \"C\"");
    }

    if let Some(limit) = filter.limit {
        query
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(offset) = filter.offset {
        query
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
    }

    query
}

fn photo_from_row(row: &PgRow) -> Photo {
    Photo {
        vk_id: row.get("vk_id"),
        owner_id: row.get("owner_id"),
        object_id: row.get("object_id"),
        album_id: row.get("album_id"),
        album: row.get("album"),
        user_id: row.get("user_id"),
        text: row.get("text"),
        link: row.get("link"),
        date_time: row.get("date_time"),
        posted: row.get("posted"),
    }
}

#[async_trait]
impl PhotoStore for PostgresStore {
    #[instrument(skip(self, photos), fields(count = photos.len()))]
    async fn save_photos(&self, photos: &[Photo]) -> Result<()> {
        if photos.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for photo in photos {
            sqlx::query(
                r#"
                INSERT INTO photos (vk_id, owner_id, object_id, album_id, album, user_id, text, link, date_time, posted)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (vk_id) DO UPDATE SET
                    owner_id = EXCLUDED.owner_id,
                    object_id = EXCLUDED.object_id,
                    album_id = EXCLUDED.album_id,
                    album = EXCLUDED.album,
                    user_id = EXCLUDED.user_id,
                    text = EXCLUDED.text,
                    link = EXCLUDED.link,
                    date_time = EXCLUDED.date_time,
                    posted = EXCLUDED.posted
                "#,
            )
            .bind(&photo.vk_id)
            .bind(photo.owner_id)
            .bind(photo.object_id)
            .bind(photo.album_id)
            .bind(&photo.album)
            .bind(photo.user_id)
            .bind(&photo.text)
            .bind(&photo.link)
            .bind(photo.date_time)
            .bind(photo.posted)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Saved {} photos", photos.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_photos(&self, filter: &PhotoFilter) -> Result<Vec<Photo>> {
        let mut query = select_photos(filter);
        let rows = query.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(photo_from_row).collect())
    }
}
