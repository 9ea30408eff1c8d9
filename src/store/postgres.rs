//! PostgreSQL forwarded-set.
//!
//! One row per forwarded item in `forwarded_items`, created by the embedded
//! migrations. `url` is indexed but not unique.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use super::{Store, StoreError};
use crate::source::Item;

/// Connection parameters for [`PgStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `host` or `host:port`.
    pub host: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub database: String,
    /// Upper bound for acquiring a pooled connection.
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new().database(&self.database);

        let host_port = self
            .host
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)));
        options = match host_port {
            Some((host, port)) => options.host(host).port(port),
            None => options.host(&self.host).port(5432),
        };
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(pass) = &self.pass {
            options = options.password(pass);
        }
        options
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    url: String,
    title: String,
    published_at: DateTime<Utc>,
    author: String,
    summary: String,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            title: row.title,
            published_at: row.published_at,
            author: row.author,
            summary: row.summary,
            url: row.url,
        }
    }
}

/// PostgreSQL-backed forwarded-set: one row per forwarded item in
/// `forwarded_items`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and verify connectivity with a round trip.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(config.connect_options())
            .await?;

        let (one,): (i32,) = sqlx::query_as("select 1").fetch_one(&pool).await?;
        debug!(ping = one, host = %config.host, "connected to store");

        Ok(Self { pool })
    }

    /// Wrap an already connected pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations. Safe to run on every start.
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("store schema is up to date");
        Ok(())
    }

    /// Run `f` inside a `REPEATABLE READ` transaction.
    ///
    /// Every read `f` performs sees the same snapshot. The transaction is
    /// committed when `f` succeeds and rolled back (on drop) when it fails.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, StoreError>> + Send,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query("set transaction isolation level repeatable read")
            .execute(&mut *tx)
            .await?;

        let out = f(&mut *tx).await?;

        tx.commit().await?;
        Ok(out)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_all(&self) -> Result<Vec<Item>, StoreError> {
        self.transaction(|conn| {
            Box::pin(async move {
                let rows: Vec<ItemRow> = sqlx::query_as(
                    r#"
                    select url, title, published_at, author, summary
                    from forwarded_items
                    order by id
                    "#,
                )
                .fetch_all(conn)
                .await?;
                Ok(rows.into_iter().map(Item::from).collect())
            })
        })
        .await
    }

    async fn add(&self, item: &Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into forwarded_items (url, title, published_at, author, summary)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&item.url)
        .bind(&item.title)
        .bind(item.published_at)
        .bind(&item.author)
        .bind(&item.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
