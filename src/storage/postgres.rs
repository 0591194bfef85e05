use crate::analytics::models::{
    Aggregate, BucketQuery, ContentType, ContentView, StatsFilter, ViewEvent, Windows,
};
use crate::storage::{SlotCount, StorageResult, ViewStore};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &StatsFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(page) = &filter.page {
        qb.push(" AND page = ").push_bind(page.clone());
    }
    if let Some(start) = filter.start {
        qb.push(" AND viewed_at >= ").push_bind(start.timestamp());
    }
    if let Some(end) = filter.end {
        qb.push(" AND viewed_at <= ").push_bind(end.timestamp());
    }
    if let Some(country) = &filter.country {
        qb.push(" AND country = ").push_bind(country.clone());
    }
}

#[async_trait]
impl ViewStore for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS page_views (
                id BIGSERIAL PRIMARY KEY,
                page TEXT NOT NULL,
                visitor_id TEXT NOT NULL,
                user_agent TEXT,
                referrer TEXT,
                ip TEXT,
                country TEXT,
                city TEXT,
                session_id TEXT,
                viewed_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_page_views_page ON page_views(page)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_page_views_visitor ON page_views(visitor_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_page_views_viewed_at ON page_views(viewed_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_views (
                id BIGSERIAL PRIMARY KEY,
                content_type TEXT NOT NULL,
                content_id TEXT NOT NULL,
                visitor_id TEXT NOT NULL,
                user_agent TEXT,
                referrer TEXT,
                ip TEXT,
                viewed_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_content_views_content ON content_views(content_type, content_id)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_content_views_visitor ON content_views(visitor_id)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_content_views_viewed_at ON content_views(viewed_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn append(&self, event: &ViewEvent) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO page_views
                (page, visitor_id, user_agent, referrer, ip, country, city, session_id, viewed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event.page)
        .bind(&event.visitor_id)
        .bind(&event.user_agent)
        .bind(&event.referrer)
        .bind(&event.ip)
        .bind(&event.country)
        .bind(&event.city)
        .bind(&event.session_id)
        .bind(event.viewed_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn count_predicate(
        &self,
        filter: &StatsFilter,
        windows: &Windows,
    ) -> StorageResult<Aggregate> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN viewed_at >= ",
        );
        qb.push_bind(windows.today_start);
        qb.push(" THEN 1 ELSE 0 END), 0), COALESCE(SUM(CASE WHEN viewed_at >= ");
        qb.push_bind(windows.week_start);
        qb.push(" THEN 1 ELSE 0 END), 0), COALESCE(SUM(CASE WHEN viewed_at >= ");
        qb.push_bind(windows.month_start);
        qb.push(" THEN 1 ELSE 0 END), 0), COUNT(DISTINCT visitor_id) FROM page_views");
        push_filter(&mut qb, filter);

        let (total, today, week, month, unique) = qb
            .build_query_as::<(i64, i64, i64, i64, i64)>()
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(Aggregate {
            total,
            today,
            week,
            month,
            unique,
        })
    }

    async fn bucket(&self, query: &BucketQuery) -> StorageResult<Vec<SlotCount>> {
        if query.start > query.end {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Postgres>::new("SELECT (viewed_at + ");
        qb.push_bind(query.offset_secs);
        qb.push(") / ");
        qb.push_bind(query.interval.seconds());
        qb.push(" AS slot, COUNT(*) AS views FROM page_views WHERE viewed_at >= ");
        qb.push_bind(query.start);
        qb.push(" AND viewed_at <= ");
        qb.push_bind(query.end);
        if let Some(page) = &query.page {
            qb.push(" AND page = ").push_bind(page.clone());
        }
        qb.push(" GROUP BY slot ORDER BY slot");

        let rows = qb
            .build_query_as::<(i64, i64)>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }

    async fn recent_match(&self, page: &str, visitor_id: &str, since: i64) -> StorageResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM page_views
            WHERE page = $1 AND visitor_id = $2 AND viewed_at >= $3
            LIMIT 1
            "#,
        )
        .bind(page)
        .bind(visitor_id)
        .bind(since)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(found.is_some())
    }

    async fn append_content(&self, view: &ContentView) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO content_views
                (content_type, content_id, visitor_id, user_agent, referrer, ip, viewed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(view.content_type.as_str())
        .bind(&view.content_id)
        .bind(&view.visitor_id)
        .bind(&view.user_agent)
        .bind(&view.referrer)
        .bind(&view.ip)
        .bind(view.viewed_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn recent_content_match(
        &self,
        content_type: ContentType,
        content_id: &str,
        visitor_id: &str,
        since: i64,
    ) -> StorageResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM content_views
            WHERE content_type = $1 AND content_id = $2 AND visitor_id = $3 AND viewed_at >= $4
            LIMIT 1
            "#,
        )
        .bind(content_type.as_str())
        .bind(content_id)
        .bind(visitor_id)
        .bind(since)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(found.is_some())
    }

    async fn content_count(
        &self,
        content_type: ContentType,
        content_id: &str,
    ) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM content_views
            WHERE content_type = $1 AND content_id = $2
            "#,
        )
        .bind(content_type.as_str())
        .bind(content_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn content_daily(
        &self,
        content_type: ContentType,
        content_id: &str,
        offset_secs: i64,
    ) -> StorageResult<Vec<SlotCount>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT (viewed_at + $1) / 86400 AS slot, COUNT(*) AS views
            FROM content_views
            WHERE content_type = $2 AND content_id = $3
            GROUP BY slot
            ORDER BY slot
            "#,
        )
        .bind(offset_secs)
        .bind(content_type.as_str())
        .bind(content_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }
}
