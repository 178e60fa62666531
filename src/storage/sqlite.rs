use crate::analytics::{BounceCategory, CounterRow, UniqueResponders};
use crate::models::{
    CampaignLinkManifest, EventRow, RawEvent, RecipientKey, RecipientSummary, ResponseType,
};
use crate::storage::trait_def::bounce_filter;
use crate::storage::{EventStream, Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;
use tokio_stream::StreamExt;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

const INSERT_SUMMARY: &str = r#"
    INSERT INTO recipient_summaries (
        mailing_id, recipient_id, recipient_table,
        pings_count, pings_first_offset, pings_last_offset,
        html_links_count, html_links_first_offset, html_links_last_offset,
        plain_links_count, plain_links_first_offset, plain_links_last_offset,
        total_links_count, total_links_first_offset, total_links_last_offset,
        response_count, response_first_offset, response_last_offset,
        first_link_id, first_link_latency,
        second_link_id, second_link_latency,
        third_link_id, third_link_latency,
        bounced, delivered_formats, payload_size, sent_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (mailing_id, recipient_table, recipient_id) DO UPDATE SET
        pings_count = excluded.pings_count,
        pings_first_offset = excluded.pings_first_offset,
        pings_last_offset = excluded.pings_last_offset,
        html_links_count = excluded.html_links_count,
        html_links_first_offset = excluded.html_links_first_offset,
        html_links_last_offset = excluded.html_links_last_offset,
        plain_links_count = excluded.plain_links_count,
        plain_links_first_offset = excluded.plain_links_first_offset,
        plain_links_last_offset = excluded.plain_links_last_offset,
        total_links_count = excluded.total_links_count,
        total_links_first_offset = excluded.total_links_first_offset,
        total_links_last_offset = excluded.total_links_last_offset,
        response_count = excluded.response_count,
        response_first_offset = excluded.response_first_offset,
        response_last_offset = excluded.response_last_offset,
        first_link_id = excluded.first_link_id,
        first_link_latency = excluded.first_link_latency,
        second_link_id = excluded.second_link_id,
        second_link_latency = excluded.second_link_latency,
        third_link_id = excluded.third_link_id,
        third_link_latency = excluded.third_link_latency,
        bounced = excluded.bounced,
        delivered_formats = excluded.delivered_formats,
        payload_size = excluded.payload_size,
        sent_at = excluded.sent_at
"#;

fn bind_summary<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    s: &'q RecipientSummary,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(s.mailing_id)
        .bind(s.recipient_id)
        .bind(s.recipient_table.as_str())
        .bind(s.pings_count)
        .bind(s.pings_first_offset)
        .bind(s.pings_last_offset)
        .bind(s.html_links_count)
        .bind(s.html_links_first_offset)
        .bind(s.html_links_last_offset)
        .bind(s.plain_links_count)
        .bind(s.plain_links_first_offset)
        .bind(s.plain_links_last_offset)
        .bind(s.total_links_count)
        .bind(s.total_links_first_offset)
        .bind(s.total_links_last_offset)
        .bind(s.response_count)
        .bind(s.response_first_offset)
        .bind(s.response_last_offset)
        .bind(s.first_link_id)
        .bind(s.first_link_latency)
        .bind(s.second_link_id)
        .bind(s.second_link_latency)
        .bind(s.third_link_id)
        .bind(s.third_link_latency)
        .bind(s.bounced)
        .bind(s.delivered_formats)
        .bind(s.payload_size)
        .bind(s.sent_at)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        // Mail log: one row per sent / ping / click / bounce
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mail_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mid INTEGER NOT NULL,
                rid INTEGER NOT NULL,
                rtbl TEXT NOT NULL,
                tstamp INTEGER NOT NULL,
                response_type INTEGER NOT NULL,
                url_id INTEGER,
                html_sent INTEGER NOT NULL DEFAULT 0,
                size INTEGER,
                return_code INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mail_events_recipient ON mail_events(mid, rtbl, rid, tstamp)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mail_events_response ON mail_events(mid, response_type)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_manifests (
                mailing_id INTEGER PRIMARY KEY,
                manifest TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recipient_summaries (
                mailing_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                recipient_table TEXT NOT NULL,
                pings_count INTEGER NOT NULL DEFAULT 0,
                pings_first_offset INTEGER NOT NULL DEFAULT 0,
                pings_last_offset INTEGER NOT NULL DEFAULT 0,
                html_links_count INTEGER NOT NULL DEFAULT 0,
                html_links_first_offset INTEGER NOT NULL DEFAULT 0,
                html_links_last_offset INTEGER NOT NULL DEFAULT 0,
                plain_links_count INTEGER NOT NULL DEFAULT 0,
                plain_links_first_offset INTEGER NOT NULL DEFAULT 0,
                plain_links_last_offset INTEGER NOT NULL DEFAULT 0,
                total_links_count INTEGER NOT NULL DEFAULT 0,
                total_links_first_offset INTEGER NOT NULL DEFAULT 0,
                total_links_last_offset INTEGER NOT NULL DEFAULT 0,
                response_count INTEGER NOT NULL DEFAULT 0,
                response_first_offset INTEGER NOT NULL DEFAULT 0,
                response_last_offset INTEGER NOT NULL DEFAULT 0,
                first_link_id INTEGER,
                first_link_latency INTEGER NOT NULL DEFAULT 0,
                second_link_id INTEGER,
                second_link_latency INTEGER NOT NULL DEFAULT 0,
                third_link_id INTEGER,
                third_link_latency INTEGER NOT NULL DEFAULT 0,
                bounced INTEGER NOT NULL DEFAULT 0,
                delivered_formats INTEGER NOT NULL DEFAULT 0,
                payload_size INTEGER NOT NULL DEFAULT 0,
                sent_at INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (mailing_id, recipient_table, recipient_id)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn append_events(&self, mailing_id: i64, events: &[RawEvent]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO mail_events
                    (mid, rid, rtbl, tstamp, response_type, url_id, html_sent, size, return_code)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(mailing_id)
            .bind(event.recipient_id)
            .bind(event.recipient_table.as_str())
            .bind(event.timestamp)
            .bind(event.response_type.code())
            .bind(event.url_id)
            .bind(event.format_flags)
            .bind(event.payload_size)
            .bind(event.return_code)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    fn event_stream(&self, mailing_id: i64) -> EventStream<'_> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT rid, rtbl, tstamp, response_type, url_id, html_sent, size, return_code
            FROM mail_events
            WHERE mid = ?
            ORDER BY rtbl, rid, tstamp, id
            "#,
        )
        .bind(mailing_id)
        .fetch(self.pool.as_ref());

        Box::pin(rows.map(|row| row.map(RawEvent::from).map_err(anyhow::Error::from)))
    }

    async fn put_manifest(
        &self,
        mailing_id: i64,
        manifest: &CampaignLinkManifest,
    ) -> StorageResult<()> {
        let json = serde_json::to_string(manifest).map_err(|e| StorageError::Other(e.into()))?;
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| StorageError::Other(e.into()))?
            .as_secs() as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO link_manifests (mailing_id, manifest, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(mailing_id) DO NOTHING
            "#,
        )
        .bind(mailing_id)
        .bind(json)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(mailing_id));
        }

        Ok(())
    }

    async fn get_manifest(&self, mailing_id: i64) -> Result<Option<CampaignLinkManifest>> {
        let json = sqlx::query_scalar::<_, String>(
            "SELECT manifest FROM link_manifests WHERE mailing_id = ?",
        )
        .bind(mailing_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn clear_summaries(&self, mailing_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM recipient_summaries WHERE mailing_id = ?")
            .bind(mailing_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_summary(&self, summary: &RecipientSummary) -> Result<()> {
        bind_summary(sqlx::query(INSERT_SUMMARY), summary)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn replace_summaries(
        &self,
        mailing_id: i64,
        summaries: &[RecipientSummary],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM recipient_summaries WHERE mailing_id = ?")
            .bind(mailing_id)
            .execute(&mut *tx)
            .await?;

        let mut written = 0;
        for summary in summaries {
            let result = bind_summary(sqlx::query(INSERT_SUMMARY), summary)
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn list_summaries(&self, mailing_id: i64) -> Result<Vec<RecipientSummary>> {
        let summaries = sqlx::query_as::<_, RecipientSummary>(
            r#"
            SELECT * FROM recipient_summaries
            WHERE mailing_id = ?
            ORDER BY recipient_table, recipient_id
            "#,
        )
        .bind(mailing_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(summaries)
    }

    async fn count_summaries(&self, mailing_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM recipient_summaries WHERE mailing_id = ?",
        )
        .bind(mailing_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn response_type_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>> {
        let rows = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT response_type AS bucket, COUNT(*) AS counter
            FROM mail_events
            WHERE mid = ?
            GROUP BY response_type
            "#,
        )
        .bind(mailing_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn sent_format_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>> {
        let rows = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT html_sent AS bucket, COUNT(*) AS counter
            FROM mail_events
            WHERE mid = ? AND response_type = 0
            GROUP BY html_sent
            "#,
        )
        .bind(mailing_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn bounce_code_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>> {
        let rows = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT COALESCE(return_code, -1) AS bucket, COUNT(*) AS counter
            FROM mail_events
            WHERE mid = ? AND response_type = -127
            GROUP BY COALESCE(return_code, -1)
            "#,
        )
        .bind(mailing_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn url_click_counts(
        &self,
        mailing_id: i64,
        response_type: ResponseType,
    ) -> Result<Vec<CounterRow>> {
        let rows = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT url_id AS bucket, COUNT(*) AS counter
            FROM mail_events
            WHERE mid = ? AND response_type = ?
            GROUP BY url_id
            ORDER BY counter DESC, url_id
            "#,
        )
        .bind(mailing_id)
        .bind(response_type.code())
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn unique_responders(&self, mailing_id: i64) -> Result<UniqueResponders> {
        let unique = sqlx::query_as::<_, UniqueResponders>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN pings_count > 0 THEN 1 ELSE 0 END), 0) AS pings,
                COALESCE(SUM(CASE WHEN html_links_count > 0 THEN 1 ELSE 0 END), 0) AS html_clicks,
                COALESCE(SUM(CASE WHEN plain_links_count > 0 THEN 1 ELSE 0 END), 0) AS plain_clicks
            FROM recipient_summaries
            WHERE mailing_id = ?
            "#,
        )
        .bind(mailing_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(unique)
    }

    async fn bounced_recipients(
        &self,
        mailing_id: i64,
        category: Option<BounceCategory>,
    ) -> Result<Vec<RecipientKey>> {
        let sql = format!(
            r#"
            SELECT DISTINCT rtbl, rid
            FROM mail_events
            WHERE mid = ? AND response_type = -127{}
            ORDER BY rtbl, rid
            "#,
            bounce_filter(category)
        );

        let recipients = sqlx::query_as::<_, (String, i64)>(&sql)
            .bind(mailing_id)
            .fetch_all(self.pool.as_ref())
            .await?
            .into_iter()
            .map(|(table, id)| RecipientKey::new(table, id))
            .collect();

        Ok(recipients)
    }
}
