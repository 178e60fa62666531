use crate::analytics::{BounceCategory, CounterRow, UniqueResponders};
use crate::models::{
    CampaignLinkManifest, EventRow, RawEvent, RecipientKey, RecipientSummary, ResponseType,
};
use crate::storage::trait_def::bounce_filter;
use crate::storage::{EventStream, Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use tokio_stream::StreamExt;

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
    VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
        $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
    )
    ON CONFLICT (mailing_id, recipient_table, recipient_id) DO UPDATE SET
        pings_count = EXCLUDED.pings_count,
        pings_first_offset = EXCLUDED.pings_first_offset,
        pings_last_offset = EXCLUDED.pings_last_offset,
        html_links_count = EXCLUDED.html_links_count,
        html_links_first_offset = EXCLUDED.html_links_first_offset,
        html_links_last_offset = EXCLUDED.html_links_last_offset,
        plain_links_count = EXCLUDED.plain_links_count,
        plain_links_first_offset = EXCLUDED.plain_links_first_offset,
        plain_links_last_offset = EXCLUDED.plain_links_last_offset,
        total_links_count = EXCLUDED.total_links_count,
        total_links_first_offset = EXCLUDED.total_links_first_offset,
        total_links_last_offset = EXCLUDED.total_links_last_offset,
        response_count = EXCLUDED.response_count,
        response_first_offset = EXCLUDED.response_first_offset,
        response_last_offset = EXCLUDED.response_last_offset,
        first_link_id = EXCLUDED.first_link_id,
        first_link_latency = EXCLUDED.first_link_latency,
        second_link_id = EXCLUDED.second_link_id,
        second_link_latency = EXCLUDED.second_link_latency,
        third_link_id = EXCLUDED.third_link_id,
        third_link_latency = EXCLUDED.third_link_latency,
        bounced = EXCLUDED.bounced,
        delivered_formats = EXCLUDED.delivered_formats,
        payload_size = EXCLUDED.payload_size,
        sent_at = EXCLUDED.sent_at
"#;

fn bind_summary<'q>(
    query: Query<'q, Postgres, PgArguments>,
    s: &'q RecipientSummary,
) -> Query<'q, Postgres, PgArguments> {
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
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mail_events (
                id BIGSERIAL PRIMARY KEY,
                mid BIGINT NOT NULL,
                rid BIGINT NOT NULL,
                rtbl TEXT NOT NULL,
                tstamp BIGINT NOT NULL,
                response_type BIGINT NOT NULL,
                url_id BIGINT,
                html_sent BIGINT NOT NULL DEFAULT 0,
                size BIGINT,
                return_code BIGINT
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
                mailing_id BIGINT PRIMARY KEY,
                manifest TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recipient_summaries (
                mailing_id BIGINT NOT NULL,
                recipient_id BIGINT NOT NULL,
                recipient_table TEXT NOT NULL,
                pings_count BIGINT NOT NULL DEFAULT 0,
                pings_first_offset BIGINT NOT NULL DEFAULT 0,
                pings_last_offset BIGINT NOT NULL DEFAULT 0,
                html_links_count BIGINT NOT NULL DEFAULT 0,
                html_links_first_offset BIGINT NOT NULL DEFAULT 0,
                html_links_last_offset BIGINT NOT NULL DEFAULT 0,
                plain_links_count BIGINT NOT NULL DEFAULT 0,
                plain_links_first_offset BIGINT NOT NULL DEFAULT 0,
                plain_links_last_offset BIGINT NOT NULL DEFAULT 0,
                total_links_count BIGINT NOT NULL DEFAULT 0,
                total_links_first_offset BIGINT NOT NULL DEFAULT 0,
                total_links_last_offset BIGINT NOT NULL DEFAULT 0,
                response_count BIGINT NOT NULL DEFAULT 0,
                response_first_offset BIGINT NOT NULL DEFAULT 0,
                response_last_offset BIGINT NOT NULL DEFAULT 0,
                first_link_id BIGINT,
                first_link_latency BIGINT NOT NULL DEFAULT 0,
                second_link_id BIGINT,
                second_link_latency BIGINT NOT NULL DEFAULT 0,
                third_link_id BIGINT,
                third_link_latency BIGINT NOT NULL DEFAULT 0,
                bounced BOOLEAN NOT NULL DEFAULT FALSE,
                delivered_formats BIGINT NOT NULL DEFAULT 0,
                payload_size BIGINT NOT NULL DEFAULT 0,
                sent_at BIGINT NOT NULL DEFAULT 0,
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
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
            WHERE mid = $1
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
            VALUES ($1, $2, $3)
            ON CONFLICT (mailing_id) DO NOTHING
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
            "SELECT manifest FROM link_manifests WHERE mailing_id = $1",
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
        let result = sqlx::query("DELETE FROM recipient_summaries WHERE mailing_id = $1")
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

        sqlx::query("DELETE FROM recipient_summaries WHERE mailing_id = $1")
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
            WHERE mailing_id = $1
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
            "SELECT COUNT(*) FROM recipient_summaries WHERE mailing_id = $1",
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
            WHERE mid = $1
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
            WHERE mid = $1 AND response_type = 0
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
            WHERE mid = $1 AND response_type = -127
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
            WHERE mid = $1 AND response_type = $2
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
        // SUM over BIGINT yields NUMERIC in Postgres
        let unique = sqlx::query_as::<_, UniqueResponders>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE pings_count > 0) AS pings,
                COUNT(*) FILTER (WHERE html_links_count > 0) AS html_clicks,
                COUNT(*) FILTER (WHERE plain_links_count > 0) AS plain_clicks
            FROM recipient_summaries
            WHERE mailing_id = $1
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
            WHERE mid = $1 AND response_type = -127{}
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
