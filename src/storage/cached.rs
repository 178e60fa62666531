use crate::analytics::{BounceCategory, CounterRow, UniqueResponders};
use crate::models::{CampaignLinkManifest, RawEvent, RecipientKey, RecipientSummary, ResponseType};
use crate::storage::{EventStream, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Storage wrapper that keeps recently read link manifests in memory.
///
/// Manifests never change once stored, so a cached entry stays valid until
/// it expires. Missing manifests are not cached.
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Manifest cache keyed by mailing id
    manifests: Cache<i64, CampaignLinkManifest>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let manifests = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { inner, manifests }
    }

    /// Whether a campaign's manifest is currently held in memory
    pub async fn is_cached(&self, mailing_id: i64) -> bool {
        self.manifests.get(&mailing_id).await.is_some()
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn append_events(&self, mailing_id: i64, events: &[RawEvent]) -> Result<u64> {
        self.inner.append_events(mailing_id, events).await
    }

    fn event_stream(&self, mailing_id: i64) -> EventStream<'_> {
        self.inner.event_stream(mailing_id)
    }

    async fn put_manifest(
        &self,
        mailing_id: i64,
        manifest: &CampaignLinkManifest,
    ) -> StorageResult<()> {
        self.inner.put_manifest(mailing_id, manifest).await?;

        self.manifests.insert(mailing_id, manifest.clone()).await;

        Ok(())
    }

    async fn get_manifest(&self, mailing_id: i64) -> Result<Option<CampaignLinkManifest>> {
        if let Some(cached) = self.manifests.get(&mailing_id).await {
            tracing::debug!(mailing_id, "manifest cache hit");
            return Ok(Some(cached));
        }

        let manifest = self.inner.get_manifest(mailing_id).await?;

        if let Some(ref manifest) = manifest {
            self.manifests.insert(mailing_id, manifest.clone()).await;
        }

        Ok(manifest)
    }

    async fn clear_summaries(&self, mailing_id: i64) -> Result<u64> {
        self.inner.clear_summaries(mailing_id).await
    }

    async fn insert_summary(&self, summary: &RecipientSummary) -> Result<()> {
        self.inner.insert_summary(summary).await
    }

    async fn replace_summaries(
        &self,
        mailing_id: i64,
        summaries: &[RecipientSummary],
    ) -> Result<u64> {
        self.inner.replace_summaries(mailing_id, summaries).await
    }

    async fn list_summaries(&self, mailing_id: i64) -> Result<Vec<RecipientSummary>> {
        self.inner.list_summaries(mailing_id).await
    }

    async fn count_summaries(&self, mailing_id: i64) -> Result<i64> {
        self.inner.count_summaries(mailing_id).await
    }

    async fn response_type_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>> {
        self.inner.response_type_counts(mailing_id).await
    }

    async fn sent_format_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>> {
        self.inner.sent_format_counts(mailing_id).await
    }

    async fn bounce_code_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>> {
        self.inner.bounce_code_counts(mailing_id).await
    }

    async fn url_click_counts(
        &self,
        mailing_id: i64,
        response_type: ResponseType,
    ) -> Result<Vec<CounterRow>> {
        self.inner.url_click_counts(mailing_id, response_type).await
    }

    async fn unique_responders(&self, mailing_id: i64) -> Result<UniqueResponders> {
        self.inner.unique_responders(mailing_id).await
    }

    async fn bounced_recipients(
        &self,
        mailing_id: i64,
        category: Option<BounceCategory>,
    ) -> Result<Vec<RecipientKey>> {
        self.inner.bounced_recipients(mailing_id, category).await
    }
}
