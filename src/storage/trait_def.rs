use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio_stream::Stream;

use crate::analytics::{BounceCategory, CounterRow, UniqueResponders};
use crate::models::{CampaignLinkManifest, RawEvent, RecipientKey, RecipientSummary, ResponseType};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("a link manifest is already stored for mailing {0}")]
    Conflict(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Mail log rows of one campaign, ordered by (recipient table, recipient id, timestamp)
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<RawEvent>> + Send + 'a>>;

/// Bounce return codes that map to a named category
pub(crate) const KNOWN_RETURN_CODES: &str = "550, 551, 552, 553, 554, -1";

/// SQL condition selecting bounce rows of one category; NULL codes count as unknown reason
pub(crate) fn bounce_filter(category: Option<BounceCategory>) -> String {
    match category {
        None => String::new(),
        Some(BounceCategory::Uncategorized) => {
            format!(" AND COALESCE(return_code, -1) NOT IN ({KNOWN_RETURN_CODES})")
        }
        Some(category) => {
            let codes: Vec<String> = category
                .return_codes()
                .iter()
                .map(|code| code.to_string())
                .collect();
            format!(" AND COALESCE(return_code, -1) IN ({})", codes.join(", "))
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Append mail log rows for a campaign
    async fn append_events(&self, mailing_id: i64, events: &[RawEvent]) -> Result<u64>;

    /// Stream a campaign's mail log in aggregation order
    fn event_stream(&self, mailing_id: i64) -> EventStream<'_>;

    /// Store the link manifest captured when the campaign was sent.
    /// Manifests are immutable: a second store for the same campaign conflicts.
    async fn put_manifest(
        &self,
        mailing_id: i64,
        manifest: &CampaignLinkManifest,
    ) -> StorageResult<()>;

    async fn get_manifest(&self, mailing_id: i64) -> Result<Option<CampaignLinkManifest>>;

    /// Remove every summary row of a campaign
    async fn clear_summaries(&self, mailing_id: i64) -> Result<u64>;

    /// Insert or overwrite one summary row, keyed by (mailing, table, recipient)
    async fn insert_summary(&self, summary: &RecipientSummary) -> Result<()>;

    /// Clear and rewrite a campaign's summaries in one transaction
    async fn replace_summaries(
        &self,
        mailing_id: i64,
        summaries: &[RecipientSummary],
    ) -> Result<u64>;

    async fn list_summaries(&self, mailing_id: i64) -> Result<Vec<RecipientSummary>>;

    async fn count_summaries(&self, mailing_id: i64) -> Result<i64>;

    /// Log rows grouped by response type
    async fn response_type_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>>;

    /// `Sent` rows grouped by delivered-format flag
    async fn sent_format_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>>;

    /// Bounce rows grouped by return code
    async fn bounce_code_counts(&self, mailing_id: i64) -> Result<Vec<CounterRow>>;

    /// Click rows of one type grouped by url id
    async fn url_click_counts(
        &self,
        mailing_id: i64,
        response_type: ResponseType,
    ) -> Result<Vec<CounterRow>>;

    /// Distinct responders, counted over the stored summaries
    async fn unique_responders(&self, mailing_id: i64) -> Result<UniqueResponders>;

    /// Recipients with a bounce, optionally limited to one bounce category
    async fn bounced_recipients(
        &self,
        mailing_id: i64,
        category: Option<BounceCategory>,
    ) -> Result<Vec<RecipientKey>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounce_filter() {
        assert_eq!(bounce_filter(None), "");
        assert_eq!(
            bounce_filter(Some(BounceCategory::UnknownRecipient)),
            " AND COALESCE(return_code, -1) IN (550, 553)"
        );
        assert_eq!(
            bounce_filter(Some(BounceCategory::Uncategorized)),
            " AND COALESCE(return_code, -1) NOT IN (550, 551, 552, 553, 554, -1)"
        );
    }
}
