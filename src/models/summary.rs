use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::event::RecipientKey;

/// Persisted per-recipient response summary for one campaign.
///
/// Every `*_offset` is seconds after `sent_at`, every `*_latency` seconds
/// after the most recent preceding open; all are clamped at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RecipientSummary {
    pub mailing_id: i64,
    pub recipient_id: i64,
    pub recipient_table: String,

    pub pings_count: i64,
    pub pings_first_offset: i64,
    pub pings_last_offset: i64,

    pub html_links_count: i64,
    pub html_links_first_offset: i64,
    pub html_links_last_offset: i64,

    pub plain_links_count: i64,
    pub plain_links_first_offset: i64,
    pub plain_links_last_offset: i64,

    pub total_links_count: i64,
    pub total_links_first_offset: i64,
    pub total_links_last_offset: i64,

    pub response_count: i64,
    pub response_first_offset: i64,
    pub response_last_offset: i64,

    pub first_link_id: Option<i64>,
    pub first_link_latency: i64,
    pub second_link_id: Option<i64>,
    pub second_link_latency: i64,
    pub third_link_id: Option<i64>,
    pub third_link_latency: i64,

    pub bounced: bool,
    pub delivered_formats: i64,
    pub payload_size: i64,
    pub sent_at: i64,
}

impl RecipientSummary {
    pub fn key(&self) -> RecipientKey {
        RecipientKey::new(self.recipient_table.clone(), self.recipient_id)
    }
}
