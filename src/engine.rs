//! Recompute and report orchestration on top of a [`Storage`] backend

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::analytics::{
    build_report, finalize, CampaignCounters, CampaignReport, Counters, RecipientAggregator,
    ReportHook, ReportInputs, UrlClickCount,
};
use crate::models::{RecipientSummary, ResponseType};
use crate::storage::Storage;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("mailing {0} is already being recomputed")]
    RecomputeInProgress(i64),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Campaigns currently being recomputed; the entry is released on drop
struct RecomputeGuard<'a> {
    in_flight: &'a DashMap<i64, ()>,
    mailing_id: i64,
}

impl<'a> RecomputeGuard<'a> {
    fn acquire(in_flight: &'a DashMap<i64, ()>, mailing_id: i64) -> EngineResult<Self> {
        match in_flight.entry(mailing_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(EngineError::RecomputeInProgress(mailing_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self {
                    in_flight,
                    mailing_id,
                })
            }
        }
    }
}

impl Drop for RecomputeGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.mailing_id);
    }
}

pub struct Engine {
    storage: Arc<dyn Storage>,
    in_flight: DashMap<i64, ()>,
    hooks: Vec<Arc<dyn ReportHook>>,
}

impl Engine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            in_flight: DashMap::new(),
            hooks: Vec::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Add a callback that runs after the statistics of every report
    pub fn register_hook(&mut self, hook: Arc<dyn ReportHook>) {
        debug!(hook = hook.name(), "registered report hook");
        self.hooks.push(hook);
    }

    /// Whether a recompute of this campaign is running right now
    pub fn is_recomputing(&self, mailing_id: i64) -> bool {
        self.in_flight.contains_key(&mailing_id)
    }

    /// Rebuild every recipient summary of a campaign from its mail log.
    ///
    /// Returns the number of summary rows written. The previous summaries are
    /// replaced atomically, so running this twice yields identical rows.
    pub async fn recompute(&self, mailing_id: i64) -> EngineResult<u64> {
        let _guard = RecomputeGuard::acquire(&self.in_flight, mailing_id)?;

        info!(mailing_id, "recomputing recipient summaries");

        let mut summaries: Vec<RecipientSummary> = Vec::new();
        let mut aggregator = RecipientAggregator::new();
        {
            // the stream holds a pooled connection until dropped
            let mut events = self.storage.event_stream(mailing_id);
            while let Some(event) = events.next().await {
                if let Some((key, acc)) = aggregator.push(event?) {
                    summaries.push(finalize(mailing_id, key, acc));
                }
            }
        }
        if let Some((key, acc)) = aggregator.finish() {
            summaries.push(finalize(mailing_id, key, acc));
        }

        let written = self
            .storage
            .replace_summaries(mailing_id, &summaries)
            .await?;

        info!(
            mailing_id,
            events = aggregator.events(),
            recipients = written,
            "recipient summaries stored"
        );

        Ok(written)
    }

    /// Read back the grouped counters of a campaign
    pub async fn counters(&self, mailing_id: i64) -> EngineResult<CampaignCounters> {
        let by_response_type: Counters = self
            .storage
            .response_type_counts(mailing_id)
            .await?
            .into_iter()
            .collect();
        let sent_by_format: Counters = self
            .storage
            .sent_format_counts(mailing_id)
            .await?
            .into_iter()
            .collect();
        let bounces_by_code: Counters = self
            .storage
            .bounce_code_counts(mailing_id)
            .await?
            .into_iter()
            .collect();
        let unique = self.storage.unique_responders(mailing_id).await?;

        Ok(CampaignCounters {
            by_response_type,
            sent_by_format,
            bounces_by_code,
            unique,
        })
    }

    /// Build the campaign report.
    ///
    /// Summaries are recomputed first when `recompute` is set or when none
    /// are stored yet, since unique responder counts are read from them.
    pub async fn report(&self, mailing_id: i64, recompute: bool) -> EngineResult<CampaignReport> {
        if recompute || self.storage.count_summaries(mailing_id).await? == 0 {
            self.recompute(mailing_id).await?;
        }

        let counters = self.counters(mailing_id).await?;

        let manifest = match self.storage.get_manifest(mailing_id).await? {
            Some(manifest) => manifest,
            None => {
                debug!(mailing_id, "no link manifest stored, links reported by id");
                Default::default()
            }
        };

        let html_clicks = UrlClickCount::from_rows(
            self.storage
                .url_click_counts(mailing_id, ResponseType::HtmlLinkClick)
                .await?,
        );
        let plain_clicks = UrlClickCount::from_rows(
            self.storage
                .url_click_counts(mailing_id, ResponseType::PlainLinkClick)
                .await?,
        );

        let inputs = ReportInputs {
            counters,
            manifest,
            html_clicks,
            plain_clicks,
        };

        Ok(build_report(mailing_id, &inputs, &self.hooks))
    }
}
