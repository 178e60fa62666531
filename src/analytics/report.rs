//! Campaign report assembly and report hooks

use std::sync::Arc;

use serde::Serialize;

use crate::analytics::links::{self, LinkReport};
use crate::analytics::stats::{self, CampaignStats};
use crate::analytics::storage::{CampaignCounters, UrlClickCount};
use crate::models::CampaignLinkManifest;

/// Post-processing callback run once the statistics of a campaign are known.
///
/// Hooks receive the computed tables and may contribute extra content that
/// the presentation layer shows after the link table.
pub trait ReportHook: Send + Sync {
    fn name(&self) -> &str;

    fn link_responses(&self, stats: &CampaignStats, links: &LinkReport) -> Option<String>;
}

/// Content contributed by one hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Supplement {
    pub hook: String,
    pub content: String,
}

/// Everything the presentation layer needs for one campaign
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignReport {
    pub mailing_id: i64,
    pub stats: CampaignStats,
    pub links: LinkReport,
    pub supplements: Vec<Supplement>,
}

/// Inputs of a report, as read from the store
#[derive(Debug, Clone, Default)]
pub struct ReportInputs {
    pub counters: CampaignCounters,
    pub manifest: CampaignLinkManifest,
    pub html_clicks: Vec<UrlClickCount>,
    pub plain_clicks: Vec<UrlClickCount>,
}

pub fn build_report(
    mailing_id: i64,
    inputs: &ReportInputs,
    hooks: &[Arc<dyn ReportHook>],
) -> CampaignReport {
    let stats = stats::compute(&inputs.counters);
    let links = links::correlate(&inputs.manifest, &inputs.html_clicks, &inputs.plain_clicks);

    // hooks only run when some link was clicked
    let supplements = if links.total_clicks() == 0 {
        Vec::new()
    } else {
        hooks
            .iter()
            .filter_map(|hook| {
                hook.link_responses(&stats, &links).map(|content| Supplement {
                    hook: hook.name().to_string(),
                    content,
                })
            })
            .collect()
    };

    CampaignReport {
        mailing_id,
        stats,
        links,
        supplements,
    }
}
