//! Campaign response aggregation
//!
//! Turns a campaign's ordered mail log into per-recipient summaries, and
//! grouped counters into campaign statistics and a per-destination link
//! report.

pub mod aggregator;
pub mod finalizer;
pub mod links;
pub mod models;
pub mod report;
pub mod stats;
pub mod storage;

pub use aggregator::{group_by_recipient, RecipientAggregator, RecipientGroup, RecipientGroups};
pub use finalizer::finalize;
pub use links::{correlate, LinkReport, LinkReportRow};
pub use models::{LinkSlot, RecipientAccumulator};
pub use report::{build_report, CampaignReport, ReportHook, ReportInputs, Supplement};
pub use stats::{show_with_percent, BounceCategory, CampaignStats, Share};
pub use storage::{CampaignCounters, CounterRow, Counters, UniqueResponders, UrlClickCount};
