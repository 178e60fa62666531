//! Counter rows read back from the mail log and summary tables

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One `GROUP BY` bucket as returned by the database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CounterRow {
    /// Grouped column value; NULL when the column was not set on the rows
    pub bucket: Option<i64>,
    pub counter: i64,
}

/// Grouped counts keyed by the grouped column value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counters(pub BTreeMap<i64, u64>);

impl Counters {
    pub fn get(&self, key: i64) -> u64 {
        self.0.get(&key).copied().unwrap_or(0)
    }
}

impl FromIterator<CounterRow> for Counters {
    fn from_iter<T: IntoIterator<Item = CounterRow>>(rows: T) -> Self {
        let mut map = BTreeMap::new();
        for row in rows {
            let Some(key) = row.bucket else { continue };
            *map.entry(key).or_insert(0) += row.counter.max(0) as u64;
        }
        Self(map)
    }
}

impl<const N: usize> From<[(i64, u64); N]> for Counters {
    fn from(pairs: [(i64, u64); N]) -> Self {
        Self(pairs.into_iter().collect())
    }
}

/// Click count of one logged url id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlClickCount {
    pub url_id: i64,
    pub clicks: u64,
}

impl UrlClickCount {
    pub fn from_rows(rows: Vec<CounterRow>) -> Vec<Self> {
        rows.into_iter()
            .filter_map(|row| {
                row.bucket.map(|url_id| Self {
                    url_id,
                    clicks: row.counter.max(0) as u64,
                })
            })
            .collect()
    }
}

/// Distinct recipients with at least one response of each kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UniqueResponders {
    pub pings: i64,
    pub html_clicks: i64,
    pub plain_clicks: i64,
}

/// All grouped counters the campaign statistics are computed from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignCounters {
    /// Log rows by response type code
    pub by_response_type: Counters,
    /// `Sent` rows by delivered-format flag
    pub sent_by_format: Counters,
    /// Bounce rows by return code
    pub bounces_by_code: Counters,
    pub unique: UniqueResponders,
}
