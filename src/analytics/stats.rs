//! Campaign-level statistics: sent totals, response rates, bounce reasons

use std::fmt;

use serde::{Serialize, Serializer};

use crate::analytics::storage::CampaignCounters;
use crate::models::ResponseType;

/// Delivered-format flag values of the `Sent` rows
const SENT_HTML: i64 = 1;
const SENT_PLAIN: i64 = 2;
const SENT_BOTH: i64 = 3;

/// Group `n` in thousands with commas
fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// A count together with its share of a total.
///
/// Displays as `"25 / 25.00%"`, as a bare count when the total is zero, and
/// as `"0"` when there is nothing to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    pub pieces: u64,
    pub total: u64,
}

impl Share {
    pub const fn new(pieces: u64, total: u64) -> Self {
        Self { pieces, total }
    }

    /// Percentage of the total, or None when the total is zero
    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| self.pieces as f64 / self.total as f64 * 100.0)
    }

    /// Percentage in hundredths of a percent, ties rounded away from zero
    fn percent_hundredths(&self) -> Option<u128> {
        let total = u128::from(self.total);
        (total > 0).then(|| (u128::from(self.pieces) * 20_000 + total) / (2 * total))
    }
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pieces == 0 {
            return f.write_str("0");
        }
        f.write_str(&thousands(self.pieces))?;
        if let Some(hundredths) = self.percent_hundredths() {
            let whole = u64::try_from(hundredths / 100).unwrap_or(u64::MAX);
            write!(f, " / {}.{:02}%", thousands(whole), hundredths % 100)?;
        }
        Ok(())
    }
}

impl Serialize for Share {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Share", 3)?;
        state.serialize_field("count", &self.pieces)?;
        state.serialize_field("percent", &self.percent())?;
        state.serialize_field("display", &self.to_string())?;
        state.end()
    }
}

/// Render `pieces` with its percentage of `total`
pub fn show_with_percent(pieces: u64, total: u64) -> String {
    Share::new(pieces, total).to_string()
}

/// Reason a message bounced, derived from the SMTP-style return code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceCategory {
    UnknownRecipient,
    MailboxFull,
    BadHost,
    BadHeader,
    UnknownReason,
    Uncategorized,
}

impl BounceCategory {
    pub const ALL: [BounceCategory; 6] = [
        BounceCategory::UnknownRecipient,
        BounceCategory::MailboxFull,
        BounceCategory::BadHost,
        BounceCategory::BadHeader,
        BounceCategory::UnknownReason,
        BounceCategory::Uncategorized,
    ];

    pub const fn classify(return_code: i64) -> Self {
        match return_code {
            550 | 553 => BounceCategory::UnknownRecipient,
            551 => BounceCategory::MailboxFull,
            552 => BounceCategory::BadHost,
            554 => BounceCategory::BadHeader,
            -1 => BounceCategory::UnknownReason,
            _ => BounceCategory::Uncategorized,
        }
    }

    /// Return codes mapped to this category; empty for the catch-all
    pub const fn return_codes(self) -> &'static [i64] {
        match self {
            BounceCategory::UnknownRecipient => &[550, 553],
            BounceCategory::MailboxFull => &[551],
            BounceCategory::BadHost => &[552],
            BounceCategory::BadHeader => &[554],
            BounceCategory::UnknownReason => &[-1],
            BounceCategory::Uncategorized => &[],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BounceCategory::UnknownRecipient => "unknown_recipient",
            BounceCategory::MailboxFull => "mailbox_full",
            BounceCategory::BadHost => "bad_host",
            BounceCategory::BadHeader => "bad_header",
            BounceCategory::UnknownReason => "unknown_reason",
            BounceCategory::Uncategorized => "uncategorized",
        }
    }
}

impl fmt::Display for BounceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BounceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BounceCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s.replace('-', "_"))
            .ok_or_else(|| format!("unknown bounce category '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BounceRow {
    pub category: BounceCategory,
    pub share: Share,
}

/// Bounce counts per category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BounceBreakdown {
    pub total: u64,
    pub rows: Vec<BounceRow>,
}

impl BounceBreakdown {
    pub fn count(&self, category: BounceCategory) -> u64 {
        self.rows
            .iter()
            .find(|row| row.category == category)
            .map_or(0, |row| row.share.pieces)
    }
}

/// A total / html / plain row of the response tables
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatSplit<T> {
    pub total: T,
    pub html: T,
    pub plain: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignStats {
    pub total_sent: u64,
    pub html_sent: u64,
    pub plain_sent: u64,
    /// Bounces against all sent mails
    pub returned: Share,
    /// Distinct openers against html mails sent
    pub html_viewed: Share,
    /// Distinct clicking recipients against mails sent
    pub unique_responses: FormatSplit<Share>,
    /// Click rows in the log
    pub total_responses: FormatSplit<u64>,
    /// Clicks per clicking recipient, two decimals, `-` without responders
    pub links_per_respondent: FormatSplit<String>,
    pub bounces: BounceBreakdown,
}

fn per_respondent(clicks: u64, respondents: u64) -> String {
    if respondents == 0 {
        return "-".to_string();
    }
    format!("{:.2}", clicks as f64 / respondents as f64)
}

/// Compute the campaign statistics from grouped counters
pub fn compute(counters: &CampaignCounters) -> CampaignStats {
    let sent = &counters.sent_by_format;
    let total_sent = sent.get(SENT_HTML) + sent.get(SENT_PLAIN) + sent.get(SENT_BOTH);
    let html_sent = sent.get(SENT_HTML) + sent.get(SENT_BOTH);
    let plain_sent = sent.get(SENT_PLAIN);

    let bounce_count = counters.by_response_type.get(ResponseType::Bounce.code());
    let html_clicks = counters.by_response_type.get(ResponseType::HtmlLinkClick.code());
    let plain_clicks = counters.by_response_type.get(ResponseType::PlainLinkClick.code());

    let unique_pings = counters.unique.pings.max(0) as u64;
    let unique_html = counters.unique.html_clicks.max(0) as u64;
    let unique_plain = counters.unique.plain_clicks.max(0) as u64;

    // multipart mails are counted as html; fall back to that base for plain
    let plain_base = if plain_sent > 0 { plain_sent } else { html_sent };

    let mut category_counts = BounceCategory::ALL.map(|_| 0u64);
    for (code, count) in &counters.bounces_by_code.0 {
        let category = BounceCategory::classify(*code);
        if let Some(slot) = BounceCategory::ALL.iter().position(|c| *c == category) {
            category_counts[slot] += count;
        }
    }
    let rows = BounceCategory::ALL
        .into_iter()
        .zip(category_counts)
        .map(|(category, count)| BounceRow {
            category,
            share: Share::new(count, bounce_count),
        })
        .collect();

    CampaignStats {
        total_sent,
        html_sent,
        plain_sent,
        returned: Share::new(bounce_count, total_sent),
        html_viewed: Share::new(unique_pings, html_sent),
        unique_responses: FormatSplit {
            total: Share::new(unique_html + unique_plain, total_sent),
            html: Share::new(unique_html, html_sent),
            plain: Share::new(unique_plain, plain_base),
        },
        total_responses: FormatSplit {
            total: html_clicks + plain_clicks,
            html: html_clicks,
            plain: plain_clicks,
        },
        links_per_respondent: FormatSplit {
            total: per_respondent(html_clicks + plain_clicks, unique_html + unique_plain),
            html: per_respondent(html_clicks, unique_html),
            plain: per_respondent(plain_clicks, unique_plain),
        },
        bounces: BounceBreakdown {
            total: bounce_count,
            rows,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::storage::{Counters, UniqueResponders};

    #[test]
    fn test_show_with_percent() {
        assert_eq!(show_with_percent(0, 100), "0");
        assert_eq!(show_with_percent(25, 100), "25 / 25.00%");
        assert_eq!(show_with_percent(5, 0), "5");
        assert_eq!(show_with_percent(1, 3), "1 / 33.33%");
        assert_eq!(show_with_percent(2, 3), "2 / 66.67%");
    }

    #[test]
    fn test_show_with_percent_rounds_ties_up() {
        assert_eq!(show_with_percent(1, 800), "1 / 0.13%");
        assert_eq!(show_with_percent(3, 800), "3 / 0.38%");
        assert_eq!(show_with_percent(5, 800), "5 / 0.63%");
        assert_eq!(show_with_percent(9, 800), "9 / 1.13%");
        assert_eq!(show_with_percent(1, 1), "1 / 100.00%");
        assert_eq!(show_with_percent(25_000, 10), "25,000 / 250,000.00%");
    }

    #[test]
    fn test_show_with_percent_groups_thousands() {
        assert_eq!(show_with_percent(1234, 0), "1,234");
        assert_eq!(show_with_percent(1500, 3000), "1,500 / 50.00%");
        assert_eq!(show_with_percent(20, 1), "20 / 2,000.00%");
    }

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_bounce_classification() {
        assert_eq!(BounceCategory::classify(550), BounceCategory::UnknownRecipient);
        assert_eq!(BounceCategory::classify(553), BounceCategory::UnknownRecipient);
        assert_eq!(BounceCategory::classify(551), BounceCategory::MailboxFull);
        assert_eq!(BounceCategory::classify(552), BounceCategory::BadHost);
        assert_eq!(BounceCategory::classify(554), BounceCategory::BadHeader);
        assert_eq!(BounceCategory::classify(-1), BounceCategory::UnknownReason);
        assert_eq!(BounceCategory::classify(999), BounceCategory::Uncategorized);
    }

    #[test]
    fn test_bounce_category_parses_cli_names() {
        assert_eq!(
            "mailbox-full".parse::<BounceCategory>(),
            Ok(BounceCategory::MailboxFull)
        );
        assert_eq!(
            "unknown_recipient".parse::<BounceCategory>(),
            Ok(BounceCategory::UnknownRecipient)
        );
        assert!("nope".parse::<BounceCategory>().is_err());
    }

    fn counters() -> CampaignCounters {
        CampaignCounters {
            by_response_type: Counters::from([(0, 100), (1, 30), (2, 6), (-1, 50), (-127, 8)]),
            sent_by_format: Counters::from([(1, 60), (2, 20), (3, 20)]),
            bounces_by_code: Counters::from([(550, 3), (553, 1), (551, 2), (-1, 1), (999, 1)]),
            unique: UniqueResponders {
                pings: 40,
                html_clicks: 15,
                plain_clicks: 4,
            },
        }
    }

    #[test]
    fn test_sent_totals_split_by_format() {
        let stats = compute(&counters());

        assert_eq!(stats.total_sent, 100);
        assert_eq!(stats.html_sent, 80);
        assert_eq!(stats.plain_sent, 20);
        assert_eq!(stats.returned.to_string(), "8 / 8.00%");
        assert_eq!(stats.html_viewed.to_string(), "40 / 50.00%");
    }

    #[test]
    fn test_response_rows() {
        let stats = compute(&counters());

        assert_eq!(stats.unique_responses.total.to_string(), "19 / 19.00%");
        assert_eq!(stats.unique_responses.html.to_string(), "15 / 18.75%");
        assert_eq!(stats.unique_responses.plain.to_string(), "4 / 20.00%");
        assert_eq!(stats.total_responses.total, 36);
        assert_eq!(stats.links_per_respondent.total, "1.89");
        assert_eq!(stats.links_per_respondent.html, "2.00");
        assert_eq!(stats.links_per_respondent.plain, "1.50");
    }

    #[test]
    fn test_bounce_breakdown() {
        let stats = compute(&counters());
        let bounces = &stats.bounces;

        assert_eq!(bounces.total, 8);
        assert_eq!(bounces.count(BounceCategory::UnknownRecipient), 4);
        assert_eq!(bounces.count(BounceCategory::MailboxFull), 2);
        assert_eq!(bounces.count(BounceCategory::BadHost), 0);
        assert_eq!(bounces.count(BounceCategory::UnknownReason), 1);
        assert_eq!(bounces.count(BounceCategory::Uncategorized), 1);
        assert_eq!(bounces.rows[0].share.to_string(), "4 / 50.00%");
        assert_eq!(bounces.rows[2].share.to_string(), "0");
    }

    #[test]
    fn test_empty_campaign_never_divides_by_zero() {
        let stats = compute(&CampaignCounters::default());

        assert_eq!(stats.total_sent, 0);
        assert_eq!(stats.returned.to_string(), "0");
        assert_eq!(stats.unique_responses.plain.to_string(), "0");
        assert_eq!(stats.links_per_respondent.total, "-");
        assert!(stats.bounces.rows.iter().all(|row| row.share.percent().is_none()));
    }

    #[test]
    fn test_plain_rate_falls_back_to_html_base() {
        let mut counters = counters();
        counters.sent_by_format = Counters::from([(3, 50)]);

        let stats = compute(&counters);
        assert_eq!(stats.plain_sent, 0);
        assert_eq!(stats.unique_responses.plain.to_string(), "4 / 8.00%");
    }

    #[test]
    fn test_share_serializes_count_and_display() {
        let json = serde_json::to_value(Share::new(25, 100)).unwrap();
        assert_eq!(json["count"], 25);
        assert_eq!(json["percent"], 25.0);
        assert_eq!(json["display"], "25 / 25.00%");
    }
}
