//! Cross-format link correlation
//!
//! HTML and plain-text bodies of a campaign carry their own link tables,
//! each with its own indices. Clicks are reported per destination: links
//! whose entity-decoded URLs hash equal form one row, whatever their format
//! or index.

use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::analytics::storage::UrlClickCount;
use crate::models::CampaignLinkManifest;

/// One destination in the link report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkReportRow {
    /// Display label: captured title, else the destination, else `#<id>`
    pub label: String,

    /// Decoded destination URL, if the link could be resolved
    pub destination_url: Option<String>,

    /// First html link index pointing at this destination
    pub html_link_id: Option<i64>,

    /// First plain link index (negated, as logged) pointing at this destination
    pub plain_link_id: Option<i64>,

    pub html_clicks: u64,
    pub plain_clicks: u64,
    pub total_clicks: u64,
}

/// Click report of a campaign, ordered by descending total clicks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub rows: Vec<LinkReportRow>,
}

impl LinkReport {
    pub fn total_clicks(&self) -> u64 {
        self.rows.iter().map(|row| row.total_clicks).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row reached through the given logged url id, html or plain
    pub fn row_for(&self, url_id: i64) -> Option<&LinkReportRow> {
        self.rows.iter().find(|row| {
            row.html_link_id == Some(url_id) || row.plain_link_id == Some(url_id)
        })
    }
}

/// Decode the HTML entities that appear in captured hrefs.
///
/// Handles the named XML entities plus decimal and hex character
/// references; anything else is left untouched.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            ch.map(|ch| (ch, semi))
        });

        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Equivalence key of a destination URL
pub fn url_hash(decoded_url: &str) -> String {
    hex::encode(Sha256::digest(decoded_url.as_bytes()))
}

/// Row under construction, keyed by destination hash
#[derive(Debug)]
struct Draft {
    row: LinkReportRow,
    labelled: bool,
}

impl Draft {
    fn new(destination_url: Option<String>, label: Option<String>) -> Self {
        let labelled = label.is_some();
        let label = label
            .or_else(|| destination_url.clone())
            .unwrap_or_default();
        Self {
            row: LinkReportRow {
                label,
                destination_url,
                html_link_id: None,
                plain_link_id: None,
                html_clicks: 0,
                plain_clicks: 0,
                total_clicks: 0,
            },
            labelled,
        }
    }
}

/// Merge html and plain click counters into one report per destination
pub fn correlate(
    manifest: &CampaignLinkManifest,
    html_clicks: &[UrlClickCount],
    plain_clicks: &[UrlClickCount],
) -> LinkReport {
    let mut drafts: Vec<Draft> = Vec::new();
    let mut by_hash: HashMap<String, usize> = HashMap::new();

    // captured titles only exist when an HTML body was sent
    let html_labels = manifest.send_options.html();

    // seed in manifest order so equal totals keep that order after sorting
    for link in &manifest.html_links {
        let url = decode_entities(&link.destination_url);
        let idx = *by_hash.entry(url_hash(&url)).or_insert_with(|| {
            drafts.push(Draft::new(Some(url.clone()), None));
            drafts.len() - 1
        });
        let draft = &mut drafts[idx];
        if draft.row.html_link_id.is_none() {
            draft.row.html_link_id = Some(link.index);
        }
        if let (true, false, Some(label)) = (html_labels, draft.labelled, link.label.as_ref()) {
            draft.row.label = label.clone();
            draft.labelled = true;
        }
    }
    for link in &manifest.plain_links {
        let url = decode_entities(&link.destination_url);
        let idx = *by_hash.entry(url_hash(&url)).or_insert_with(|| {
            drafts.push(Draft::new(Some(url.clone()), None));
            drafts.len() - 1
        });
        let draft = &mut drafts[idx];
        if draft.row.plain_link_id.is_none() {
            draft.row.plain_link_id = link.index.checked_neg();
        }
    }

    let mut unresolved: HashMap<i64, usize> = HashMap::new();
    let mut locate = |url_id: i64, drafts: &mut Vec<Draft>| -> usize {
        if let Some(url) = manifest.destination(url_id) {
            let hash = url_hash(&decode_entities(url));
            if let Some(idx) = by_hash.get(&hash) {
                return *idx;
            }
        }
        *unresolved.entry(url_id).or_insert_with(|| {
            warn!(url_id, "clicked link id missing from the campaign manifest");
            let mut draft = Draft::new(None, Some(format!("#{url_id}")));
            if url_id < 0 {
                draft.row.plain_link_id = Some(url_id);
            } else {
                draft.row.html_link_id = Some(url_id);
            }
            drafts.push(draft);
            drafts.len() - 1
        })
    };

    for counter in html_clicks {
        let idx = locate(counter.url_id, &mut drafts);
        drafts[idx].row.html_clicks += counter.clicks;
    }
    for counter in plain_clicks {
        let idx = locate(counter.url_id, &mut drafts);
        drafts[idx].row.plain_clicks += counter.clicks;
    }

    let mut rows: Vec<LinkReportRow> = drafts
        .into_iter()
        .filter_map(|mut draft| {
            draft.row.total_clicks = draft.row.html_clicks + draft.row.plain_clicks;
            (draft.row.total_clicks > 0 || draft.labelled).then_some(draft.row)
        })
        .collect();

    // stable: ties keep manifest order
    rows.sort_by(|a, b| b.total_clicks.cmp(&a.total_clicks));
    LinkReport { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HtmlLink, PlainLink, SendOptions};

    fn html(index: i64, url: &str, label: Option<&str>) -> HtmlLink {
        HtmlLink {
            index,
            destination_url: url.to_string(),
            raw_href: format!("https://mail.test/?jumpurl={index}"),
            label: label.map(str::to_string),
        }
    }

    fn plain(index: i64, url: &str) -> PlainLink {
        PlainLink {
            index,
            destination_url: url.to_string(),
        }
    }

    fn count(url_id: i64, clicks: u64) -> UrlClickCount {
        UrlClickCount { url_id, clicks }
    }

    fn manifest(html_links: Vec<HtmlLink>, plain_links: Vec<PlainLink>) -> CampaignLinkManifest {
        CampaignLinkManifest {
            send_options: SendOptions(3),
            html_links,
            plain_links,
        }
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("https://a.test/?a=1&amp;b=2"), "https://a.test/?a=1&b=2");
        assert_eq!(decode_entities("&lt;&#65;&#x42;&gt;"), "<AB>");
        assert_eq!(decode_entities("a & b"), "a & b");
        assert_eq!(decode_entities("x&bogus;y"), "x&bogus;y");
        assert_eq!(decode_entities("trailing&"), "trailing&");
    }

    #[test]
    fn test_html_and_plain_links_to_same_destination_merge() {
        let manifest = manifest(
            vec![html(2, "https://a.test/x", None)],
            vec![plain(5, "https://a.test/x"), plain(6, "https://b.test/y")],
        );

        let report = correlate(&manifest, &[count(2, 4)], &[count(-5, 3), count(-6, 1)]);

        assert_eq!(report.rows.len(), 2);
        let merged = &report.rows[0];
        assert_eq!(merged.html_link_id, Some(2));
        assert_eq!(merged.plain_link_id, Some(-5));
        assert_eq!(merged.html_clicks, 4);
        assert_eq!(merged.plain_clicks, 3);
        assert_eq!(merged.total_clicks, 7);

        let separate = &report.rows[1];
        assert_eq!(separate.html_link_id, None);
        assert_eq!(separate.plain_link_id, Some(-6));
        assert_eq!(separate.total_clicks, 1);
        assert_eq!(report.total_clicks(), 8);
    }

    #[test]
    fn test_entity_encoded_html_url_matches_plain_url() {
        let manifest = manifest(
            vec![html(1, "https://a.test/?p=1&amp;q=2", None)],
            vec![plain(1, "https://a.test/?p=1&q=2")],
        );

        let report = correlate(&manifest, &[count(1, 2)], &[count(-1, 2)]);

        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].total_clicks, 4);
        assert_eq!(
            report.rows[0].destination_url.as_deref(),
            Some("https://a.test/?p=1&q=2")
        );
    }

    #[test]
    fn test_repeated_destination_under_several_indices() {
        let manifest = manifest(
            vec![
                html(1, "https://a.test/", Some("Header link")),
                html(4, "https://a.test/", None),
            ],
            vec![],
        );

        let report = correlate(&manifest, &[count(1, 2), count(4, 5)], &[]);

        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].html_link_id, Some(1));
        assert_eq!(report.rows[0].html_clicks, 7);
        assert_eq!(report.rows[0].label, "Header link");
    }

    #[test]
    fn test_unclicked_links_kept_only_with_label() {
        let manifest = manifest(
            vec![
                html(1, "https://a.test/", Some("Read more")),
                html(2, "https://b.test/", None),
                html(3, "https://c.test/", None),
            ],
            vec![plain(1, "https://d.test/")],
        );

        let report = correlate(&manifest, &[count(3, 1)], &[]);

        let labels: Vec<&str> = report.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["https://c.test/", "Read more"]);
        assert_eq!(report.rows[1].total_clicks, 0);
    }

    #[test]
    fn test_unknown_link_id_gets_raw_label() {
        let manifest = manifest(vec![html(1, "https://a.test/", None)], vec![]);

        let report = correlate(&manifest, &[count(9, 2)], &[count(-3, 1)]);

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].label, "#9");
        assert_eq!(report.rows[0].destination_url, None);
        assert_eq!(report.rows[0].html_link_id, Some(9));
        assert_eq!(report.rows[1].label, "#-3");
        assert_eq!(report.rows[1].plain_link_id, Some(-3));
        assert!(report.row_for(1).is_none());
    }

    #[test]
    fn test_most_negative_link_id_is_unresolved() {
        let manifest = manifest(
            vec![html(1, "https://a.test/", None)],
            vec![plain(1, "https://a.test/")],
        );

        let report = correlate(&manifest, &[], &[count(i64::MIN, 2)]);

        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.label, format!("#{}", i64::MIN));
        assert_eq!(row.destination_url, None);
        assert_eq!(row.plain_link_id, Some(i64::MIN));
        assert_eq!(row.plain_clicks, 2);
    }

    #[test]
    fn test_labels_require_html_body() {
        let links = vec![html(1, "https://a.test/", Some("Read more"))];
        let plain_only = CampaignLinkManifest {
            send_options: SendOptions(1),
            html_links: links.clone(),
            plain_links: vec![],
        };

        let report = correlate(&plain_only, &[count(1, 1)], &[]);
        assert_eq!(report.rows[0].label, "https://a.test/");

        let with_html = manifest(links, vec![]);
        let report = correlate(&with_html, &[count(1, 1)], &[]);
        assert_eq!(report.rows[0].label, "Read more");
    }

    #[test]
    fn test_ties_keep_manifest_order() {
        let manifest = manifest(
            vec![
                html(1, "https://one.test/", None),
                html(2, "https://two.test/", None),
                html(3, "https://three.test/", None),
            ],
            vec![],
        );

        // counters arrive in a different order than the manifest
        let report = correlate(&manifest, &[count(3, 2), count(2, 5), count(1, 2)], &[]);

        let ids: Vec<Option<i64>> = report.rows.iter().map(|r| r.html_link_id).collect();
        assert_eq!(ids, vec![Some(2), Some(1), Some(3)]);
    }

    #[test]
    fn test_url_hash_is_stable_hex() {
        let hash = url_hash("https://a.test/x");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, url_hash("https://a.test/x"));
        assert_ne!(hash, url_hash("https://a.test/y"));
    }
}
