use serde::{Deserialize, Serialize};

use crate::models::event::SendOptions;

/// A tracked link of the HTML body, captured at send time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlLink {
    pub index: i64,
    /// Absolute destination; may still carry HTML entities such as `&amp;`
    pub destination_url: String,
    /// The href as it appeared in the rendered body
    #[serde(default)]
    pub raw_href: String,
    /// Display label (the anchor's title), if one was captured
    #[serde(default)]
    pub label: Option<String>,
}

/// A tracked link of the plain-text body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainLink {
    pub index: i64,
    pub destination_url: String,
}

/// Links embedded in a campaign's bodies. Immutable once the campaign is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignLinkManifest {
    #[serde(default)]
    pub send_options: SendOptions,
    #[serde(default)]
    pub html_links: Vec<HtmlLink>,
    #[serde(default)]
    pub plain_links: Vec<PlainLink>,
}

impl CampaignLinkManifest {
    pub fn html_link(&self, index: i64) -> Option<&HtmlLink> {
        self.html_links.iter().find(|link| link.index == index)
    }

    pub fn plain_link(&self, index: i64) -> Option<&PlainLink> {
        self.plain_links.iter().find(|link| link.index == index)
    }

    /// Resolve a logged `url_id` to its raw destination URL.
    ///
    /// Positive ids address html links, negative ids address plain links
    /// by their negated index.
    pub fn destination(&self, url_id: i64) -> Option<&str> {
        if url_id < 0 {
            // i64::MIN has no plain link counterpart
            url_id
                .checked_neg()
                .and_then(|index| self.plain_link(index))
                .map(|link| link.destination_url.as_str())
        } else {
            self.html_link(url_id)
                .map(|link| link.destination_url.as_str())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.html_links.is_empty() && self.plain_links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> CampaignLinkManifest {
        CampaignLinkManifest {
            send_options: SendOptions(3),
            html_links: vec![HtmlLink {
                index: 2,
                destination_url: "https://a.test/x".to_string(),
                raw_href: "https://a.test/x".to_string(),
                label: None,
            }],
            plain_links: vec![PlainLink {
                index: 5,
                destination_url: "https://b.test/".to_string(),
            }],
        }
    }

    #[test]
    fn test_destination_resolves_by_sign() {
        let manifest = manifest();
        assert_eq!(manifest.destination(2), Some("https://a.test/x"));
        assert_eq!(manifest.destination(-5), Some("https://b.test/"));
        assert_eq!(manifest.destination(5), None);
        assert_eq!(manifest.destination(-2), None);
        assert_eq!(manifest.destination(i64::MIN), None);
    }

    #[test]
    fn test_manifest_parses_minimal_json() {
        let json = r#"{"plain_links":[{"index":1,"destination_url":"https://c.test"}]}"#;
        let manifest: CampaignLinkManifest = serde_json::from_str(json).unwrap();
        assert!(manifest.html_links.is_empty());
        assert_eq!(manifest.plain_links.len(), 1);
        assert!(!manifest.is_empty());
    }
}
