//! Data models for response aggregation

use serde::{Deserialize, Serialize};

use crate::models::{DeliveredFormats, RawEvent, ResponseType};

/// Number of link clicks attributed to fixed summary fields
pub const LINK_SLOTS: usize = 3;

/// One attributed link click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSlot {
    /// Logged url id of the click
    pub url_id: i64,

    /// Seconds since the most recent open before the click, or 0 without one
    pub latency: i64,

    /// Number of opens recorded when the slot was filled
    pub opens_seen: usize,
}

/// Per-recipient working state for one aggregation pass.
///
/// Lives from the first event of a recipient group until the group is
/// finalized; only one is alive at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientAccumulator {
    /// Open (ping) timestamps
    pub pings: Vec<i64>,

    /// HTML link click timestamps
    pub html_links: Vec<i64>,

    /// Plain-text link click timestamps
    pub plain_links: Vec<i64>,

    /// Link clicks of either format
    pub links: Vec<i64>,

    /// Opens and clicks combined
    pub responses: Vec<i64>,

    /// First, second and third attributed clicks
    pub slots: [Option<LinkSlot>; LINK_SLOTS],

    /// Timestamp of the `Sent` row, if one was seen
    pub sent_at: Option<i64>,

    pub delivered: DeliveredFormats,

    pub payload_size: i64,

    pub bounced: bool,
}

impl RecipientAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event of this recipient into the accumulator.
    ///
    /// Returns false for events that were ignored.
    pub fn apply(&mut self, event: &RawEvent) -> bool {
        match event.response_type {
            ResponseType::Sent => {
                self.delivered = DeliveredFormats::from_flags(event.format_flags);
                self.payload_size = event.payload_size.unwrap_or(0);
                self.sent_at = Some(event.timestamp);
            }
            ResponseType::Ping => {
                self.pings.push(event.timestamp);
                self.responses.push(event.timestamp);
            }
            ResponseType::HtmlLinkClick | ResponseType::PlainLinkClick => {
                if event.response_type == ResponseType::HtmlLinkClick {
                    self.html_links.push(event.timestamp);
                } else {
                    self.plain_links.push(event.timestamp);
                }
                self.links.push(event.timestamp);
                if let Some(url_id) = event.url_id {
                    self.attribute(url_id, event.timestamp);
                }
                self.responses.push(event.timestamp);
            }
            ResponseType::Bounce => {
                self.bounced = true;
            }
            ResponseType::Other(_) => return false,
        }
        true
    }

    /// Assign a click to the next free link slot.
    ///
    /// A url id that already holds a slot only takes another one after a
    /// new open was recorded since that slot was filled.
    fn attribute(&mut self, url_id: i64, timestamp: i64) {
        let Some(free) = self.slots.iter().position(Option::is_none) else {
            return;
        };

        let opens_seen = self.pings.len();
        let repeat_without_open = self
            .slots
            .iter()
            .flatten()
            .any(|slot| slot.url_id == url_id && slot.opens_seen == opens_seen);
        if repeat_without_open {
            return;
        }

        let latency = match self.latest_ping() {
            Some(ping) => (timestamp - ping).max(0),
            None => 0,
        };

        self.slots[free] = Some(LinkSlot {
            url_id,
            latency,
            opens_seen,
        });
    }

    /// Most recent open recorded so far
    pub fn latest_ping(&self) -> Option<i64> {
        self.pings.iter().copied().max()
    }

    /// Number of filled link slots
    pub fn attributed(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(ts: i64, url_id: i64) -> RawEvent {
        RawEvent::new("tt_address", 1, ts, ResponseType::HtmlLinkClick).with_url(url_id)
    }

    fn ping(ts: i64) -> RawEvent {
        RawEvent::new("tt_address", 1, ts, ResponseType::Ping)
    }

    fn slot_ids(acc: &RecipientAccumulator) -> Vec<Option<i64>> {
        acc.slots.iter().map(|s| s.map(|s| s.url_id)).collect()
    }

    #[test]
    fn test_repeated_click_without_open_does_not_take_slot() {
        let mut acc = RecipientAccumulator::new();
        for (ts, url) in [(10, 7), (20, 3), (30, 7), (40, 9)] {
            acc.apply(&click(ts, url));
        }

        assert_eq!(slot_ids(&acc), vec![Some(7), Some(3), Some(9)]);
        assert_eq!(acc.links.len(), 4);
        assert_eq!(acc.html_links.len(), 4);
    }

    #[test]
    fn test_repeated_click_after_new_open_takes_slot() {
        let mut acc = RecipientAccumulator::new();
        acc.apply(&ping(1010));
        acc.apply(&click(1020, 5));
        acc.apply(&ping(1030));
        acc.apply(&click(1040, 5));

        assert_eq!(slot_ids(&acc), vec![Some(5), Some(5), None]);
        assert_eq!(acc.slots[0].unwrap().latency, 10);
        assert_eq!(acc.slots[1].unwrap().latency, 10);
    }

    #[test]
    fn test_latency_is_zero_without_prior_open() {
        let mut acc = RecipientAccumulator::new();
        acc.apply(&click(500, 1));
        acc.apply(&ping(600));
        acc.apply(&click(650, 2));

        assert_eq!(acc.slots[0].unwrap().latency, 0);
        assert_eq!(acc.slots[1].unwrap().latency, 50);
    }

    #[test]
    fn test_slots_stop_after_three() {
        let mut acc = RecipientAccumulator::new();
        for (i, url) in [1, 2, 3, 4, 5].into_iter().enumerate() {
            acc.apply(&click(i as i64, url));
        }

        assert_eq!(acc.attributed(), LINK_SLOTS);
        assert_eq!(slot_ids(&acc), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(acc.links.len(), 5);
    }

    #[test]
    fn test_click_without_url_is_counted_but_not_attributed() {
        let mut acc = RecipientAccumulator::new();
        acc.apply(&RawEvent::new("fe_users", 3, 10, ResponseType::PlainLinkClick));

        assert_eq!(acc.plain_links, vec![10]);
        assert_eq!(acc.responses, vec![10]);
        assert_eq!(acc.attributed(), 0);
    }

    #[test]
    fn test_unknown_response_type_is_ignored() {
        let mut acc = RecipientAccumulator::new();
        let applied = acc.apply(&RawEvent::new("tt_address", 1, 10, ResponseType::Other(99)));

        assert!(!applied);
        assert_eq!(acc, RecipientAccumulator::new());
    }

    #[test]
    fn test_sent_and_bounce_update_flags() {
        let mut acc = RecipientAccumulator::new();
        acc.apply(
            &RawEvent::new("tt_address", 1, 1000, ResponseType::Sent)
                .with_formats(3)
                .with_size(2048),
        );
        acc.apply(&RawEvent::new("tt_address", 1, 1100, ResponseType::Bounce).with_return_code(550));

        assert_eq!(acc.sent_at, Some(1000));
        assert!(acc.delivered.html && acc.delivered.plain);
        assert_eq!(acc.payload_size, 2048);
        assert!(acc.bounced);
        assert!(acc.responses.is_empty());
    }
}
