//! Streaming per-recipient aggregation of a campaign's mail log
//!
//! The log arrives sorted by (recipient table, recipient id, timestamp).
//! Each contiguous run of rows sharing a recipient key is folded into one
//! [`RecipientAccumulator`]; a key change closes the previous group.
//!
//! Only the current group is held in memory, so a pass is O(n) in events
//! and O(1) in additional state regardless of campaign size.

use tracing::{debug, warn};

use crate::analytics::models::RecipientAccumulator;
use crate::models::{RawEvent, RecipientKey};

/// A closed recipient group, ready for finalization
pub type RecipientGroup = (RecipientKey, RecipientAccumulator);

/// Push-style group folder.
///
/// Feed events in log order with [`push`](Self::push); every key change
/// hands back the completed previous group. Call [`finish`](Self::finish)
/// once the input is exhausted to flush the last group.
#[derive(Debug, Default)]
pub struct RecipientAggregator {
    /// Group being built
    current: Option<RecipientGroup>,
    /// Events seen in this pass
    events: u64,
    /// Events ignored because of an unknown response type
    ignored: u64,
}

impl RecipientAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event, returning the previous group if this event opened a new one
    pub fn push(&mut self, event: RawEvent) -> Option<RecipientGroup> {
        self.events += 1;

        let closed = match &self.current {
            Some((key, _)) if event.belongs_to(key) => None,
            _ => {
                let fresh = (event.key(), RecipientAccumulator::new());
                self.current.replace(fresh)
            }
        };

        if let Some((_, acc)) = self.current.as_mut() {
            if !acc.apply(&event) {
                self.ignored += 1;
                debug!(
                    response_type = event.response_type.code(),
                    recipient_id = event.recipient_id,
                    "ignoring event with unknown response type"
                );
            }
        }

        if let Some((key, _)) = &closed {
            debug!(recipient = %key, "recipient group closed");
        }
        closed
    }

    /// Flush the group still open at end of input
    pub fn finish(&mut self) -> Option<RecipientGroup> {
        if self.ignored > 0 {
            warn!(
                ignored = self.ignored,
                events = self.events,
                "skipped events with unknown response types"
            );
        }
        self.current.take()
    }

    /// Events pushed so far
    pub fn events(&self) -> u64 {
        self.events
    }
}

/// Lazy iterator of recipient groups over an ordered event iterator
pub struct RecipientGroups<I> {
    events: I,
    aggregator: RecipientAggregator,
    done: bool,
}

impl<I> RecipientGroups<I>
where
    I: Iterator<Item = RawEvent>,
{
    pub fn new(events: I) -> Self {
        Self {
            events,
            aggregator: RecipientAggregator::new(),
            done: false,
        }
    }
}

impl<I> Iterator for RecipientGroups<I>
where
    I: Iterator<Item = RawEvent>,
{
    type Item = RecipientGroup;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for event in self.events.by_ref() {
            if let Some(group) = self.aggregator.push(event) {
                return Some(group);
            }
        }
        self.done = true;
        self.aggregator.finish()
    }
}

/// Group an ordered event sequence by recipient
pub fn group_by_recipient<I>(events: I) -> RecipientGroups<I::IntoIter>
where
    I: IntoIterator<Item = RawEvent>,
{
    RecipientGroups::new(events.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseType;

    fn event(table: &str, id: i64, ts: i64, response_type: ResponseType) -> RawEvent {
        RawEvent::new(table, id, ts, response_type)
    }

    #[test]
    fn test_groups_contiguous_keys() {
        let events = vec![
            event("fe_users", 1, 100, ResponseType::Sent),
            event("fe_users", 1, 110, ResponseType::Ping),
            event("tt_address", 1, 100, ResponseType::Sent),
            event("tt_address", 2, 100, ResponseType::Sent),
            event("tt_address", 2, 120, ResponseType::Ping),
            event("tt_address", 2, 130, ResponseType::Ping),
        ];

        let groups: Vec<_> = group_by_recipient(events).collect();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].0, RecipientKey::new("fe_users", 1));
        assert_eq!(groups[0].1.pings, vec![110]);
        assert_eq!(groups[1].0, RecipientKey::new("tt_address", 1));
        assert!(groups[1].1.pings.is_empty());
        assert_eq!(groups[2].0, RecipientKey::new("tt_address", 2));
        assert_eq!(groups[2].1.pings, vec![120, 130]);
    }

    #[test]
    fn test_same_id_in_different_tables_are_separate_groups() {
        let events = vec![
            event("fe_users", 7, 100, ResponseType::Ping),
            event("tt_address", 7, 100, ResponseType::Ping),
        ];

        let groups: Vec<_> = group_by_recipient(events).collect();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let mut groups = group_by_recipient(Vec::new());
        assert!(groups.next().is_none());
        assert!(groups.next().is_none());
    }

    #[test]
    fn test_final_group_is_flushed() {
        let mut aggregator = RecipientAggregator::new();
        assert!(aggregator
            .push(event("tt_address", 1, 100, ResponseType::Sent))
            .is_none());
        assert!(aggregator
            .push(event("tt_address", 1, 101, ResponseType::Bounce))
            .is_none());

        let (key, acc) = aggregator.finish().unwrap();
        assert_eq!(key, RecipientKey::new("tt_address", 1));
        assert!(acc.bounced);
        assert!(aggregator.finish().is_none());
        assert_eq!(aggregator.events(), 2);
    }

    #[test]
    fn test_unknown_events_still_open_a_group() {
        let events = vec![event("tt_address", 4, 100, ResponseType::Other(5))];
        let groups: Vec<_> = group_by_recipient(events).collect();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1, RecipientAccumulator::new());
    }
}
