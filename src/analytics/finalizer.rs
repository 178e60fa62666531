//! Turn a recipient accumulator into its persisted summary row

use tracing::warn;

use crate::analytics::models::RecipientAccumulator;
use crate::models::{RecipientKey, RecipientSummary};

/// Count, first offset and last offset of one timestamp list
fn span(timestamps: &[i64], sent_at: Option<i64>) -> (i64, i64, i64) {
    let count = timestamps.len() as i64;
    let (Some(sent_at), Some(first), Some(last)) = (
        sent_at,
        timestamps.iter().min(),
        timestamps.iter().max(),
    ) else {
        return (count, 0, 0);
    };
    (count, offset(*first, sent_at), offset(*last, sent_at))
}

/// Seconds from `sent_at` to `timestamp`, never negative
fn offset(timestamp: i64, sent_at: i64) -> i64 {
    (timestamp - sent_at).max(0)
}

/// Build the summary row of one recipient group
pub fn finalize(mailing_id: i64, key: RecipientKey, acc: RecipientAccumulator) -> RecipientSummary {
    if acc.sent_at.is_none() && !acc.responses.is_empty() {
        warn!(
            mailing_id,
            recipient = %key,
            "responses without a sent event, offsets reported as zero"
        );
    }

    let sent_at = acc.sent_at;
    let (pings_count, pings_first_offset, pings_last_offset) = span(&acc.pings, sent_at);
    let (html_links_count, html_links_first_offset, html_links_last_offset) =
        span(&acc.html_links, sent_at);
    let (plain_links_count, plain_links_first_offset, plain_links_last_offset) =
        span(&acc.plain_links, sent_at);
    let (total_links_count, total_links_first_offset, total_links_last_offset) =
        span(&acc.links, sent_at);
    let (response_count, response_first_offset, response_last_offset) =
        span(&acc.responses, sent_at);

    let [first, second, third] = acc.slots;

    RecipientSummary {
        mailing_id,
        recipient_id: key.id,
        recipient_table: key.table,
        pings_count,
        pings_first_offset,
        pings_last_offset,
        html_links_count,
        html_links_first_offset,
        html_links_last_offset,
        plain_links_count,
        plain_links_first_offset,
        plain_links_last_offset,
        total_links_count,
        total_links_first_offset,
        total_links_last_offset,
        response_count,
        response_first_offset,
        response_last_offset,
        first_link_id: first.map(|slot| slot.url_id),
        first_link_latency: first.map_or(0, |slot| slot.latency),
        second_link_id: second.map(|slot| slot.url_id),
        second_link_latency: second.map_or(0, |slot| slot.latency),
        third_link_id: third.map(|slot| slot.url_id),
        third_link_latency: third.map_or(0, |slot| slot.latency),
        bounced: acc.bounced,
        delivered_formats: acc.delivered.flags(),
        payload_size: acc.payload_size,
        sent_at: sent_at.unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::aggregator::group_by_recipient;
    use crate::models::{RawEvent, ResponseType};

    fn summarize(mailing_id: i64, events: Vec<RawEvent>) -> Vec<RecipientSummary> {
        group_by_recipient(events)
            .map(|(key, acc)| finalize(mailing_id, key, acc))
            .collect()
    }

    fn assert_non_negative(summary: &RecipientSummary) {
        let values = [
            summary.pings_first_offset,
            summary.pings_last_offset,
            summary.html_links_first_offset,
            summary.html_links_last_offset,
            summary.plain_links_first_offset,
            summary.plain_links_last_offset,
            summary.total_links_first_offset,
            summary.total_links_last_offset,
            summary.response_first_offset,
            summary.response_last_offset,
            summary.first_link_latency,
            summary.second_link_latency,
            summary.third_link_latency,
        ];
        assert!(values.iter().all(|v| *v >= 0), "negative value in {summary:?}");
    }

    #[test]
    fn test_end_to_end_recipient() {
        let events = vec![
            RawEvent::new("tt_address", 10, 1000, ResponseType::Sent).with_formats(1),
            RawEvent::new("tt_address", 10, 1010, ResponseType::Ping),
            RawEvent::new("tt_address", 10, 1020, ResponseType::HtmlLinkClick).with_url(5),
            RawEvent::new("tt_address", 10, 1030, ResponseType::Ping),
            RawEvent::new("tt_address", 10, 1040, ResponseType::HtmlLinkClick).with_url(5),
        ];

        let summaries = summarize(42, events);
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];

        assert_eq!(s.mailing_id, 42);
        assert_eq!(s.recipient_table, "tt_address");
        assert_eq!(s.recipient_id, 10);
        assert_eq!(s.pings_count, 2);
        assert_eq!(s.pings_first_offset, 10);
        assert_eq!(s.pings_last_offset, 30);
        assert_eq!(s.html_links_count, 2);
        assert_eq!(s.html_links_first_offset, 20);
        assert_eq!(s.html_links_last_offset, 40);
        assert_eq!(s.plain_links_count, 0);
        assert_eq!(s.total_links_count, 2);
        assert_eq!(s.response_count, 4);
        assert_eq!(s.response_first_offset, 10);
        assert_eq!(s.response_last_offset, 40);
        assert_eq!(s.first_link_id, Some(5));
        assert_eq!(s.first_link_latency, 10);
        assert_eq!(s.second_link_id, Some(5));
        assert_eq!(s.second_link_latency, 10);
        assert_eq!(s.third_link_id, None);
        assert_eq!(s.third_link_latency, 0);
        assert_eq!(s.delivered_formats, 1);
        assert_eq!(s.sent_at, 1000);
        assert!(!s.bounced);
    }

    #[test]
    fn test_empty_lists_have_zero_offsets() {
        let events = vec![RawEvent::new("tt_address", 1, 1000, ResponseType::Sent).with_formats(3)];
        let s = &summarize(1, events)[0];

        assert_eq!(s.pings_count, 0);
        assert_eq!((s.pings_first_offset, s.pings_last_offset), (0, 0));
        assert_eq!((s.response_first_offset, s.response_last_offset), (0, 0));
        assert_eq!(s.first_link_id, None);
    }

    #[test]
    fn test_responses_before_sent_are_clamped() {
        // the sent row carries a later timestamp than the open
        let events = vec![
            RawEvent::new("tt_address", 1, 900, ResponseType::Ping),
            RawEvent::new("tt_address", 1, 1000, ResponseType::Sent).with_formats(1),
            RawEvent::new("tt_address", 1, 1500, ResponseType::Ping),
        ];
        let s = &summarize(1, events)[0];

        assert_eq!(s.pings_count, 2);
        assert_eq!(s.pings_first_offset, 0);
        assert_eq!(s.pings_last_offset, 500);
        assert_non_negative(s);
    }

    #[test]
    fn test_missing_sent_event_reports_zero_offsets() {
        let events = vec![
            RawEvent::new("fe_users", 8, 5000, ResponseType::Ping),
            RawEvent::new("fe_users", 8, 5100, ResponseType::PlainLinkClick).with_url(-2),
        ];
        let s = &summarize(1, events)[0];

        assert_eq!(s.sent_at, 0);
        assert_eq!(s.pings_count, 1);
        assert_eq!(s.plain_links_count, 1);
        assert_eq!(s.pings_first_offset, 0);
        assert_eq!(s.plain_links_last_offset, 0);
        assert_eq!(s.first_link_id, Some(-2));
        assert_eq!(s.first_link_latency, 100);
    }

    #[test]
    fn test_offsets_never_negative_across_shuffled_inputs() {
        let timestamps = [50, 3000, 10, 999, 1000, 1001, 0, 7777];
        for (i, sent_at) in timestamps.iter().enumerate() {
            let mut events = vec![
                RawEvent::new("tt_address", 1, *sent_at, ResponseType::Sent).with_formats(3),
            ];
            for (j, ts) in timestamps.iter().enumerate() {
                let response_type = match (i + j) % 3 {
                    0 => ResponseType::Ping,
                    1 => ResponseType::HtmlLinkClick,
                    _ => ResponseType::PlainLinkClick,
                };
                events.push(RawEvent::new("tt_address", 1, *ts, response_type).with_url(j as i64));
            }

            for s in summarize(1, events) {
                assert_non_negative(&s);
                if s.pings_count == 0 {
                    assert_eq!((s.pings_first_offset, s.pings_last_offset), (0, 0));
                }
            }
        }
    }
}
