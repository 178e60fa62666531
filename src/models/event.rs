use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of a mail log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ResponseType {
    /// The message was handed to the mail server
    Sent,
    /// A tracked link in the HTML part was followed
    HtmlLinkClick,
    /// A tracked link in the plain-text part was followed
    PlainLinkClick,
    /// The tracking beacon was loaded (the message was opened)
    Ping,
    /// The message came back undelivered
    Bounce,
    /// A code this version does not know about
    Other(i64),
}

impl ResponseType {
    pub const fn code(self) -> i64 {
        match self {
            ResponseType::Sent => 0,
            ResponseType::HtmlLinkClick => 1,
            ResponseType::PlainLinkClick => 2,
            ResponseType::Ping => -1,
            ResponseType::Bounce => -127,
            ResponseType::Other(code) => code,
        }
    }

    pub const fn from_code(code: i64) -> Self {
        match code {
            0 => ResponseType::Sent,
            1 => ResponseType::HtmlLinkClick,
            2 => ResponseType::PlainLinkClick,
            -1 => ResponseType::Ping,
            -127 => ResponseType::Bounce,
            other => ResponseType::Other(other),
        }
    }
}

impl From<i64> for ResponseType {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

impl From<ResponseType> for i64 {
    fn from(response_type: ResponseType) -> Self {
        response_type.code()
    }
}

/// Formats delivered to one recipient, as logged on the `Sent` row.
///
/// Flag values: `1` html, `2` plain, `3` both, `0` nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveredFormats {
    pub html: bool,
    pub plain: bool,
}

impl DeliveredFormats {
    pub const HTML: i64 = 0x1;
    pub const PLAIN: i64 = 0x2;

    pub const fn from_flags(flags: i64) -> Self {
        Self {
            html: flags & Self::HTML != 0,
            plain: flags & Self::PLAIN != 0,
        }
    }

    pub const fn flags(self) -> i64 {
        let mut flags = 0;
        if self.html {
            flags |= Self::HTML;
        }
        if self.plain {
            flags |= Self::PLAIN;
        }
        flags
    }
}

/// Campaign-level send options. Note the bit order differs from
/// [`DeliveredFormats`]: bit 0 is plain, bit 1 is html.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions(pub i64);

impl SendOptions {
    /// Whether the campaign was sent with an HTML body
    pub const fn html(self) -> bool {
        self.0 & 0x2 != 0
    }
}

/// Grouping key of the event log: recipient table plus id within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientKey {
    pub table: String,
    pub id: i64,
}

impl RecipientKey {
    pub fn new(table: impl Into<String>, id: i64) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

impl std::fmt::Display for RecipientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table, self.id)
    }
}

/// One mail log fact. Append-only; never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub recipient_id: i64,
    pub recipient_table: String,
    pub timestamp: i64,
    pub response_type: ResponseType,
    /// Positive html link index, or negated plain link index
    #[serde(default)]
    pub url_id: Option<i64>,
    #[serde(default)]
    pub format_flags: i64,
    #[serde(default)]
    pub payload_size: Option<i64>,
    /// Only set on bounces
    #[serde(default)]
    pub return_code: Option<i64>,
}

impl RawEvent {
    pub fn new(
        recipient_table: impl Into<String>,
        recipient_id: i64,
        timestamp: i64,
        response_type: ResponseType,
    ) -> Self {
        Self {
            recipient_id,
            recipient_table: recipient_table.into(),
            timestamp,
            response_type,
            url_id: None,
            format_flags: 0,
            payload_size: None,
            return_code: None,
        }
    }

    pub fn with_url(mut self, url_id: i64) -> Self {
        self.url_id = Some(url_id);
        self
    }

    pub fn with_formats(mut self, format_flags: i64) -> Self {
        self.format_flags = format_flags;
        self
    }

    pub fn with_size(mut self, payload_size: i64) -> Self {
        self.payload_size = Some(payload_size);
        self
    }

    pub fn with_return_code(mut self, return_code: i64) -> Self {
        self.return_code = Some(return_code);
        self
    }

    pub fn key(&self) -> RecipientKey {
        RecipientKey::new(self.recipient_table.clone(), self.recipient_id)
    }

    /// True when this event belongs to the given recipient group.
    pub fn belongs_to(&self, key: &RecipientKey) -> bool {
        self.recipient_id == key.id && self.recipient_table == key.table
    }
}

/// Mail log row as stored in the database
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub rid: i64,
    pub rtbl: String,
    pub tstamp: i64,
    pub response_type: i64,
    pub url_id: Option<i64>,
    pub html_sent: i64,
    pub size: Option<i64>,
    pub return_code: Option<i64>,
}

impl From<EventRow> for RawEvent {
    fn from(row: EventRow) -> Self {
        Self {
            recipient_id: row.rid,
            recipient_table: row.rtbl,
            timestamp: row.tstamp,
            response_type: ResponseType::from_code(row.response_type),
            url_id: row.url_id,
            format_flags: row.html_sent,
            payload_size: row.size,
            return_code: row.return_code,
        }
    }
}
