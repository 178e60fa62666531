pub mod event;
pub mod manifest;
pub mod summary;

pub use event::{DeliveredFormats, EventRow, RawEvent, RecipientKey, ResponseType, SendOptions};
pub use manifest::{CampaignLinkManifest, HtmlLink, PlainLink};
pub use summary::RecipientSummary;
