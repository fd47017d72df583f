//! Data model: references, messages and their gated forms

pub mod gated;
pub mod message;
pub mod refs;

pub use gated::{GatedMessage, RedactedMessage, RedactionReason, PRIVATE_PLACEHOLDER, UNHOSTED_PLACEHOLDER};
pub use message::{Message, MessageMeta, MessageValue, Recipient, Vote};
pub use refs::{BlobId, FeedId, MsgKey};
