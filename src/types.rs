use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Opaque conversation id; also the id of the attached snapshot document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The two parties of a conversation. Always distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participants {
    pub buyer: ActorId,
    pub supplier: ActorId,
}

impl Participants {
    pub fn includes(&self, actor: &ActorId) -> bool {
        self.buyer == *actor || self.supplier == *actor
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageBody {
    pub text: Option<String>,
    pub attachment_url: Option<String>,
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachment_url: None,
        }
    }

    pub fn attachment(url: impl Into<String>) -> Self {
        Self {
            text: None,
            attachment_url: Some(url.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.text) && blank(&self.attachment_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub sender_id: ActorId,
    pub body: MessageBody,
    pub sent_at: DateTime<Utc>,
}

/// Conversation metadata plus its transcript, as last observed in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Participants,
    /// Sorted by `sent_at`; ties keep array order.
    pub transcript: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceTier {
    pub min_qty: u64,
    pub max_qty: Option<u64>,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub category: String,
    pub price_tiers: Vec<PriceTier>,
    pub image_url: Option<String>,
    pub supplier_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RfqRecord {
    pub id: String,
    pub buyer_id: ActorId,
    pub supplier_id: ActorId,
    pub product_details: String,
    pub category: String,
    pub subcategory: String,
    pub size: String,
    pub color: String,
    pub shipping: String,
    pub file_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Which attachment a conversation carries, and how an absent product
/// snapshot is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Product { missing_snapshot: MissingSnapshot },
    Rfq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSnapshot {
    /// Absent snapshot renders as "no product", without a notice.
    Ignore,
    /// Absent snapshot renders as a not-found notice.
    Report,
}
