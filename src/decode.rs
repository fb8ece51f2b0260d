//! Boundary validation for store documents.
//!
//! Documents are schemaless; everything the sync layer renders passes through
//! here first. A document missing a required field is rejected as a whole.

use crate::store::{Document, Row};
use crate::types::{
    ActorId, Conversation, ConversationId, Message, MessageBody, Participants, PriceTier,
    ProductSnapshot, RfqRecord,
};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn required_str(doc: &Document, field: &str) -> Result<String, DecodeError> {
    match doc.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(field.to_string())),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(invalid(field, "empty string")),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}

/// Blank strings count as absent; anything else is kept verbatim.
fn optional_str(doc: &Document, field: &str) -> Option<String> {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn defaulted_str(doc: &Document, field: &str) -> String {
    optional_str(doc, field).unwrap_or_default()
}

fn required_timestamp(doc: &Document, field: &str) -> Result<DateTime<Utc>, DecodeError> {
    let value = doc
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| DecodeError::MissingField(field.to_string()))?;
    parse_timestamp(value).ok_or_else(|| invalid(field, "unrecognised timestamp"))
}

/// Converts the store's timestamp encodings into an instant.
///
/// Accepts RFC 3339 strings, `{seconds, nanoseconds}` objects (with or without
/// a leading underscore) and integer milliseconds since the epoch.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let nanos = u32::try_from(nanos).ok()?;
            Utc.timestamp_opt(seconds, nanos).single()
        }
        _ => None,
    }
}

fn as_document<'a>(value: &'a Value, field: &str) -> Result<&'a Document, DecodeError> {
    value
        .as_object()
        .ok_or_else(|| invalid(field, "expected an object"))
}

pub fn message(doc: &Document) -> Result<Message, DecodeError> {
    let body = MessageBody {
        text: optional_str(doc, "text"),
        attachment_url: optional_str(doc, "fileUrl"),
    };
    if body.is_empty() {
        return Err(DecodeError::MissingField("text".to_string()));
    }
    Ok(Message {
        sender_id: ActorId(required_str(doc, "senderId")?),
        body,
        sent_at: required_timestamp(doc, "timestamp")?,
    })
}

pub fn encode_message(message: &Message) -> Value {
    let mut out = json!({
        "senderId": message.sender_id.0,
        "timestamp": message.sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    if let Some(text) = &message.body.text {
        out["text"] = Value::String(text.clone());
    }
    if let Some(url) = &message.body.attachment_url {
        out["fileUrl"] = Value::String(url.clone());
    }
    out
}

/// Decodes a conversation document. `transcript_field` names the array of
/// messages inside it.
///
/// Only the participants are required. Messages that fail validation are
/// left out of the transcript and returned alongside it.
pub fn conversation(
    id: &ConversationId,
    doc: &Document,
    transcript_field: &str,
) -> Result<(Conversation, Vec<DecodeError>), DecodeError> {
    let buyer = ActorId(required_str(doc, "buyerId")?);
    let supplier = ActorId(required_str(doc, "supplierId")?);
    if buyer == supplier {
        return Err(invalid("supplierId", "same actor as buyerId"));
    }

    let mut transcript = Vec::new();
    let mut skipped = Vec::new();
    match doc.get(transcript_field) {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                match as_document(item, transcript_field).and_then(message) {
                    Ok(message) => transcript.push(message),
                    Err(err) => skipped.push(err),
                }
            }
        }
        Some(_) => skipped.push(invalid(transcript_field, "expected an array")),
    }
    // Stable: equal timestamps keep array order.
    transcript.sort_by_key(|m| m.sent_at);

    let conversation = Conversation {
        id: id.clone(),
        participants: Participants { buyer, supplier },
        transcript,
    };
    Ok((conversation, skipped))
}

fn price_tier(doc: &Document) -> Result<PriceTier, DecodeError> {
    let min_qty = doc
        .get("minQty")
        .and_then(Value::as_u64)
        .ok_or_else(|| DecodeError::MissingField("priceTiers.minQty".to_string()))?;
    let price = doc
        .get("price")
        .and_then(Value::as_f64)
        .ok_or_else(|| DecodeError::MissingField("priceTiers.price".to_string()))?;
    Ok(PriceTier {
        min_qty,
        max_qty: doc.get("maxQty").and_then(Value::as_u64),
        price,
    })
}

pub fn product_snapshot(doc: &Document) -> Result<ProductSnapshot, DecodeError> {
    let price_tiers = match doc.get("priceTiers") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| as_document(item, "priceTiers").and_then(price_tier))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid("priceTiers", "expected an array")),
    };
    Ok(ProductSnapshot {
        name: required_str(doc, "productName")?,
        category: defaulted_str(doc, "category"),
        price_tiers,
        image_url: optional_str(doc, "imageUrl"),
        supplier_name: required_str(doc, "supplierName")?,
    })
}

pub fn rfq_record(id: &str, doc: &Document) -> Result<RfqRecord, DecodeError> {
    Ok(RfqRecord {
        id: id.to_string(),
        buyer_id: ActorId(required_str(doc, "buyerId")?),
        supplier_id: ActorId(required_str(doc, "supplierId")?),
        product_details: required_str(doc, "productDetails")?,
        category: defaulted_str(doc, "category"),
        subcategory: defaulted_str(doc, "subcategory"),
        size: defaulted_str(doc, "size"),
        color: defaulted_str(doc, "color"),
        shipping: defaulted_str(doc, "shipping"),
        file_url: optional_str(doc, "fileURL"),
        timestamp: required_timestamp(doc, "timestamp")?,
    })
}

/// Decodes every row, sorted by timestamp. Rows that fail validation are
/// returned separately so the caller can flag them.
pub fn rfq_records(rows: &[Row]) -> (Vec<RfqRecord>, Vec<(String, DecodeError)>) {
    let mut records = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for (id, doc) in rows {
        match rfq_record(id, doc) {
            Ok(record) => records.push(record),
            Err(err) => rejected.push((id.clone(), err)),
        }
    }
    records.sort_by_key(|r| r.timestamp);
    (records, rejected)
}
