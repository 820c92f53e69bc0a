use super::PriceQuote;
use serde::{Deserialize, Serialize};

/// Row-level change kind as written by the NOTIFY trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// Identifier part of a deleted row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldRecord {
    pub id: i64,
}

/// Raw NOTIFY payload:
/// `{"type":"UPDATE","record":{...},"old_record":{"id":1}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<PriceQuote>,
    #[serde(default)]
    pub old_record: Option<OldRecord>,
}

/// A change to the quote table, ready to be folded into a held list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { record: PriceQuote },
    Update { record: PriceQuote },
    Delete { old_id: i64 },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Identifier of the row the event is about
    pub fn quote_id(&self) -> i64 {
        match self {
            ChangeEvent::Insert { record } | ChangeEvent::Update { record } => record.id,
            ChangeEvent::Delete { old_id } => *old_id,
        }
    }
}

impl TryFrom<ChangePayload> for ChangeEvent {
    type Error = String;

    fn try_from(payload: ChangePayload) -> Result<Self, Self::Error> {
        match payload.kind {
            ChangeKind::Insert => payload
                .record
                .map(|record| ChangeEvent::Insert { record })
                .ok_or_else(|| "INSERT payload without record".to_string()),
            ChangeKind::Update => payload
                .record
                .map(|record| ChangeEvent::Update { record })
                .ok_or_else(|| "UPDATE payload without record".to_string()),
            ChangeKind::Delete => payload
                .old_record
                .map(|old| ChangeEvent::Delete { old_id: old.id })
                .ok_or_else(|| "DELETE payload without old_record".to_string()),
        }
    }
}
