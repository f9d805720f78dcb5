//! Sequential document numbering.
//!
//! Invoice and payment numbers follow `{PREFIX}-{year}-{month:02}-{seq:04}`
//! and restart at 1 for every (institution, year, month). Sequence values
//! come from the `number_sequences` table, advanced atomically by the
//! database layer; this module only knows about formatting.

use serde::{Deserialize, Serialize};

/// The kind of document a sequence number is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Payment,
}

impl DocumentKind {
    /// Human-readable number prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "INV",
            DocumentKind::Payment => "PAY",
        }
    }

    /// Key used in the `number_sequences` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::Payment => "payment",
        }
    }
}

/// Format a document number from its parts.
///
/// Sequences above 9999 widen naturally rather than truncating.
pub fn format_document_number(kind: DocumentKind, year: i32, month: u32, sequence: i64) -> String {
    format!("{}-{}-{:02}-{:04}", kind.prefix(), year, month, sequence)
}
