//! Receipt ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

db_enum! {
    /// What a receipt records.
    pub enum ReceiptKind {
        Read => "READ",
        Decide => "DECIDE",
        Execute => "EXECUTE",
        Publish => "PUBLISH",
        Suppress => "SUPPRESS",
    }
}

db_enum! {
    /// Which component wrote a receipt.
    pub enum Actor {
        Analyzer => "ANALYZER",
        Knowledge => "KNOWLEDGE",
        Trust => "TRUST",
        Growth => "GROWTH",
        Reporter => "REPORTER",
        Publisher => "PUBLISHER",
        Delivery => "DELIVERY",
        Operator => "OPERATOR",
    }
}

/// One immutable audit-ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub tenant_id: String,
    pub kind: ReceiptKind,
    pub actor: Actor,
    pub summary: String,
    pub input: Value,
    pub output: Value,
    pub created_at: DateTime<Utc>,
}

/// A receipt about to be appended.
#[derive(Debug, Clone)]
pub struct NewReceipt {
    pub kind: ReceiptKind,
    pub actor: Actor,
    pub summary: String,
    pub input: Value,
    pub output: Value,
}

impl NewReceipt {
    pub fn new(kind: ReceiptKind, actor: Actor, summary: impl Into<String>) -> Self {
        Self {
            kind,
            actor,
            summary: summary.into(),
            input: Value::Null,
            output: Value::Null,
        }
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_payloads() {
        let receipt = NewReceipt::new(ReceiptKind::Suppress, Actor::Publisher, "blocked")
            .input(serde_json::json!({"slug": "faq-1"}))
            .output(serde_json::json!({"markers": ["returns window"]}));
        assert_eq!(receipt.kind, ReceiptKind::Suppress);
        assert_eq!(receipt.input["slug"], "faq-1");
        assert_eq!(receipt.output["markers"][0], "returns window");
    }
}
