//! Content drafts and the verification marker.
//!
//! A draft is a tagged union of content kinds, each with a fixed schema, plus
//! the rendered `body` that downstream renderers see. Unresolved facts are
//! carried twice: as `[NEEDS_VERIFICATION: <label>]` tokens inside `body` and
//! as the structured `verification` list.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Surface;

/// Literal prefix of the marker token.
pub const MARKER_PREFIX: &str = "NEEDS_VERIFICATION";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[NEEDS_VERIFICATION:\s*([^\]]*?)\s*\]").expect("marker regex is valid")
});

/// Render a marker token for `label`.
pub fn marker(label: &str) -> String {
    format!("[{MARKER_PREFIX}: {label}]")
}

/// Human label for a claim key: `returns_window` → `returns window`.
pub fn marker_label(claim_key: &str) -> String {
    claim_key
        .split(|c: char| c == '_' || c == '.' || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract marker payloads from rendered text, in order of first appearance, without duplicates.
pub fn extract_markers(text: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for cap in MARKER_RE.captures_iter(text) {
        let label = cap[1].to_string();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

// ---------------------------------------------------------------------------
// Draft payload
// ---------------------------------------------------------------------------

/// Where the draft text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DraftOrigin {
    Model { model: String },
    /// Deterministic template used when no model is configured or the call failed.
    Fallback { reason: String },
}

impl DraftOrigin {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// A source the draft cites. Only evidence URLs supplied to the generator are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub claim_key: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqContent {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogSection {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogContent {
    pub title: String,
    pub sections: Vec<BlogSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductContent {
    pub handle: String,
    pub title: String,
    /// Enrichment attribute → text (materials, fit, care, ...).
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthFact {
    pub key: String,
    pub value: String,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthBlockContent {
    pub facts: Vec<TruthFact>,
}

/// Per-kind draft schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftContent {
    Faq(FaqContent),
    Blog(BlogContent),
    Product(ProductContent),
    TruthBlock(TruthBlockContent),
}

/// A generated draft attached to a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub content: DraftContent,
    /// Rendered text. Always contains every unresolved marker.
    pub body: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub origin: DraftOrigin,
    /// Structured copy of the marker payloads found in `body`.
    #[serde(default)]
    pub verification: Vec<String>,
}

impl Draft {
    /// Build a draft, deriving `verification` from the rendered body.
    pub fn new(
        content: DraftContent,
        body: String,
        citations: Vec<Citation>,
        origin: DraftOrigin,
    ) -> Self {
        let verification = extract_markers(&body);
        Self {
            content,
            body,
            citations,
            origin,
            verification,
        }
    }

    /// Marker payloads still present in the rendered text.
    pub fn unresolved_markers(&self) -> Vec<String> {
        extract_markers(&self.body)
    }

    pub fn title(&self) -> String {
        match &self.content {
            DraftContent::Faq(faq) => faq.question.clone(),
            DraftContent::Blog(blog) => blog.title.clone(),
            DraftContent::Product(product) => product.title.clone(),
            DraftContent::TruthBlock(_) => "Verified facts".into(),
        }
    }

    /// Surface this draft publishes to. Truth blocks publish as FAQ documents.
    pub fn surface(&self) -> Surface {
        match &self.content {
            DraftContent::Faq(_) | DraftContent::TruthBlock(_) => Surface::Faq,
            DraftContent::Blog(_) => Surface::Blog,
            DraftContent::Product(_) => Surface::Product,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_label_humanises_keys() {
        assert_eq!(marker_label("returns_window"), "returns window");
        assert_eq!(marker_label("shipping.eu_days"), "shipping eu days");
    }

    #[test]
    fn extracts_markers_in_order_without_duplicates() {
        let text = "Ship in [NEEDS_VERIFICATION: shipping time]. Returns: \
                    [NEEDS_VERIFICATION:returns window] and again [NEEDS_VERIFICATION: shipping time]";
        assert_eq!(
            extract_markers(text),
            vec!["shipping time".to_string(), "returns window".to_string()]
        );
    }

    #[test]
    fn no_markers_in_clean_text() {
        assert!(extract_markers("We ship in 2 days. [NOTE: fine]").is_empty());
    }

    #[test]
    fn draft_keeps_dual_representation() {
        let draft = Draft::new(
            DraftContent::Faq(FaqContent {
                question: "What is the returns window?".into(),
                answer: marker("returns window"),
            }),
            format!("What is the returns window? {}", marker("returns window")),
            vec![],
            DraftOrigin::Fallback {
                reason: "model not configured".into(),
            },
        );
        assert_eq!(draft.verification, vec!["returns window".to_string()]);
        assert_eq!(draft.unresolved_markers(), draft.verification);
        assert_eq!(draft.surface(), Surface::Faq);
    }

    #[test]
    fn draft_serializes_as_tagged_union() {
        let draft = Draft::new(
            DraftContent::Blog(BlogContent {
                title: "Care guide".into(),
                sections: vec![],
            }),
            "Care guide".into(),
            vec![],
            DraftOrigin::Model {
                model: "m".into(),
            },
        );
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["content"]["kind"], "BLOG");
        assert_eq!(json["origin"]["source"], "model");
        let back: Draft = serde_json::from_value(json).unwrap();
        assert_eq!(back, draft);
    }
}
