//! Recommendations and their stable identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::draft::Draft;
use crate::types::Surface;

db_enum! {
    /// Content action the classifier decided on.
    pub enum Action {
        Create => "CREATE",
        Update => "UPDATE",
        NoOp => "NO_OP",
        Defer => "DEFER",
        Skip => "SKIP",
    }
}

impl Action {
    /// Ranking bucket; lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Create | Self::Update => 0,
            Self::NoOp => 1,
            Self::Defer => 2,
            Self::Skip => 3,
        }
    }

    /// Whether the action calls for new content.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

db_enum! {
    /// Recommendation lifecycle: PROPOSED → DRAFTED → APPROVED → PUBLISHED.
    pub enum RecommendationStatus {
        Proposed => "PROPOSED",
        Drafted => "DRAFTED",
        Approved => "APPROVED",
        Published => "PUBLISHED",
    }
}

/// A persisted recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub tenant_id: String,
    pub action: Action,
    pub surface: Surface,
    pub status: RecommendationStatus,
    pub stable_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_handle: Option<String>,
    /// Which classifier rule produced `action`.
    pub reason: String,
    /// Impact of the originating demand signal, used for ranking.
    pub impact_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<Draft>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Classifier output for one demand signal, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedRecommendation {
    pub action: Action,
    pub surface: Surface,
    pub stable_slug: String,
    pub question_id: Option<String>,
    pub product_handle: Option<String>,
    pub reason: String,
    pub impact_score: u8,
}

/// Deterministic identifier for `(tenant, surface, source)`.
///
/// Re-running classification always lands on the same slug, so a
/// recommendation (and the asset it publishes) is updated in place.
pub fn stable_slug(tenant_id: &str, surface: Surface, source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(surface.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(source_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", surface.as_str().to_lowercase(), &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_slug_deterministic() {
        let a = stable_slug("t1", Surface::Faq, "q1");
        let b = stable_slug("t1", Surface::Faq, "q1");
        assert_eq!(a, b);
        assert!(a.starts_with("faq-"));
        assert_eq!(a.len(), "faq-".len() + 16);
    }

    #[test]
    fn stable_slug_differs_by_each_component() {
        let base = stable_slug("t1", Surface::Faq, "q1");
        assert_ne!(base, stable_slug("t2", Surface::Faq, "q1"));
        assert_ne!(base, stable_slug("t1", Surface::Blog, "q1"));
        assert_ne!(base, stable_slug("t1", Surface::Faq, "q2"));
    }

    #[test]
    fn action_priority_order() {
        assert!(Action::Create.priority() < Action::NoOp.priority());
        assert_eq!(Action::Create.priority(), Action::Update.priority());
        assert!(Action::NoOp.priority() < Action::Defer.priority());
        assert!(Action::Defer.priority() < Action::Skip.priority());
    }
}
