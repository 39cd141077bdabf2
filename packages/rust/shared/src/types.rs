//! Core domain types: tenants, the knowledge store, demand signals, trust snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new time-sortable row identifier.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Tenant
// ---------------------------------------------------------------------------

/// A brand whose content is being analyzed. Every other record is scoped to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    /// Public web domain, used as the lookup key by callers.
    pub domain: String,
    pub name: String,
    /// Topic vocabulary used to decide whether a question is on-topic.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Knowledge store
// ---------------------------------------------------------------------------

/// A single verified fact about a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub tenant_id: String,
    /// Stable fact key (e.g. `returns_window`).
    pub key: String,
    pub value: String,
    /// 0–100.
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_at: Option<DateTime<Utc>>,
    pub scope: String,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`Claim`] upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClaim {
    pub key: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub freshness_at: Option<DateTime<Utc>>,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_confidence() -> u8 {
    80
}
fn default_scope() -> String {
    "site".into()
}

/// A source URL and excerpt backing a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub claim_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvidence {
    pub url: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// One record of crawler/extractor output: a claim plus the evidence it was read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedClaim {
    #[serde(flatten)]
    pub claim: NewClaim,
    pub evidence: Vec<NewEvidence>,
}

/// A claim joined with its evidence rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedClaim {
    pub claim: Claim,
    pub evidence: Vec<Evidence>,
}

impl VerifiedClaim {
    /// True when at least one evidence row backs the claim.
    pub fn has_proof(&self) -> bool {
        !self.evidence.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Demand signals
// ---------------------------------------------------------------------------

db_enum! {
    /// Topic taxonomy for demand signals.
    pub enum Taxonomy {
        Shipping => "SHIPPING",
        Returns => "RETURNS",
        Sizing => "SIZING",
        Materials => "MATERIALS",
        Care => "CARE",
        Pricing => "PRICING",
        Policy => "POLICY",
        Product => "PRODUCT",
        Brand => "BRAND",
        Other => "OTHER",
    }
}

impl Taxonomy {
    /// Lower-case theme word, as it would appear in an article title.
    pub fn theme(&self) -> &'static str {
        match self {
            Self::Shipping => "shipping",
            Self::Returns => "returns",
            Self::Sizing => "sizing",
            Self::Materials => "materials",
            Self::Care => "care",
            Self::Pricing => "pricing",
            Self::Policy => "policy",
            Self::Product => "product",
            Self::Brand => "brand",
            Self::Other => "other",
        }
    }
}

db_enum! {
    /// Coverage state of a demand signal, derived by gap analysis.
    pub enum QuestionState {
        Unanswered => "UNANSWERED",
        Weak => "WEAK",
        Answered => "ANSWERED",
        Stale => "STALE",
        Trusted => "TRUSTED",
    }
}

impl QuestionState {
    pub fn is_answered(&self) -> bool {
        matches!(self, Self::Answered | Self::Trusted)
    }
}

db_enum! {
    /// Content surface a recommendation or asset targets.
    pub enum Surface {
        Faq => "FAQ",
        Blog => "BLOG",
        Product => "PRODUCT",
    }
}

/// A customer/AI-asked question tracked for coverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub tenant_id: String,
    pub taxonomy: Taxonomy,
    pub text: String,
    /// 1–100.
    pub impact_score: u8,
    pub state: QuestionState,
    pub recommended_surface: Surface,
    /// Catalog hint for PRODUCT questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_handle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    pub taxonomy: Taxonomy,
    pub text: String,
    pub impact_score: u8,
    pub recommended_surface: Surface,
    #[serde(default)]
    pub product_handle: Option<String>,
    #[serde(default)]
    pub needs: Vec<NewNeed>,
}

/// Declares that a question requires a fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Need {
    pub id: String,
    pub question_id: String,
    pub claim_key: String,
    pub required: bool,
    /// Populated once a claim with `claim_key` exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNeed {
    pub claim_key: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

db_enum! {
    /// Why a demand signal is not answered.
    pub enum GapKind {
        MissingClaim => "MISSING_CLAIM",
        MissingProof => "MISSING_PROOF",
        Stale => "STALE",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub question_id: String,
    pub claim_key: String,
    pub kind: GapKind,
}

/// An external answer sampled for a question text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSample {
    pub id: String,
    pub tenant_id: String,
    pub question_text: String,
    pub answer: String,
    /// 0–100; higher means more hedging.
    pub hedging_score: u8,
    /// Set by the probing collaborator when the answer could not be verified.
    pub unverifiable: bool,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnswerSample {
    pub question_text: String,
    pub answer: String,
    pub hedging_score: u8,
    #[serde(default)]
    pub unverifiable: bool,
}

/// Catalog item that PRODUCT recommendations enrich.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub specs: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Trust score
// ---------------------------------------------------------------------------

/// Components of a trust total. Shares are 0.0–1.0; `avg_confidence` is 0–100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustBreakdown {
    pub evidence_coverage: f64,
    pub avg_confidence: f64,
    pub fresh_share: f64,
    pub answered_share: f64,
}

/// Immutable point-in-time trust score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSnapshot {
    pub id: String,
    pub tenant_id: String,
    /// 0–100.
    pub total: u8,
    pub breakdown: TrustBreakdown,
    pub created_at: DateTime<Utc>,
}
