//! Audience, campaign and segment types for the growth engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

db_enum! {
    pub enum Sentiment {
        Positive => "POSITIVE",
        Neutral => "NEUTRAL",
        Negative => "NEGATIVE",
    }
}

/// One row of the read-only audience source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceMember {
    pub id: String,
    pub tenant_id: String,
    /// Contact address (e-mail); may be blank in dirty source data.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    pub referred: bool,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAudienceMember {
    pub address: String,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub referred: bool,
    #[serde(default)]
    pub attributes: Value,
}

/// Why an audience row was excluded from a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SuppressionReason {
    MissingAddress,
    MissingRating,
    /// Rating below the rule's minimum (carried in the code, e.g. `rating_below_5`).
    RatingBelow(u8),
    NonPositiveSentiment,
    AlreadyReferred,
}

impl SuppressionReason {
    pub fn code(&self) -> String {
        match self {
            Self::MissingAddress => "missing_address".into(),
            Self::MissingRating => "missing_rating".into(),
            Self::RatingBelow(min) => format!("rating_below_{min}"),
            Self::NonPositiveSentiment => "non_positive_sentiment".into(),
            Self::AlreadyReferred => "already_referred".into(),
        }
    }
}

impl Serialize for SuppressionReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

/// Referral eligibility predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRule {
    pub min_rating: u8,
    pub require_positive: bool,
    pub exclude_referred: bool,
}

impl ReferralRule {
    pub fn with_min_rating(min_rating: u8) -> Self {
        Self {
            min_rating,
            require_positive: true,
            exclude_referred: true,
        }
    }
}

db_enum! {
    /// Campaign lifecycle: READY → APPROVED → EXECUTED.
    pub enum CampaignStatus {
        Ready => "READY",
        Approved => "APPROVED",
        Executed => "EXECUTED",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Fixed at creation.
    pub dry_run: bool,
    pub status: CampaignStatus,
    pub rule: ReferralRule,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

/// Frozen segment counts for a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSnapshot {
    pub id: String,
    pub campaign_id: String,
    pub eligible_count: usize,
    pub suppressed_count: usize,
    /// Suppression reason code → count.
    pub reasons: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
}

db_enum! {
    pub enum SendStatus {
        DryRun => "DRY_RUN",
        Suppressed => "SUPPRESSED",
        Sent => "SENT",
    }
}

/// One targeted recipient of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: String,
    pub campaign_id: String,
    pub address: String,
    pub status: SendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
