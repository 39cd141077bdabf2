//! Trust policy engine: trust score computation and zone-based action gating.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use trustline_shared::{
    Actor, NewReceipt, PolicyConfig, Question, Receipt, ReceiptKind, Result, TrustBreakdown,
    TrustSnapshot, TrustlineError, VerifiedClaim,
};
use trustline_storage::Storage;

// ---------------------------------------------------------------------------
// Zones & actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    Unsafe,
    Caution,
    Safe,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Caution => "CAUTION",
            Self::Unsafe => "UNSAFE",
        }
    }

    /// Actions the zone permits.
    pub fn allows(&self, action: PolicyAction) -> bool {
        match self {
            Self::Safe => true,
            Self::Caution => matches!(
                action,
                PolicyAction::PublishContent | PolicyAction::CampaignDryRun
            ),
            Self::Unsafe => action == PolicyAction::PublishContent,
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions gated by the trust zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
    PublishContent,
    CampaignDryRun,
    ReviewRequest,
    CampaignSend,
}

impl PolicyAction {
    pub const ALL: [PolicyAction; 4] = [
        Self::PublishContent,
        Self::CampaignDryRun,
        Self::ReviewRequest,
        Self::CampaignSend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublishContent => "PUBLISH_CONTENT",
            Self::CampaignDryRun => "CAMPAIGN_DRY_RUN",
            Self::ReviewRequest => "REVIEW_REQUEST",
            Self::CampaignSend => "CAMPAIGN_SEND",
        }
    }
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating the policy for one trust total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub total: u8,
    pub zone: Zone,
    pub allowed: Vec<PolicyAction>,
    pub blocked: Vec<PolicyAction>,
}

impl PolicyDecision {
    pub fn allows(&self, action: PolicyAction) -> bool {
        self.allowed.contains(&action)
    }

    /// `PolicyBlocked` error for `action`, or `Ok` if it is allowed.
    pub fn require(&self, action: PolicyAction) -> Result<()> {
        if self.allows(action) {
            Ok(())
        } else {
            Err(TrustlineError::PolicyBlocked {
                zone: self.zone.to_string(),
                action: action.to_string(),
            })
        }
    }
}

/// Maps trust totals to zones using validated thresholds.
#[derive(Debug, Clone, Copy)]
pub struct TrustPolicy {
    config: PolicyConfig,
}

impl TrustPolicy {
    /// Thresholds must satisfy `caution_min <= safe_min <= 100`.
    pub fn new(config: PolicyConfig) -> Result<Self> {
        if config.safe_min > 100 {
            return Err(TrustlineError::config(format!(
                "policy.safe_min must be <= 100, got {}",
                config.safe_min
            )));
        }
        if config.caution_min > config.safe_min {
            return Err(TrustlineError::config(format!(
                "policy.caution_min ({}) must not exceed policy.safe_min ({})",
                config.caution_min, config.safe_min
            )));
        }
        Ok(Self { config })
    }

    pub fn zone(&self, total: u8) -> Zone {
        if total >= self.config.safe_min {
            Zone::Safe
        } else if total >= self.config.caution_min {
            Zone::Caution
        } else {
            Zone::Unsafe
        }
    }

    pub fn evaluate(&self, total: u8) -> PolicyDecision {
        let zone = self.zone(total);
        let (allowed, blocked): (Vec<_>, Vec<_>) = PolicyAction::ALL
            .iter()
            .copied()
            .partition(|action| zone.allows(*action));
        PolicyDecision {
            total,
            zone,
            allowed,
            blocked,
        }
    }

    /// Evaluate against the tenant's latest snapshot. A tenant that was never
    /// scored is treated as total 0.
    pub async fn evaluate_latest(&self, storage: &Storage, tenant_id: &str) -> Result<PolicyDecision> {
        let total = storage
            .latest_trust_snapshot(tenant_id)
            .await?
            .map(|s| s.total)
            .unwrap_or(0);
        Ok(self.evaluate(total))
    }
}

// ---------------------------------------------------------------------------
// Trust score
// ---------------------------------------------------------------------------

/// Compute the trust total and its components.
///
/// `total = round(40·coverage + 20·confidence/100 + 20·fresh + 20·answered)`;
/// a tenant with no claims scores 0.
pub fn compute_trust(
    claims: &BTreeMap<String, VerifiedClaim>,
    questions: &[Question],
    stale_after_days: i64,
    now: DateTime<Utc>,
) -> (u8, TrustBreakdown) {
    if claims.is_empty() {
        return (0, TrustBreakdown::default());
    }
    let n = claims.len() as f64;
    let stale_cutoff = now - Duration::days(stale_after_days);

    let with_evidence = claims.values().filter(|c| c.has_proof()).count() as f64;
    let confidence_sum: f64 = claims.values().map(|c| f64::from(c.claim.confidence)).sum();
    let fresh = claims
        .values()
        .filter(|c| c.claim.freshness_at.is_some_and(|at| at >= stale_cutoff))
        .count() as f64;
    let answered_share = if questions.is_empty() {
        0.0
    } else {
        questions.iter().filter(|q| q.state.is_answered()).count() as f64 / questions.len() as f64
    };

    let breakdown = TrustBreakdown {
        evidence_coverage: with_evidence / n,
        avg_confidence: confidence_sum / n,
        fresh_share: fresh / n,
        answered_share,
    };
    let raw = 40.0 * breakdown.evidence_coverage
        + 20.0 * breakdown.avg_confidence / 100.0
        + 20.0 * breakdown.fresh_share
        + 20.0 * breakdown.answered_share;
    (raw.round().clamp(0.0, 100.0) as u8, breakdown)
}

/// A freshly recorded snapshot and the policy it implies.
#[derive(Debug, Clone, Serialize)]
pub struct TrustAssessment {
    pub snapshot: TrustSnapshot,
    pub decision: PolicyDecision,
    #[serde(skip)]
    pub receipt: Receipt,
}

/// Score the tenant, persist a snapshot and append one DECIDE receipt.
#[instrument(skip_all, fields(tenant = tenant_id))]
pub async fn assess_trust(
    storage: &Storage,
    policy: &TrustPolicy,
    tenant_id: &str,
    stale_after_days: i64,
) -> Result<TrustAssessment> {
    let claims = storage.verified_claims(tenant_id).await?;
    let questions = storage.list_questions(tenant_id).await?;
    let (total, breakdown) = compute_trust(&claims, &questions, stale_after_days, Utc::now());

    let snapshot = storage
        .record_trust_snapshot(tenant_id, total, breakdown)
        .await?;
    let decision = policy.evaluate(total);
    info!(total, zone = %decision.zone, "trust assessed");

    let receipt = storage
        .append_receipt(
            tenant_id,
            NewReceipt::new(
                ReceiptKind::Decide,
                Actor::Trust,
                format!("trust {total} ({})", decision.zone),
            )
            .input(serde_json::json!({
                "claims": claims.len(),
                "questions": questions.len(),
            }))
            .output(serde_json::json!({
                "snapshot_id": snapshot.id,
                "total": total,
                "breakdown": breakdown,
                "zone": decision.zone,
                "blocked": decision.blocked,
            })),
        )
        .await?;

    Ok(TrustAssessment {
        snapshot,
        decision,
        receipt,
    })
}

#[cfg(test)]
mod tests {
    use trustline_shared::{Claim, Evidence, QuestionState, Surface, Taxonomy};

    use super::*;

    fn policy() -> TrustPolicy {
        TrustPolicy::new(PolicyConfig::default()).unwrap()
    }

    fn verified(key: &str, confidence: u8, evidence: bool, age_days: Option<i64>) -> VerifiedClaim {
        let now = Utc::now();
        VerifiedClaim {
            claim: Claim {
                id: format!("c-{key}"),
                tenant_id: "t".into(),
                key: key.into(),
                value: "v".into(),
                confidence,
                freshness_at: age_days.map(|d| now - Duration::days(d)),
                scope: "site".into(),
                updated_at: now,
            },
            evidence: if evidence {
                vec![Evidence {
                    id: format!("e-{key}"),
                    claim_id: format!("c-{key}"),
                    url: "https://shop.example.com/policy".into(),
                    snippet: None,
                    captured_at: now,
                }]
            } else {
                vec![]
            },
        }
    }

    fn question(state: QuestionState) -> Question {
        Question {
            id: "q".into(),
            tenant_id: "t".into(),
            taxonomy: Taxonomy::Returns,
            text: "q".into(),
            impact_score: 50,
            state,
            recommended_surface: Surface::Faq,
            product_handle: None,
        }
    }

    #[test]
    fn zones_and_allowed_actions() {
        let p = policy();
        let safe = p.evaluate(70);
        assert_eq!(safe.zone, Zone::Safe);
        assert!(safe.blocked.is_empty());

        let caution = p.evaluate(69);
        assert_eq!(caution.zone, Zone::Caution);
        assert_eq!(
            caution.allowed,
            vec![PolicyAction::PublishContent, PolicyAction::CampaignDryRun]
        );

        let unsafe_ = p.evaluate(10);
        assert_eq!(unsafe_.zone, Zone::Unsafe);
        assert_eq!(unsafe_.allowed, vec![PolicyAction::PublishContent]);
        let err = unsafe_.require(PolicyAction::CampaignDryRun).unwrap_err();
        assert_eq!(err.code(), "policy_blocked");
        assert!(err.to_string().contains("UNSAFE"));
    }

    #[test]
    fn policy_is_monotonic() {
        let p = policy();
        for total in 0..100u8 {
            let lower = p.evaluate(total);
            let higher = p.evaluate(total + 1);
            assert!(higher.zone >= lower.zone);
            for action in &lower.allowed {
                assert!(higher.allows(*action), "{action} lost at {}", total + 1);
            }
        }
    }

    #[test]
    fn thresholds_are_validated() {
        assert!(
            TrustPolicy::new(PolicyConfig {
                safe_min: 50,
                caution_min: 60
            })
            .is_err()
        );
        let err = TrustPolicy::new(PolicyConfig {
            safe_min: 101,
            caution_min: 10,
        })
        .unwrap_err();
        assert_eq!(err.code(), "config_error");
        assert!(
            TrustPolicy::new(PolicyConfig {
                safe_min: 40,
                caution_min: 40
            })
            .is_ok()
        );
    }

    #[test]
    fn trust_score_formula() {
        let now = Utc::now();
        let (total, _) = compute_trust(&BTreeMap::new(), &[], 90, now);
        assert_eq!(total, 0);

        let claims = BTreeMap::from([
            ("a".to_string(), verified("a", 100, true, Some(1))),
            ("b".to_string(), verified("b", 50, false, Some(400))),
        ]);
        let questions = [
            question(QuestionState::Answered),
            question(QuestionState::Unanswered),
        ];
        let (total, breakdown) = compute_trust(&claims, &questions, 90, now);
        assert_eq!(breakdown.evidence_coverage, 0.5);
        assert_eq!(breakdown.avg_confidence, 75.0);
        assert_eq!(breakdown.fresh_share, 0.5);
        assert_eq!(breakdown.answered_share, 0.5);
        // 20 + 15 + 10 + 10
        assert_eq!(total, 55);
    }

    #[test]
    fn claims_without_freshness_are_not_fresh() {
        let claims = BTreeMap::from([("a".to_string(), verified("a", 100, true, None))]);
        let (total, breakdown) = compute_trust(&claims, &[], 90, Utc::now());
        assert_eq!(breakdown.fresh_share, 0.0);
        assert_eq!(total, 60);
    }
}
