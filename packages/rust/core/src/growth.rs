//! Referral campaigns gated by the trust policy.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use trustline_shared::{
    Actor, AudienceMember, Campaign, CampaignStatus, GrowthConfig, NewReceipt, Receipt,
    ReceiptKind, ReferralRule, Result, SegmentSnapshot, SendStatus, Sentiment, SuppressionReason,
    TrustlineError,
};
use trustline_storage::{NewSendReceipt, Storage};

use crate::policy::{PolicyAction, PolicyDecision, TrustPolicy};

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

/// First rule a member fails, or `None` when eligible.
pub fn suppression_reason(member: &AudienceMember, rule: &ReferralRule) -> Option<SuppressionReason> {
    if member.address.trim().is_empty() {
        return Some(SuppressionReason::MissingAddress);
    }
    if rule.exclude_referred && member.referred {
        return Some(SuppressionReason::AlreadyReferred);
    }
    match member.rating {
        None => return Some(SuppressionReason::MissingRating),
        Some(r) if r < rule.min_rating => {
            return Some(SuppressionReason::RatingBelow(rule.min_rating));
        }
        Some(_) => {}
    }
    if rule.require_positive && member.sentiment != Some(Sentiment::Positive) {
        return Some(SuppressionReason::NonPositiveSentiment);
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct Segment<'a> {
    pub eligible: Vec<&'a AudienceMember>,
    pub suppressed: Vec<(&'a AudienceMember, SuppressionReason)>,
}

impl Segment<'_> {
    /// Suppression reason code → count.
    pub fn reasons(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, reason) in &self.suppressed {
            *counts.entry(reason.code()).or_default() += 1;
        }
        counts
    }
}

pub fn segment<'a>(members: &'a [AudienceMember], rule: &ReferralRule) -> Segment<'a> {
    let mut out = Segment::default();
    for member in members {
        match suppression_reason(member, rule) {
            None => out.eligible.push(member),
            Some(reason) => out.suppressed.push((member, reason)),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CampaignOutcome {
    Created {
        campaign: Campaign,
        snapshot: SegmentSnapshot,
        #[serde(skip)]
        receipt: Receipt,
    },
    Blocked {
        action: PolicyAction,
        decision: PolicyDecision,
        #[serde(skip)]
        receipt: Receipt,
    },
}

impl CampaignOutcome {
    /// The DECIDE or SUPPRESS receipt this outcome was recorded under.
    pub fn receipt(&self) -> &Receipt {
        match self {
            Self::Created { receipt, .. } | Self::Blocked { receipt, .. } => receipt,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecuteOutcome {
    Executed { campaign: Campaign, sent: usize },
    Blocked {
        action: PolicyAction,
        decision: PolicyDecision,
    },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct GrowthEngine {
    policy: TrustPolicy,
    config: GrowthConfig,
}

fn required_action(dry_run: bool) -> PolicyAction {
    if dry_run {
        PolicyAction::CampaignDryRun
    } else {
        PolicyAction::CampaignSend
    }
}

impl GrowthEngine {
    pub fn new(policy: TrustPolicy, config: GrowthConfig) -> Self {
        Self { policy, config }
    }

    async fn suppress(
        &self,
        storage: &Storage,
        tenant_id: &str,
        action: PolicyAction,
        decision: &PolicyDecision,
        subject: serde_json::Value,
    ) -> Result<Receipt> {
        warn!(zone = %decision.zone, total = decision.total, %action, "growth action blocked by trust policy");
        storage
            .append_receipt(
                tenant_id,
                NewReceipt::new(
                    ReceiptKind::Suppress,
                    Actor::Growth,
                    format!("{action} blocked in zone {}", decision.zone),
                )
                .input(subject)
                .output(json!({
                    "error": "policy_blocked",
                    "zone": decision.zone,
                    "total": decision.total,
                    "action": action,
                })),
            )
            .await
    }

    /// Create a referral campaign. The policy is checked before anything is
    /// written; a blocked request leaves one SUPPRESS receipt and no campaign.
    #[instrument(skip_all, fields(tenant = tenant_id, dry_run = dry_run))]
    pub async fn create_campaign(
        &self,
        storage: &Storage,
        tenant_id: &str,
        name: &str,
        dry_run: bool,
    ) -> Result<CampaignOutcome> {
        let action = required_action(dry_run);
        let decision = self.policy.evaluate_latest(storage, tenant_id).await?;
        if !decision.allows(action) {
            let receipt = self
                .suppress(
                    storage,
                    tenant_id,
                    action,
                    &decision,
                    json!({ "name": name, "dry_run": dry_run }),
                )
                .await?;
            return Ok(CampaignOutcome::Blocked {
                action,
                decision,
                receipt,
            });
        }

        let rule = ReferralRule::with_min_rating(self.config.min_rating);
        let members = storage.list_audience(tenant_id).await?;
        let seg = segment(&members, &rule);
        let reasons = seg.reasons();

        let campaign = storage.insert_campaign(tenant_id, name, dry_run, rule).await?;
        let snapshot = storage
            .insert_segment_snapshot(&campaign.id, seg.eligible.len(), seg.suppressed.len(), &reasons)
            .await?;

        let mut sends: Vec<NewSendReceipt> = seg
            .eligible
            .iter()
            .map(|m| NewSendReceipt {
                address: m.address.clone(),
                status: SendStatus::DryRun,
                reason: None,
            })
            .collect();
        sends.extend(
            seg.suppressed
                .iter()
                .take(self.config.suppressed_receipt_cap)
                .map(|(m, reason)| NewSendReceipt {
                    address: m.address.clone(),
                    status: SendStatus::Suppressed,
                    reason: Some(reason.code()),
                }),
        );
        let written = storage.insert_send_receipts(&campaign.id, &sends).await?;

        info!(
            campaign = %campaign.id,
            eligible = snapshot.eligible_count,
            suppressed = snapshot.suppressed_count,
            "campaign created"
        );
        let receipt = storage
            .append_receipt(
                tenant_id,
                NewReceipt::new(
                    ReceiptKind::Decide,
                    Actor::Growth,
                    format!(
                        "campaign {name}: {} eligible, {} suppressed",
                        snapshot.eligible_count, snapshot.suppressed_count
                    ),
                )
                .input(json!({ "name": name, "dry_run": dry_run, "rule": rule }))
                .output(json!({
                    "campaign_id": campaign.id,
                    "zone": decision.zone,
                    "eligible": snapshot.eligible_count,
                    "suppressed": snapshot.suppressed_count,
                    "reasons": reasons,
                    "send_receipts": written,
                })),
            )
            .await?;

        Ok(CampaignOutcome::Created {
            campaign,
            snapshot,
            receipt,
        })
    }

    async fn require_campaign(
        &self,
        storage: &Storage,
        tenant_id: &str,
        campaign_id: &str,
    ) -> Result<Campaign> {
        storage
            .get_campaign(tenant_id, campaign_id)
            .await?
            .ok_or_else(|| TrustlineError::not_found("campaign", campaign_id))
    }

    /// READY → APPROVED.
    #[instrument(skip_all, fields(tenant = tenant_id, campaign = campaign_id))]
    pub async fn approve_campaign(
        &self,
        storage: &Storage,
        tenant_id: &str,
        campaign_id: &str,
    ) -> Result<Campaign> {
        let campaign = self.require_campaign(storage, tenant_id, campaign_id).await?;
        if campaign.status != CampaignStatus::Ready {
            return Err(TrustlineError::validation(format!(
                "campaign {campaign_id} is {}; only READY campaigns can be approved",
                campaign.status
            )));
        }
        storage
            .set_campaign_status(tenant_id, campaign_id, CampaignStatus::Approved, Utc::now())
            .await?;
        storage
            .append_receipt(
                tenant_id,
                NewReceipt::new(
                    ReceiptKind::Decide,
                    Actor::Operator,
                    format!("approved campaign {}", campaign.name),
                )
                .input(json!({ "campaign_id": campaign_id })),
            )
            .await?;
        self.require_campaign(storage, tenant_id, campaign_id).await
    }

    /// APPROVED → EXECUTED, re-checking the trust gate. Dry runs deliver
    /// nothing; real campaigns mark each eligible recipient referred.
    #[instrument(skip_all, fields(tenant = tenant_id, campaign = campaign_id))]
    pub async fn execute_campaign(
        &self,
        storage: &Storage,
        tenant_id: &str,
        campaign_id: &str,
    ) -> Result<ExecuteOutcome> {
        let campaign = self.require_campaign(storage, tenant_id, campaign_id).await?;
        if campaign.status != CampaignStatus::Approved {
            return Err(TrustlineError::validation(format!(
                "campaign {campaign_id} is {}; only APPROVED campaigns can be executed",
                campaign.status
            )));
        }

        let action = required_action(campaign.dry_run);
        let decision = self.policy.evaluate_latest(storage, tenant_id).await?;
        if !decision.allows(action) {
            self.suppress(
                storage,
                tenant_id,
                action,
                &decision,
                json!({ "campaign_id": campaign_id }),
            )
            .await?;
            return Ok(ExecuteOutcome::Blocked { action, decision });
        }

        let mut sent = Vec::new();
        if !campaign.dry_run {
            // recipients are the ones frozen at creation, minus anyone who no longer qualifies
            let frozen: BTreeSet<String> = storage
                .list_send_receipts(campaign_id)
                .await?
                .into_iter()
                .filter(|s| s.status == SendStatus::DryRun)
                .map(|s| s.address)
                .collect();
            let members = storage.list_audience(tenant_id).await?;
            let current = segment(&members, &campaign.rule);
            let skipped = frozen.len().saturating_sub(
                current
                    .eligible
                    .iter()
                    .filter(|m| frozen.contains(&m.address))
                    .count(),
            );
            if skipped > 0 {
                warn!(skipped, "recipients no longer eligible since creation");
            }
            for member in current
                .eligible
                .into_iter()
                .filter(|m| frozen.contains(&m.address))
            {
                storage.mark_referred(tenant_id, &member.address).await?;
                sent.push(NewSendReceipt {
                    address: member.address.clone(),
                    status: SendStatus::Sent,
                    reason: None,
                });
            }
            storage.insert_send_receipts(campaign_id, &sent).await?;
        }

        storage
            .set_campaign_status(tenant_id, campaign_id, CampaignStatus::Executed, Utc::now())
            .await?;
        info!(sent = sent.len(), dry_run = campaign.dry_run, "campaign executed");

        storage
            .append_receipt(
                tenant_id,
                NewReceipt::new(
                    ReceiptKind::Execute,
                    Actor::Delivery,
                    format!("executed campaign {} ({} sent)", campaign.name, sent.len()),
                )
                .input(json!({ "campaign_id": campaign_id, "dry_run": campaign.dry_run }))
                .output(json!({
                    "sent": sent.len(),
                    "zone": decision.zone,
                })),
            )
            .await?;

        let campaign = self.require_campaign(storage, tenant_id, campaign_id).await?;
        Ok(ExecuteOutcome::Executed {
            campaign,
            sent: sent.len(),
        })
    }

    /// Operator action: flag one customer as already referred.
    #[instrument(skip_all, fields(tenant = tenant_id))]
    pub async fn mark_referred(&self, storage: &Storage, tenant_id: &str, address: &str) -> Result<()> {
        storage.mark_referred(tenant_id, address).await?;
        storage
            .append_receipt(
                tenant_id,
                NewReceipt::new(
                    ReceiptKind::Execute,
                    Actor::Operator,
                    format!("marked {} referred", address.trim()),
                )
                .input(json!({ "address": address.trim() })),
            )
            .await?;
        Ok(())
    }
}
