//! Service facade used by the CLI (and any other front end).
//!
//! Every entry point takes a tenant domain. Expected refusals (unknown ids,
//! invalid transitions, safety-gate and policy blocks) come back as an
//! [`ActionResult`] with `ok: false`; infrastructure failures are errors.

use std::cmp::Reverse;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use trustline_shared::{
    Actor, AppConfig, Campaign, NewReceipt, Receipt, ReceiptKind, Recommendation,
    RecommendationStatus, Result, Tenant, TrustlineError,
};
use trustline_storage::Storage;

use crate::draft::{DraftGenerator, draft_recommendation};
use crate::growth::{ExecuteOutcome, GrowthEngine};
use crate::import::{ImportSummary, TenantImport, import_tenant};
use crate::llm::LlmClient;
use crate::orchestrator::{Command, CommandResponse, Orchestrator, ProgressReporter};
use crate::policy::TrustPolicy;
use crate::publish::{DeliveryClient, PublishOutcome, Publisher};

/// Outcome of a single operator action.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_claims: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionResult {
    pub fn success(status: impl ToString) -> Self {
        Self {
            ok: true,
            status: Some(status.to_string()),
            ..Self::default()
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Map an expected refusal to a result. Infrastructure errors are handed back.
    pub fn from_error(err: TrustlineError) -> Result<Self> {
        match err {
            TrustlineError::NeedsVerification { markers } => Ok(Self {
                ok: false,
                error: Some("needs_verification".into()),
                message: Some(format!("needs verification: {}", markers.join(", "))),
                missing_claims: Some(markers),
                ..Self::default()
            }),
            e @ (TrustlineError::NotFound { .. }
            | TrustlineError::Validation { .. }
            | TrustlineError::PolicyBlocked { .. }) => Ok(Self {
                ok: false,
                error: Some(e.code().into()),
                message: Some(e.to_string()),
                ..Self::default()
            }),
            other => Err(other),
        }
    }
}

fn settle(result: Result<ActionResult>) -> Result<ActionResult> {
    result.or_else(ActionResult::from_error)
}

pub struct TrustlineService {
    storage: Storage,
    config: AppConfig,
    generator: DraftGenerator,
    publisher: Publisher,
    growth: GrowthEngine,
    orchestrator: Orchestrator,
}

impl TrustlineService {
    /// Wire components from config. Invalid thresholds or a missing model
    /// key are `Config` errors.
    pub fn new(storage: Storage, config: AppConfig) -> Result<Self> {
        let policy = TrustPolicy::new(config.policy)?;
        let generator = DraftGenerator::new(LlmClient::from_config(&config.llm)?);
        let publisher = Publisher::new(DeliveryClient::from_config(&config.publish_target)?);
        let growth = GrowthEngine::new(policy, config.growth);
        let orchestrator = Orchestrator::new(
            config.classifier,
            config.orchestrator,
            policy,
            generator.clone(),
            growth,
        );
        Ok(Self {
            storage,
            config,
            generator,
            publisher,
            growth,
            orchestrator,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    async fn tenant(&self, domain: &str) -> Result<Tenant> {
        self.storage.require_tenant(domain.trim()).await
    }

    pub async fn import(&self, import: &TenantImport) -> Result<ImportSummary> {
        import_tenant(&self.storage, import).await
    }

    #[instrument(skip_all, fields(tenant = tenant_domain, %command))]
    pub async fn run_command(
        &self,
        tenant_domain: &str,
        command: Command,
        free_text: Option<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<CommandResponse> {
        let tenant = self.tenant(tenant_domain).await?;
        self.orchestrator
            .run(&self.storage, tenant, command, free_text, progress)
            .await
    }

    /// Recommendations by action priority, then impact, then slug.
    pub async fn list_recommendations(&self, tenant_domain: &str) -> Result<Vec<Recommendation>> {
        let tenant = self.tenant(tenant_domain).await?;
        let mut recs = self.storage.list_recommendations(&tenant.id).await?;
        recs.sort_by(|a, b| {
            (a.action.priority(), Reverse(a.impact_score), &a.stable_slug).cmp(&(
                b.action.priority(),
                Reverse(b.impact_score),
                &b.stable_slug,
            ))
        });
        Ok(recs)
    }

    pub async fn list_receipts(&self, tenant_domain: &str, limit: usize) -> Result<Vec<Receipt>> {
        let tenant = self.tenant(tenant_domain).await?;
        self.storage.list_receipts(&tenant.id, limit).await
    }

    pub async fn list_campaigns(&self, tenant_domain: &str) -> Result<Vec<Campaign>> {
        let tenant = self.tenant(tenant_domain).await?;
        self.storage.list_campaigns(&tenant.id).await
    }

    pub async fn draft(&self, tenant_domain: &str, recommendation_id: &str) -> Result<ActionResult> {
        settle(self.try_draft(tenant_domain, recommendation_id).await)
    }

    /// DRAFTED → APPROVED. Approving an already approved draft is a no-op.
    /// The gate runs at publish, not here.
    pub async fn approve(&self, tenant_domain: &str, recommendation_id: &str) -> Result<ActionResult> {
        settle(self.try_approve(tenant_domain, recommendation_id).await)
    }

    pub async fn publish(&self, tenant_domain: &str, recommendation_id: &str) -> Result<ActionResult> {
        settle(self.try_publish(tenant_domain, recommendation_id).await)
    }

    pub async fn approve_campaign(&self, tenant_domain: &str, campaign_id: &str) -> Result<ActionResult> {
        settle(self.try_approve_campaign(tenant_domain, campaign_id).await)
    }

    pub async fn execute_campaign(&self, tenant_domain: &str, campaign_id: &str) -> Result<ActionResult> {
        settle(self.try_execute_campaign(tenant_domain, campaign_id).await)
    }

    pub async fn mark_referred(&self, tenant_domain: &str, address: &str) -> Result<ActionResult> {
        settle(self.try_mark_referred(tenant_domain, address).await)
    }

    // -----------------------------------------------------------------------
    // Fallible bodies; `settle` turns expected refusals into results
    // -----------------------------------------------------------------------

    async fn try_draft(&self, tenant_domain: &str, recommendation_id: &str) -> Result<ActionResult> {
        let tenant = self.tenant(tenant_domain).await?;
        let rec =
            draft_recommendation(&self.storage, &self.generator, &tenant.id, recommendation_id)
                .await?
                .recommendation;
        let markers = rec
            .draft
            .as_ref()
            .map(|d| d.verification.clone())
            .unwrap_or_default();
        let mut result = ActionResult::success(rec.status);
        if !markers.is_empty() {
            result.message = Some("draft has unverified facts".into());
            result.missing_claims = Some(markers);
        }
        Ok(result)
    }

    #[instrument(skip_all, fields(tenant = tenant_domain, recommendation = recommendation_id))]
    async fn try_approve(&self, tenant_domain: &str, recommendation_id: &str) -> Result<ActionResult> {
        let tenant = self.tenant(tenant_domain).await?;
        let rec = self
            .storage
            .require_recommendation(&tenant.id, recommendation_id)
            .await?;
        if rec.draft.is_none() {
            return Err(TrustlineError::validation(format!(
                "recommendation {} has no draft to approve",
                rec.stable_slug
            )));
        }
        match rec.status {
            RecommendationStatus::Approved => return Ok(ActionResult::success(rec.status)),
            RecommendationStatus::Drafted => {}
            other => {
                return Err(TrustlineError::validation(format!(
                    "recommendation {} is {other}; only DRAFTED recommendations can be approved",
                    rec.stable_slug
                )));
            }
        }

        self.storage
            .set_recommendation_status(&tenant.id, recommendation_id, RecommendationStatus::Approved)
            .await?;
        self.storage
            .append_receipt(
                &tenant.id,
                NewReceipt::new(
                    ReceiptKind::Decide,
                    Actor::Operator,
                    format!("approved {}", rec.stable_slug),
                )
                .input(json!({ "recommendation_id": recommendation_id })),
            )
            .await?;
        info!(slug = %rec.stable_slug, "recommendation approved");
        Ok(ActionResult::success(RecommendationStatus::Approved))
    }

    async fn try_publish(&self, tenant_domain: &str, recommendation_id: &str) -> Result<ActionResult> {
        let tenant = self.tenant(tenant_domain).await?;
        let outcome = self
            .publisher
            .publish(&self.storage, &tenant.id, recommendation_id)
            .await?;
        match outcome {
            PublishOutcome::Published {
                recommendation,
                target,
                delivery,
            } => Ok(ActionResult::success(recommendation.status)
                .with_data(json!({ "target": target, "delivery": delivery }))),
            PublishOutcome::Blocked { markers } => Err(TrustlineError::NeedsVerification { markers }),
        }
    }

    async fn try_approve_campaign(&self, tenant_domain: &str, campaign_id: &str) -> Result<ActionResult> {
        let tenant = self.tenant(tenant_domain).await?;
        let campaign = self
            .growth
            .approve_campaign(&self.storage, &tenant.id, campaign_id)
            .await?;
        Ok(ActionResult::success(campaign.status))
    }

    async fn try_execute_campaign(&self, tenant_domain: &str, campaign_id: &str) -> Result<ActionResult> {
        let tenant = self.tenant(tenant_domain).await?;
        let outcome = self
            .growth
            .execute_campaign(&self.storage, &tenant.id, campaign_id)
            .await?;
        match outcome {
            ExecuteOutcome::Executed { campaign, sent } => {
                Ok(ActionResult::success(campaign.status).with_data(json!({ "sent": sent })))
            }
            ExecuteOutcome::Blocked { action, decision } => Err(TrustlineError::PolicyBlocked {
                zone: decision.zone.to_string(),
                action: action.to_string(),
            }),
        }
    }

    async fn try_mark_referred(&self, tenant_domain: &str, address: &str) -> Result<ActionResult> {
        let tenant = self.tenant(tenant_domain).await?;
        self.growth
            .mark_referred(&self.storage, &tenant.id, address)
            .await?;
        Ok(ActionResult::success("REFERRED"))
    }
}

#[cfg(test)]
mod tests {
    use trustline_shared::Action;

    use crate::orchestrator::SilentProgress;
    use crate::testing::*;

    use super::*;

    const DOMAIN: &str = "shop.example.com";

    async fn service() -> TrustlineService {
        let service = TrustlineService::new(test_storage().await, AppConfig::default()).unwrap();
        service.import(&fixture_import()).await.unwrap();
        service
    }

    async fn rec_for(service: &TrustlineService, question: &str) -> Recommendation {
        let tenant = service.storage().require_tenant(DOMAIN).await.unwrap();
        let q = find_question(service.storage(), &tenant.id, question).await;
        service
            .list_recommendations(DOMAIN)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.question_id.as_deref() == Some(q.id.as_str()))
            .unwrap()
    }

    #[tokio::test]
    async fn full_flow_from_fix_gaps_to_publish() {
        let service = service().await;
        let response = service
            .run_command(DOMAIN, Command::FixGaps, None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(response.trace.len(), 5);

        let recs = service.list_recommendations(DOMAIN).await.unwrap();
        assert_eq!(recs.len(), 4);
        assert!(recs[0].action.is_actionable());
        assert_eq!(recs.last().unwrap().action, Action::Defer);

        let shipping = rec_for(&service, SHIPPING_QUESTION).await;
        let approved = service.approve(DOMAIN, &shipping.id).await.unwrap();
        assert!(approved.ok);
        assert_eq!(approved.status.as_deref(), Some("APPROVED"));

        let published = service.publish(DOMAIN, &shipping.id).await.unwrap();
        assert!(published.ok, "{published:?}");
        assert_eq!(published.status.as_deref(), Some("PUBLISHED"));

        let receipts = service.list_receipts(DOMAIN, 1).await.unwrap();
        assert_eq!(receipts[0].kind, ReceiptKind::Publish);
    }

    #[tokio::test]
    async fn blocked_publish_reports_missing_claims() {
        let service = service().await;
        service
            .run_command(DOMAIN, Command::FixGaps, None, &SilentProgress)
            .await
            .unwrap();

        let returns = rec_for(&service, RETURNS_QUESTION).await;
        assert!(service.approve(DOMAIN, &returns.id).await.unwrap().ok);
        let result = service.publish(DOMAIN, &returns.id).await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("needs_verification"));
        assert_eq!(result.missing_claims, Some(vec!["restocking fee".to_string()]));
    }

    #[tokio::test]
    async fn refusals_are_results_not_errors() {
        let service = service().await;
        service
            .run_command(DOMAIN, Command::TrustAudit, None, &SilentProgress)
            .await
            .unwrap();

        // classified but not drafted yet
        let tenant = service.storage().require_tenant(DOMAIN).await.unwrap();
        crate::classifier::classify(service.storage(), &tenant, &service.config().classifier)
            .await
            .unwrap();
        let shipping = rec_for(&service, SHIPPING_QUESTION).await;
        let no_draft = service.approve(DOMAIN, &shipping.id).await.unwrap();
        assert!(!no_draft.ok);
        assert_eq!(no_draft.error.as_deref(), Some("validation_error"));

        let missing = service.publish(DOMAIN, "nope").await.unwrap();
        assert_eq!(missing.error.as_deref(), Some("not_found"));

        let unknown = service.mark_referred(DOMAIN, "ghost@example.com").await.unwrap();
        assert_eq!(unknown.error.as_deref(), Some("customer_not_found"));

        let err = service
            .run_command("unknown.example.org", Command::Status, None, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn invalid_policy_is_config_error() {
        let mut config = AppConfig::default();
        config.policy.caution_min = 90;
        config.policy.safe_min = 80;
        let storage = test_storage().await;
        let err = TrustlineService::new(storage, config).err().unwrap();
        assert_eq!(err.code(), "config_error");
    }
}
