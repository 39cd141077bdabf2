//! Publish pipeline: gate, persist to the target surface, mark the demand
//! signal answered, and optionally notify an external target.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use trustline_shared::{
    Actor, DraftContent, NewReceipt, PublishTargetConfig, QuestionState, ReceiptKind,
    Recommendation, RecommendationStatus, Result, Surface, TrustlineError,
};
use trustline_storage::{AssetWrite, Storage};

use crate::gate::{self, GateVerdict};

const USER_AGENT: &str = concat!("Trustline/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// External delivery
// ---------------------------------------------------------------------------

/// Posts published content to an external target (webhook, storefront sync).
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl DeliveryClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TrustlineError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
        })
    }

    /// `None` when no `[publish_target] url` is configured.
    pub fn from_config(config: &PublishTargetConfig) -> Result<Option<Self>> {
        match config.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                url::Url::parse(url).map_err(|e| {
                    TrustlineError::config(format!("publish_target.url is invalid: {e}"))
                })?;
                Self::new(url, Duration::from_secs(config.timeout_secs)).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// POST one JSON document. Non-2xx and timeouts are upstream errors.
    pub async fn deliver(&self, payload: &Value) -> Result<u16> {
        let send = self.client.post(&self.url).json(payload).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                TrustlineError::Upstream(format!("delivery timed out after {:?}", self.timeout))
            })?
            .map_err(|e| TrustlineError::Upstream(format!("delivery failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrustlineError::Upstream(format!("delivery returned HTTP {status}")));
        }
        Ok(status.as_u16())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Where a publish landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishedTarget {
    Asset {
        asset_id: String,
        slug: String,
        version: u32,
    },
    ProductPatch {
        product_handle: String,
        slug: String,
        revision: u32,
    },
}

impl PublishedTarget {
    fn label(&self) -> String {
        match self {
            Self::Asset { slug, version, .. } => format!("{slug} v{version}"),
            Self::ProductPatch {
                product_handle,
                revision,
                ..
            } => format!("{product_handle} r{revision}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published {
        recommendation: Recommendation,
        target: PublishedTarget,
        #[serde(skip_serializing_if = "Option::is_none")]
        delivery: Option<DeliveryReport>,
    },
    /// The safety gate found unresolved markers; nothing was written but a receipt.
    Blocked { markers: Vec<String> },
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Publisher {
    delivery: Option<DeliveryClient>,
}

impl Publisher {
    pub fn new(delivery: Option<DeliveryClient>) -> Self {
        Self { delivery }
    }

    /// Publish an APPROVED (or already PUBLISHED) recommendation.
    ///
    /// Every attempt that reaches the gate appends exactly one PUBLISH or
    /// SUPPRESS receipt. A configured delivery target adds one EXECUTE
    /// receipt; its failure never undoes the publish.
    #[instrument(skip_all, fields(tenant = tenant_id, recommendation = recommendation_id))]
    pub async fn publish(
        &self,
        storage: &Storage,
        tenant_id: &str,
        recommendation_id: &str,
    ) -> Result<PublishOutcome> {
        let recommendation = storage
            .require_recommendation(tenant_id, recommendation_id)
            .await?;
        if !matches!(
            recommendation.status,
            RecommendationStatus::Approved | RecommendationStatus::Published
        ) {
            return Err(TrustlineError::validation(format!(
                "recommendation {} is {}; only APPROVED recommendations can be published",
                recommendation.stable_slug, recommendation.status
            )));
        }
        let Some(draft) = recommendation.draft.clone() else {
            return Err(TrustlineError::validation(format!(
                "recommendation {} has no draft",
                recommendation.stable_slug
            )));
        };
        let slug = recommendation.stable_slug.clone();

        if let GateVerdict::Blocked { markers } = gate::check(&draft) {
            warn!(%slug, ?markers, "publish blocked by safety gate");
            storage
                .append_receipt(
                    tenant_id,
                    NewReceipt::new(
                        ReceiptKind::Suppress,
                        Actor::Publisher,
                        format!("blocked {slug}: needs verification"),
                    )
                    .input(json!({ "recommendation_id": recommendation_id }))
                    .output(json!({
                        "error": "needs_verification",
                        "markers": markers,
                    })),
                )
                .await?;
            return Ok(PublishOutcome::Blocked { markers });
        }

        let target = match recommendation.surface {
            Surface::Faq | Surface::Blog => {
                let payload = json!({
                    "content": draft.content,
                    "citations": draft.citations,
                    "origin": draft.origin,
                });
                let (asset, version) = storage
                    .publish_asset(
                        tenant_id,
                        &AssetWrite {
                            asset_type: recommendation.surface,
                            slug: &slug,
                            title: &draft.title(),
                            body: &draft.body,
                            payload: &payload,
                        },
                    )
                    .await?;
                PublishedTarget::Asset {
                    asset_id: asset.id,
                    slug: asset.slug,
                    version: version.version,
                }
            }
            Surface::Product => {
                let handle = product_handle(&recommendation, &draft.content);
                if storage.get_product(tenant_id, &handle).await?.is_none() {
                    storage
                        .append_receipt(
                            tenant_id,
                            NewReceipt::new(
                                ReceiptKind::Suppress,
                                Actor::Publisher,
                                format!("blocked {slug}: product {handle} not found"),
                            )
                            .input(json!({ "recommendation_id": recommendation_id }))
                            .output(json!({
                                "error": "product_not_found",
                                "product_handle": handle,
                            })),
                        )
                        .await?;
                    return Err(TrustlineError::not_found("product", handle));
                }
                let patch_body = json!({
                    "content": draft.content,
                    "body": draft.body,
                    "citations": draft.citations,
                });
                let patch = storage
                    .publish_product_patch(tenant_id, &handle, &slug, &patch_body)
                    .await?;
                PublishedTarget::ProductPatch {
                    product_handle: patch.product_handle,
                    slug: patch.slug,
                    revision: patch.revision,
                }
            }
        };

        if let Some(question_id) = &recommendation.question_id {
            storage
                .set_question_state(tenant_id, question_id, QuestionState::Answered)
                .await?;
            let cleared = storage.clear_gaps(tenant_id, question_id).await?;
            info!(question = %question_id, cleared, "question answered");
        }
        storage
            .set_recommendation_status(tenant_id, recommendation_id, RecommendationStatus::Published)
            .await?;

        info!(%slug, target = %target.label(), "published");
        storage
            .append_receipt(
                tenant_id,
                NewReceipt::new(
                    ReceiptKind::Publish,
                    Actor::Publisher,
                    format!("published {}", target.label()),
                )
                .input(json!({
                    "recommendation_id": recommendation_id,
                    "surface": recommendation.surface,
                }))
                .output(json!({
                    "target": target,
                    "question_id": recommendation.question_id,
                    "citations": draft.citations.len(),
                })),
            )
            .await?;

        let delivery = match &self.delivery {
            Some(client) => {
                let payload = json!({
                    "tenant_id": tenant_id,
                    "surface": recommendation.surface,
                    "slug": slug,
                    "title": draft.title(),
                    "body": draft.body,
                    "target": target,
                });
                Some(deliver(storage, client, tenant_id, &slug, &payload).await?)
            }
            None => None,
        };

        let recommendation = storage
            .require_recommendation(tenant_id, recommendation_id)
            .await?;
        Ok(PublishOutcome::Published {
            recommendation,
            target,
            delivery,
        })
    }
}

fn product_handle(recommendation: &Recommendation, content: &DraftContent) -> String {
    match (&recommendation.product_handle, content) {
        (Some(handle), _) => handle.clone(),
        (None, DraftContent::Product(product)) => product.handle.clone(),
        (None, _) => String::new(),
    }
}

async fn deliver(
    storage: &Storage,
    client: &DeliveryClient,
    tenant_id: &str,
    slug: &str,
    payload: &Value,
) -> Result<DeliveryReport> {
    let report = match client.deliver(payload).await {
        Ok(status) => DeliveryReport {
            ok: true,
            status: Some(status),
            error: None,
        },
        Err(e) => {
            warn!(%slug, error = %e, "delivery failed; publish stands");
            DeliveryReport {
                ok: false,
                status: None,
                error: Some(e.to_string()),
            }
        }
    };

    let summary = if report.ok {
        format!("delivered {slug}")
    } else {
        format!("delivery of {slug} failed")
    };
    storage
        .append_receipt(
            tenant_id,
            NewReceipt::new(ReceiptKind::Execute, Actor::Delivery, summary)
                .input(json!({ "url": client.url, "slug": slug }))
                .output(json!(report)),
        )
        .await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use trustline_shared::{
        Action, ClassifierConfig, Draft, DraftOrigin, FaqContent, ProposedRecommendation,
        ReceiptKind, marker,
    };
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::classifier::classify;
    use crate::draft::{DraftGenerator, draft_recommendation};
    use crate::knowledge::analyze_gaps;
    use crate::testing::*;

    use super::*;

    /// Seed, classify, draft and approve the recommendation for `question`.
    async fn approved(storage: &Storage, question: &str) -> (String, Recommendation) {
        let tenant = seed_tenant(storage).await;
        let config = ClassifierConfig::default();
        analyze_gaps(storage, &tenant.id, &config).await.unwrap();
        let outcome = classify(storage, &tenant, &config).await.unwrap();
        let q = find_question(storage, &tenant.id, question).await;
        let rec = outcome
            .recommendations
            .into_iter()
            .find(|r| r.question_id.as_deref() == Some(q.id.as_str()))
            .unwrap();
        draft_recommendation(storage, &DraftGenerator::default(), &tenant.id, &rec.id)
            .await
            .unwrap();
        storage
            .set_recommendation_status(&tenant.id, &rec.id, RecommendationStatus::Approved)
            .await
            .unwrap();
        let rec = storage.require_recommendation(&tenant.id, &rec.id).await.unwrap();
        (tenant.id, rec)
    }

    #[tokio::test]
    async fn publishing_twice_keeps_one_asset_with_two_versions() {
        let storage = test_storage().await;
        let (tenant_id, rec) = approved(&storage, SHIPPING_QUESTION).await;
        let publisher = Publisher::default();

        let first = publisher.publish(&storage, &tenant_id, &rec.id).await.unwrap();
        let PublishOutcome::Published { recommendation, target, delivery } = first else {
            panic!("expected publish");
        };
        assert_eq!(recommendation.status, RecommendationStatus::Published);
        assert!(delivery.is_none());
        assert!(matches!(target, PublishedTarget::Asset { version: 1, .. }));

        let second = publisher.publish(&storage, &tenant_id, &rec.id).await.unwrap();
        assert!(matches!(
            second,
            PublishOutcome::Published {
                target: PublishedTarget::Asset { version: 2, .. },
                ..
            }
        ));

        let assets = storage.list_assets(&tenant_id).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].slug, rec.stable_slug);
        assert_eq!(storage.list_asset_versions(&assets[0].id).await.unwrap().len(), 2);

        let question = find_question(&storage, &tenant_id, SHIPPING_QUESTION).await;
        assert_eq!(question.state, QuestionState::Answered);
        assert!(
            storage
                .list_gaps(&tenant_id)
                .await
                .unwrap()
                .iter()
                .all(|g| g.question_id != question.id)
        );
        let publishes = storage
            .list_receipts(&tenant_id, 50)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == ReceiptKind::Publish)
            .count();
        assert_eq!(publishes, 2);
    }

    #[tokio::test]
    async fn marker_blocks_publish_with_one_suppress_receipt() {
        let storage = test_storage().await;
        let (tenant_id, rec) = approved(&storage, SHIPPING_QUESTION).await;
        let answer = format!("Returns are accepted within {}.", marker("returns window"));
        let draft = Draft::new(
            DraftContent::Faq(FaqContent {
                question: SHIPPING_QUESTION.into(),
                answer: answer.clone(),
            }),
            answer,
            vec![],
            DraftOrigin::Fallback {
                reason: "llm_disabled".into(),
            },
        );
        storage.save_draft(&tenant_id, &rec.id, &draft).await.unwrap();
        storage
            .set_recommendation_status(&tenant_id, &rec.id, RecommendationStatus::Approved)
            .await
            .unwrap();

        let before = storage.count_receipts(&tenant_id).await.unwrap();
        let outcome = Publisher::default()
            .publish(&storage, &tenant_id, &rec.id)
            .await
            .unwrap();
        let PublishOutcome::Blocked { markers } = outcome else {
            panic!("expected block");
        };
        assert_eq!(markers, vec!["returns window".to_string()]);

        assert_eq!(storage.count_receipts(&tenant_id).await.unwrap(), before + 1);
        let latest = &storage.list_receipts(&tenant_id, 1).await.unwrap()[0];
        assert_eq!(latest.kind, ReceiptKind::Suppress);
        assert_eq!(latest.output["error"], "needs_verification");
        assert!(storage.list_assets(&tenant_id).await.unwrap().is_empty());
        let unchanged = storage.require_recommendation(&tenant_id, &rec.id).await.unwrap();
        assert_eq!(unchanged.status, RecommendationStatus::Approved);
    }

    #[tokio::test]
    async fn unapproved_recommendation_is_rejected() {
        let storage = test_storage().await;
        let (tenant_id, rec) = approved(&storage, SHIPPING_QUESTION).await;
        storage
            .set_recommendation_status(&tenant_id, &rec.id, RecommendationStatus::Drafted)
            .await
            .unwrap();
        let err = Publisher::default()
            .publish(&storage, &tenant_id, &rec.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn product_patch_publish_and_missing_product() {
        let storage = test_storage().await;
        let (tenant_id, rec) = approved(&storage, PRODUCT_QUESTION).await;
        assert_eq!(rec.surface, Surface::Product);

        let outcome = Publisher::default()
            .publish(&storage, &tenant_id, &rec.id)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PublishOutcome::Published {
                target: PublishedTarget::ProductPatch { revision: 1, .. },
                ..
            }
        ));
        let patch = storage
            .get_product_patch(&tenant_id, "linen-shirt")
            .await
            .unwrap()
            .unwrap();
        assert!(patch.published_at.is_some());

        let ghost = storage
            .upsert_recommendation(
                &tenant_id,
                &ProposedRecommendation {
                    action: Action::Create,
                    surface: Surface::Product,
                    stable_slug: "product-ghost".into(),
                    question_id: None,
                    product_handle: Some("ghost-shirt".into()),
                    reason: "test".into(),
                    impact_score: 60,
                },
            )
            .await
            .unwrap();
        let draft = rec.draft.clone().unwrap();
        storage.save_draft(&tenant_id, &ghost.id, &draft).await.unwrap();
        storage
            .set_recommendation_status(&tenant_id, &ghost.id, RecommendationStatus::Approved)
            .await
            .unwrap();
        let err = Publisher::default()
            .publish(&storage, &tenant_id, &ghost.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "product_not_found");
        let latest = &storage.list_receipts(&tenant_id, 1).await.unwrap()[0];
        assert_eq!(latest.kind, ReceiptKind::Suppress);
    }

    #[tokio::test]
    async fn delivery_success_is_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/publish"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let (tenant_id, rec) = approved(&storage, SHIPPING_QUESTION).await;
        let client = DeliveryClient::new(
            &format!("{}/hooks/publish", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();

        let outcome = Publisher::new(Some(client))
            .publish(&storage, &tenant_id, &rec.id)
            .await
            .unwrap();
        let PublishOutcome::Published { delivery, .. } = outcome else {
            panic!("expected publish");
        };
        assert_eq!(delivery.unwrap().status, Some(202));

        let receipts = storage.list_receipts(&tenant_id, 2).await.unwrap();
        assert_eq!(receipts[0].kind, ReceiptKind::Execute);
        assert_eq!(receipts[0].actor, Actor::Delivery);
        assert_eq!(receipts[1].kind, ReceiptKind::Publish);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_roll_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let (tenant_id, rec) = approved(&storage, SHIPPING_QUESTION).await;
        let client = DeliveryClient::new(&server.uri(), Duration::from_secs(2)).unwrap();

        let outcome = Publisher::new(Some(client))
            .publish(&storage, &tenant_id, &rec.id)
            .await
            .unwrap();
        let PublishOutcome::Published { recommendation, delivery, .. } = outcome else {
            panic!("expected publish");
        };
        assert_eq!(recommendation.status, RecommendationStatus::Published);
        let delivery = delivery.unwrap();
        assert!(!delivery.ok);
        assert!(delivery.error.unwrap().contains("503"));
        assert_eq!(storage.list_assets(&tenant_id).await.unwrap().len(), 1);
        let latest = &storage.list_receipts(&tenant_id, 1).await.unwrap()[0];
        assert_eq!(latest.output["ok"], false);
    }

    #[test]
    fn delivery_config() {
        assert!(
            DeliveryClient::from_config(&PublishTargetConfig::default())
                .unwrap()
                .is_none()
        );
        let bad = PublishTargetConfig {
            url: Some("not a url".into()),
            timeout_secs: 5,
        };
        assert_eq!(DeliveryClient::from_config(&bad).unwrap_err().code(), "config_error");
    }
}
