//! Draft generation for actionable recommendations.
//!
//! Drafts are written only from verified claims (claims with evidence).
//! Every required fact without one is rendered as a verification marker so
//! the safety gate can stop it at publish time. When a model is configured
//! its output is validated here; on any failure the deterministic template
//! is used instead and labelled as a fallback.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use trustline_shared::{
    Actor, BlogContent, BlogSection, Citation, Draft, DraftContent, DraftOrigin, FaqContent,
    NewReceipt, Product, ProductContent, Question, Receipt, ReceiptKind, Recommendation, Result,
    Surface, Taxonomy, TruthBlockContent, TruthFact, TrustlineError, VerifiedClaim,
    extract_markers, marker, marker_label,
};
use trustline_storage::Storage;

use crate::classifier::PRODUCT_ATTRIBUTES;
use crate::llm::LlmClient;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Which draft schema a recommendation gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftKind {
    Faq,
    Blog,
    Product,
    TruthBlock,
}

impl DraftKind {
    /// Policy questions on the FAQ surface become a block of verified facts.
    pub fn for_recommendation(surface: Surface, taxonomy: Option<Taxonomy>) -> Self {
        match (surface, taxonomy) {
            (Surface::Faq, Some(Taxonomy::Policy)) => Self::TruthBlock,
            (Surface::Faq, _) => Self::Faq,
            (Surface::Blog, _) => Self::Blog,
            (Surface::Product, _) => Self::Product,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Faq => "FAQ",
            Self::Blog => "BLOG",
            Self::Product => "PRODUCT",
            Self::TruthBlock => "TRUTH_BLOCK",
        }
    }

    fn schema_hint(&self) -> &'static str {
        match self {
            Self::Faq => r#"{"question": string, "answer": string}"#,
            Self::Blog => {
                r#"{"title": string, "sections": [{"heading": string, "body": string}]}"#
            }
            Self::Product => {
                r#"{"handle": string, "title": string, "attributes": {string: string}}"#
            }
            Self::TruthBlock => {
                r#"{"facts": [{"key": string, "value": string, "source_url": string}]}"#
            }
        }
    }
}

/// Everything the generator may use for one recommendation.
#[derive(Debug, Clone)]
pub struct DraftInputs {
    pub recommendation: Recommendation,
    pub kind: DraftKind,
    pub question: Option<Question>,
    pub product: Option<Product>,
    /// Verified claims the draft may state, ordered by key.
    pub facts: Vec<VerifiedClaim>,
    /// Keys of required facts with no verified claim.
    pub missing: Vec<String>,
}

impl DraftInputs {
    fn heading(&self) -> String {
        match (&self.question, &self.product) {
            (Some(q), _) => q.text.clone(),
            (None, Some(p)) => p.title.clone(),
            (None, None) => self.recommendation.stable_slug.clone(),
        }
    }

    fn evidence_urls(&self) -> BTreeSet<&str> {
        self.facts
            .iter()
            .flat_map(|f| f.evidence.iter().map(|e| e.url.as_str()))
            .collect()
    }

    fn missing_labels(&self) -> Vec<String> {
        self.missing.iter().map(|k| marker_label(k)).collect()
    }
}

/// Gather draft inputs for a recommendation from the knowledge store.
pub async fn load_inputs(
    storage: &Storage,
    tenant_id: &str,
    recommendation: Recommendation,
) -> Result<DraftInputs> {
    let question = match &recommendation.question_id {
        Some(id) => storage.get_question(tenant_id, id).await?,
        None => None,
    };
    let product = match &recommendation.product_handle {
        Some(handle) => storage.get_product(tenant_id, handle).await?,
        None => None,
    };
    let claims = storage.verified_claims(tenant_id).await?;

    let mut fact_keys = BTreeSet::new();
    let mut missing = Vec::new();
    if let Some(q) = &question {
        for need in storage
            .list_needs(tenant_id)
            .await?
            .into_iter()
            .filter(|n| n.question_id == q.id)
        {
            match claims.get(&need.claim_key) {
                Some(c) if c.has_proof() => {
                    fact_keys.insert(need.claim_key);
                }
                _ if need.required => missing.push(need.claim_key),
                _ => {}
            }
        }
    }
    if recommendation.surface == Surface::Product {
        for (key, claim) in &claims {
            let is_attribute = PRODUCT_ATTRIBUTES
                .iter()
                .any(|a| key == a || key.starts_with(&format!("{a}_")));
            if is_attribute && claim.has_proof() {
                fact_keys.insert(key.clone());
            }
        }
    }

    let facts = fact_keys
        .iter()
        .filter_map(|k| claims.get(k).cloned())
        .collect();
    let kind = DraftKind::for_recommendation(
        recommendation.surface,
        question.as_ref().map(|q| q.taxonomy),
    );

    Ok(DraftInputs {
        recommendation,
        kind,
        question,
        product,
        facts,
        missing,
    })
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn first_url(fact: &VerifiedClaim) -> &str {
    fact.evidence.first().map(|e| e.url.as_str()).unwrap_or_default()
}

/// Render the text downstream renderers see.
pub fn render_body(content: &DraftContent) -> String {
    match content {
        DraftContent::Faq(faq) => format!("{}\n\n{}", faq.question, faq.answer),
        DraftContent::Blog(blog) => {
            let mut out = format!("# {}", blog.title);
            for section in &blog.sections {
                out.push_str(&format!("\n\n## {}\n\n{}", section.heading, section.body));
            }
            out
        }
        DraftContent::Product(product) => {
            let mut out = product.title.clone();
            for (attr, value) in &product.attributes {
                out.push_str(&format!("\n- {}: {value}", marker_label(attr)));
            }
            out
        }
        DraftContent::TruthBlock(block) => {
            let mut out = String::from("Verified facts");
            for fact in &block.facts {
                out.push_str(&format!(
                    "\n- {}: {} ({})",
                    marker_label(&fact.key),
                    fact.value,
                    fact.source_url
                ));
            }
            out
        }
    }
}

/// Render the body and make sure every missing fact appears as a marker.
fn finish(
    content: DraftContent,
    citations: Vec<Citation>,
    origin: DraftOrigin,
    missing_labels: &[String],
) -> Draft {
    let mut body = render_body(&content);
    let present = extract_markers(&body);
    let absent: Vec<String> = missing_labels
        .iter()
        .filter(|l| !present.contains(l))
        .map(|l| marker(l))
        .collect();
    if !absent.is_empty() {
        body.push_str("\n\nTo be confirmed: ");
        body.push_str(&absent.join(" "));
    }
    Draft::new(content, body, citations, origin)
}

fn template_citations(inputs: &DraftInputs) -> Vec<Citation> {
    inputs
        .facts
        .iter()
        .filter_map(|f| {
            f.evidence.first().map(|e| Citation {
                claim_key: f.claim.key.clone(),
                url: e.url.clone(),
                snippet: e.snippet.clone(),
            })
        })
        .collect()
}

/// Deterministic draft built only from the supplied facts.
pub fn template_draft(inputs: &DraftInputs, reason: &str) -> Draft {
    let labels = inputs.missing_labels();
    let content = match inputs.kind {
        DraftKind::Faq => {
            let mut sentences: Vec<String> = inputs
                .facts
                .iter()
                .map(|f| format!("{}: {}.", capitalize(&marker_label(&f.claim.key)), f.claim.value))
                .collect();
            sentences.extend(
                labels
                    .iter()
                    .map(|l| format!("{}: {}.", capitalize(l), marker(l))),
            );
            if sentences.is_empty() {
                sentences.push("We are confirming the details for this question.".into());
            }
            DraftContent::Faq(FaqContent {
                question: inputs.heading(),
                answer: sentences.join(" "),
            })
        }
        DraftKind::Blog => {
            let mut sections: Vec<BlogSection> = inputs
                .facts
                .iter()
                .map(|f| BlogSection {
                    heading: capitalize(&marker_label(&f.claim.key)),
                    body: format!("{}. Source: {}", f.claim.value, first_url(f)),
                })
                .collect();
            if !labels.is_empty() {
                sections.push(BlogSection {
                    heading: "Still being confirmed".into(),
                    body: labels.iter().map(|l| marker(l)).collect::<Vec<_>>().join(" "),
                });
            }
            DraftContent::Blog(BlogContent {
                title: inputs.heading(),
                sections,
            })
        }
        DraftKind::Product => {
            let mut attributes = BTreeMap::new();
            if let Some(product) = &inputs.product {
                for (key, value) in &product.specs {
                    let key = key.to_lowercase();
                    if PRODUCT_ATTRIBUTES.contains(&key.as_str()) && !value.trim().is_empty() {
                        attributes.insert(key, value.clone());
                    }
                }
            }
            for fact in &inputs.facts {
                attributes
                    .entry(fact.claim.key.clone())
                    .or_insert_with(|| fact.claim.value.clone());
            }
            for (key, label) in inputs.missing.iter().zip(&labels) {
                attributes.entry(key.clone()).or_insert_with(|| marker(label));
            }
            DraftContent::Product(ProductContent {
                handle: product_handle(inputs),
                title: inputs
                    .product
                    .as_ref()
                    .map(|p| p.title.clone())
                    .unwrap_or_else(|| inputs.heading()),
                attributes,
            })
        }
        DraftKind::TruthBlock => DraftContent::TruthBlock(TruthBlockContent {
            facts: inputs
                .facts
                .iter()
                .map(|f| TruthFact {
                    key: f.claim.key.clone(),
                    value: f.claim.value.clone(),
                    source_url: first_url(f).to_string(),
                })
                .collect(),
        }),
    };

    finish(
        content,
        template_citations(inputs),
        DraftOrigin::Fallback {
            reason: reason.to_string(),
        },
        &labels,
    )
}

fn product_handle(inputs: &DraftInputs) -> String {
    inputs
        .recommendation
        .product_handle
        .clone()
        .or_else(|| inputs.product.as_ref().map(|p| p.handle.clone()))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Model output validation
// ---------------------------------------------------------------------------

fn prompts(inputs: &DraftInputs) -> (String, String) {
    let system = format!(
        "You write {kind} content for an online store. Use only the facts provided. \
         Never invent facts, numbers or URLs. For every item listed under `unverified`, \
         write the token [NEEDS_VERIFICATION: <item>] exactly where that fact would go. \
         Reply with one JSON object: {{\"content\": {schema}, \"citations\": \
         [{{\"claim_key\": string, \"url\": string}}]}}. Citations may only use the given URLs.",
        kind = inputs.kind.tag(),
        schema = inputs.kind.schema_hint(),
    );
    let facts: Vec<Value> = inputs
        .facts
        .iter()
        .map(|f| {
            json!({
                "key": f.claim.key,
                "value": f.claim.value,
                "urls": f.evidence.iter().map(|e| &e.url).collect::<Vec<_>>(),
            })
        })
        .collect();
    let user = json!({
        "topic": inputs.heading(),
        "product_handle": inputs.recommendation.product_handle,
        "facts": facts,
        "unverified": inputs.missing_labels(),
    })
    .to_string();
    (system, user)
}

/// Validate a model reply against the expected schema and the supplied facts.
pub fn validate_model_output(inputs: &DraftInputs, reply: &Value, model: &str) -> Result<Draft> {
    let mut content_value = reply
        .get("content")
        .cloned()
        .ok_or_else(|| TrustlineError::validation("model reply has no `content`"))?;
    let object = content_value
        .as_object_mut()
        .ok_or_else(|| TrustlineError::validation("model `content` is not an object"))?;
    object.insert("kind".into(), Value::String(inputs.kind.tag().into()));

    let mut content: DraftContent = serde_json::from_value(content_value).map_err(|e| {
        TrustlineError::validation(format!(
            "model content does not match {} schema: {e}",
            inputs.kind.tag()
        ))
    })?;
    if let DraftContent::Product(product) = &mut content {
        product.handle = product_handle(inputs);
    }

    let allowed = inputs.evidence_urls();
    let known_keys: BTreeSet<&str> = inputs.facts.iter().map(|f| f.claim.key.as_str()).collect();
    let mut citations = Vec::new();
    if let Some(items) = reply.get("citations").and_then(Value::as_array) {
        for item in items {
            let key = item.get("claim_key").and_then(Value::as_str).unwrap_or_default();
            let url = item.get("url").and_then(Value::as_str).unwrap_or_default();
            if allowed.contains(url) && known_keys.contains(key) {
                citations.push(Citation {
                    claim_key: key.to_string(),
                    url: url.to_string(),
                    snippet: None,
                });
            } else {
                warn!(url, key, "dropping citation outside supplied evidence");
            }
        }
    }

    Ok(finish(
        content,
        citations,
        DraftOrigin::Model {
            model: model.to_string(),
        },
        &inputs.missing_labels(),
    ))
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// A draft plus the reason the model was not used, if it was not.
#[derive(Debug, Clone)]
pub struct GeneratedDraft {
    pub draft: Draft,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DraftGenerator {
    llm: Option<LlmClient>,
}

impl DraftGenerator {
    pub fn new(llm: Option<LlmClient>) -> Self {
        Self { llm }
    }

    /// Generate a draft. Never fails: model errors degrade to the template.
    pub async fn generate(&self, inputs: &DraftInputs) -> GeneratedDraft {
        let Some(llm) = &self.llm else {
            return GeneratedDraft {
                draft: template_draft(inputs, "llm_disabled"),
                fallback_reason: Some("llm_disabled".into()),
            };
        };

        let (system, user) = prompts(inputs);
        let result = match llm.complete_json(&system, &user).await {
            Ok(reply) => validate_model_output(inputs, &reply, llm.model()),
            Err(e) => Err(e),
        };
        match result {
            Ok(draft) => GeneratedDraft {
                draft,
                fallback_reason: None,
            },
            Err(e) => {
                let reason = match &e {
                    TrustlineError::Upstream(msg) => format!("llm_error: {msg}"),
                    other => format!("invalid_model_output: {other}"),
                };
                warn!(slug = %inputs.recommendation.stable_slug, %reason, "falling back to template draft");
                GeneratedDraft {
                    draft: template_draft(inputs, &reason),
                    fallback_reason: Some(reason),
                }
            }
        }
    }
}

/// A persisted draft and the receipt that recorded it.
#[derive(Debug, Clone)]
pub struct Drafted {
    pub recommendation: Recommendation,
    pub receipt: Receipt,
}

/// Draft one recommendation, persist it (status DRAFTED) and append a DECIDE receipt.
#[instrument(skip_all, fields(tenant = tenant_id, recommendation = recommendation_id))]
pub async fn draft_recommendation(
    storage: &Storage,
    generator: &DraftGenerator,
    tenant_id: &str,
    recommendation_id: &str,
) -> Result<Drafted> {
    let recommendation = storage
        .require_recommendation(tenant_id, recommendation_id)
        .await?;
    if !recommendation.action.is_actionable() {
        return Err(TrustlineError::validation(format!(
            "recommendation {} is {} and cannot be drafted",
            recommendation.stable_slug, recommendation.action
        )));
    }

    let slug = recommendation.stable_slug.clone();
    let inputs = load_inputs(storage, tenant_id, recommendation).await?;
    let generated = generator.generate(&inputs).await;
    let draft = generated.draft;

    storage.save_draft(tenant_id, recommendation_id, &draft).await?;
    info!(
        %slug,
        fallback = draft.origin.is_fallback(),
        markers = draft.verification.len(),
        "draft saved"
    );

    let receipt = storage
        .append_receipt(
            tenant_id,
            NewReceipt::new(
                ReceiptKind::Decide,
                Actor::Knowledge,
                format!("drafted {slug}"),
            )
            .input(json!({
                "recommendation_id": recommendation_id,
                "kind": inputs.kind.tag(),
                "facts": inputs.facts.iter().map(|f| &f.claim.key).collect::<Vec<_>>(),
                "missing": inputs.missing,
            }))
            .output(json!({
                "origin": draft.origin,
                "verification": draft.verification,
                "citations": draft.citations.len(),
                "llm_error": generated.fallback_reason,
            })),
        )
        .await?;

    let recommendation = storage
        .require_recommendation(tenant_id, recommendation_id)
        .await?;
    Ok(Drafted {
        recommendation,
        receipt,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use trustline_shared::{
        Action, ClassifierConfig, Claim, Evidence, RecommendationStatus, stable_slug,
    };
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::classifier::classify;
    use crate::knowledge::analyze_gaps;
    use crate::testing::*;

    use super::*;

    fn fact(key: &str, value: &str, url: &str) -> VerifiedClaim {
        let now = Utc::now();
        VerifiedClaim {
            claim: Claim {
                id: format!("c-{key}"),
                tenant_id: "t1".into(),
                key: key.into(),
                value: value.into(),
                confidence: 90,
                freshness_at: Some(now),
                scope: "site".into(),
                updated_at: now,
            },
            evidence: vec![Evidence {
                id: format!("e-{key}"),
                claim_id: format!("c-{key}"),
                url: url.into(),
                snippet: Some(value.into()),
                captured_at: now,
            }],
        }
    }

    fn inputs(kind: DraftKind, missing: &[&str]) -> DraftInputs {
        let now = Utc::now();
        DraftInputs {
            recommendation: Recommendation {
                id: "r1".into(),
                tenant_id: "t1".into(),
                action: Action::Create,
                surface: Surface::Faq,
                status: RecommendationStatus::Proposed,
                stable_slug: stable_slug("t1", Surface::Faq, "q1"),
                question_id: Some("q1".into()),
                product_handle: None,
                reason: String::new(),
                impact_score: 80,
                draft: None,
                created_at: now,
                updated_at: now,
            },
            kind,
            question: None,
            product: None,
            facts: vec![fact(
                "shipping_time",
                "2-4 business days",
                "https://shop.example.com/shipping",
            )],
            missing: missing.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn model_reply(content: Value, citations: Value) -> Value {
        let inner = json!({ "content": content, "citations": citations }).to_string();
        json!({ "choices": [{ "message": { "content": inner } }] })
    }

    #[test]
    fn template_marks_missing_facts() {
        let draft = template_draft(&inputs(DraftKind::Faq, &["returns_window"]), "llm_disabled");
        assert!(draft.body.contains("2-4 business days"));
        assert!(draft.body.contains("[NEEDS_VERIFICATION: returns window]"));
        assert_eq!(draft.verification, vec!["returns window".to_string()]);
        assert_eq!(draft.citations.len(), 1);
        assert!(draft.origin.is_fallback());
    }

    #[test]
    fn every_kind_carries_missing_markers() {
        for kind in [
            DraftKind::Faq,
            DraftKind::Blog,
            DraftKind::Product,
            DraftKind::TruthBlock,
        ] {
            let draft = template_draft(&inputs(kind, &["returns_window"]), "x");
            assert_eq!(draft.unresolved_markers(), vec!["returns window".to_string()], "{kind:?}");
        }
        let clean = template_draft(&inputs(DraftKind::TruthBlock, &[]), "x");
        assert!(clean.verification.is_empty());
    }

    #[test]
    fn model_output_is_validated() {
        let input = inputs(DraftKind::Faq, &["returns_window"]);
        let reply = json!({
            "content": { "question": "How fast is shipping?", "answer": "2-4 business days." },
            "citations": [
                { "claim_key": "shipping_time", "url": "https://shop.example.com/shipping" },
                { "claim_key": "shipping_time", "url": "https://invented.example.org/" }
            ]
        });
        let draft = validate_model_output(&input, &reply, "m1").unwrap();
        assert_eq!(draft.citations.len(), 1);
        // the model dropped the marker; it is re-inserted
        assert_eq!(draft.verification, vec!["returns window".to_string()]);
        assert_eq!(draft.origin, DraftOrigin::Model { model: "m1".into() });

        let wrong_shape = json!({ "content": { "title": "x", "sections": "nope" } });
        assert!(validate_model_output(&input, &wrong_shape, "m1").is_err());
    }

    #[tokio::test]
    async fn model_draft_used_when_valid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(model_reply(
                json!({ "question": "How fast is shipping?", "answer": "Orders ship in 2-4 business days." }),
                json!([{ "claim_key": "shipping_time", "url": "https://shop.example.com/shipping" }]),
            )))
            .mount(&server)
            .await;
        let llm = LlmClient::new(&server.uri(), "m1", "k", Duration::from_secs(2)).unwrap();

        let generated = DraftGenerator::new(Some(llm))
            .generate(&inputs(DraftKind::Faq, &[]))
            .await;
        assert!(generated.fallback_reason.is_none());
        assert!(generated.draft.body.contains("Orders ship"));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_template() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let llm = LlmClient::new(&server.uri(), "m1", "k", Duration::from_secs(2)).unwrap();

        let generated = DraftGenerator::new(Some(llm))
            .generate(&inputs(DraftKind::Faq, &["returns_window"]))
            .await;
        let reason = generated.fallback_reason.unwrap();
        assert!(reason.starts_with("llm_error"));
        assert!(generated.draft.origin.is_fallback());
        assert_eq!(generated.draft.verification, vec!["returns window".to_string()]);
    }

    #[tokio::test]
    async fn drafting_persists_and_records_receipt() {
        let storage = test_storage().await;
        let tenant = seed_tenant(&storage).await;
        let config = ClassifierConfig::default();
        analyze_gaps(&storage, &tenant.id, &config).await.unwrap();
        let outcome = classify(&storage, &tenant, &config).await.unwrap();

        let returns = find_question(&storage, &tenant.id, RETURNS_QUESTION).await;
        let rec = outcome
            .recommendations
            .iter()
            .find(|r| r.question_id.as_deref() == Some(returns.id.as_str()))
            .unwrap();

        let before = storage.count_receipts(&tenant.id).await.unwrap();
        let drafted = draft_recommendation(&storage, &DraftGenerator::default(), &tenant.id, &rec.id)
            .await
            .unwrap();
        assert_eq!(drafted.recommendation.status, RecommendationStatus::Drafted);
        let draft = drafted.recommendation.draft.unwrap();
        assert!(draft.body.contains("30 days"));
        assert_eq!(draft.verification, vec!["restocking fee".to_string()]);
        assert_eq!(storage.count_receipts(&tenant.id).await.unwrap(), before + 1);
        assert_eq!(drafted.receipt.summary, format!("drafted {}", rec.stable_slug));

        let deferred = outcome
            .recommendations
            .iter()
            .find(|r| r.action == Action::Defer)
            .unwrap();
        let err = draft_recommendation(&storage, &DraftGenerator::default(), &tenant.id, &deferred.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
