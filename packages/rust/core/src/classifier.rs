//! Recommendation classifier.
//!
//! Decides, per demand signal, whether to create content, leave it alone,
//! defer it or skip it. Decisions are pure functions of the tenant state;
//! [`classify`] gathers that state, ranks and caps the proposals, and upserts
//! them on their stable slug.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info, instrument};

use trustline_shared::{
    Action, Actor, AnswerSample, Asset, ClassifierConfig, NewReceipt, Need, Product,
    ProposedRecommendation, Question, Receipt, ReceiptKind, Recommendation, Result, Surface,
    Taxonomy, Tenant, VerifiedClaim, stable_slug,
};
use trustline_storage::Storage;

/// Attributes a product page is expected to answer.
pub const PRODUCT_ATTRIBUTES: [&str; 6] =
    ["materials", "fit", "care", "returns", "shipping", "use_case"];

// ---------------------------------------------------------------------------
// Answer quality
// ---------------------------------------------------------------------------

/// Quality of the latest external answer for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerQuality {
    Strong,
    Weak,
    Unverifiable,
    /// No sample yet; needs verification.
    None,
}

impl AnswerQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "STRONG",
            Self::Weak => "WEAK",
            Self::Unverifiable => "UNVERIFIABLE",
            Self::None => "NONE",
        }
    }
}

pub fn answer_quality(sample: Option<&AnswerSample>, weak_hedging: u8) -> AnswerQuality {
    match sample {
        None => AnswerQuality::None,
        Some(s) if s.unverifiable => AnswerQuality::Unverifiable,
        Some(s) if s.hedging_score >= weak_hedging => AnswerQuality::Weak,
        Some(_) => AnswerQuality::Strong,
    }
}

// ---------------------------------------------------------------------------
// Candidates & themes
// ---------------------------------------------------------------------------

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Resolve the catalog product a PRODUCT question is about.
///
/// An explicit handle hint wins when it exists in the catalog. Otherwise the
/// product whose title shares the most tokens with the question text is
/// chosen, ties broken by handle.
pub fn resolve_candidate<'a>(question: &Question, products: &'a [Product]) -> Option<&'a Product> {
    if let Some(handle) = &question.product_handle {
        if let Some(product) = products.iter().find(|p| &p.handle == handle) {
            return Some(product);
        }
    }
    let wanted = tokens(&question.text);
    products
        .iter()
        .map(|p| (tokens(&p.title).intersection(&wanted).count(), p))
        .filter(|(overlap, _)| *overlap > 0)
        .max_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pb.handle.cmp(&pa.handle)))
        .map(|(_, p)| p)
}

/// Product attributes found nowhere: not in a `specs` key, a tag, the
/// description, or a tenant claim (`<attr>` or `<attr>_*`).
///
/// Tag and description checks are plain substring matches on the lowercased
/// text, accepting `use_case` spelled as `use case` too.
pub fn missing_attributes(
    product: &Product,
    claims: &BTreeMap<String, VerifiedClaim>,
) -> Vec<&'static str> {
    let description = product.description.to_lowercase();
    let tags: Vec<String> = product.tags.iter().map(|t| t.to_lowercase()).collect();

    PRODUCT_ATTRIBUTES
        .iter()
        .copied()
        .filter(|attr| {
            let spaced = attr.replace('_', " ");
            let mentions = |text: &str| text.contains(*attr) || text.contains(spaced.as_str());

            let in_specs = product
                .specs
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case(attr) && !v.trim().is_empty());
            let in_tags = tags.iter().any(|t| mentions(t.as_str()));
            let in_description = mentions(description.as_str());
            let prefix = format!("{attr}_");
            let in_claims = claims
                .keys()
                .any(|k| k == attr || k.starts_with(&prefix));
            !(in_specs || in_tags || in_description || in_claims)
        })
        .collect()
}

/// Demand themes from the top-N BLOG questions that no BLOG asset covers yet.
pub fn missing_blog_themes(
    questions: &[Question],
    blog_assets: &[Asset],
    top_n: usize,
) -> BTreeSet<String> {
    let mut blog_questions: Vec<&Question> = questions
        .iter()
        .filter(|q| q.recommended_surface == Surface::Blog)
        .collect();
    blog_questions.sort_by(|a, b| {
        b.impact_score
            .cmp(&a.impact_score)
            .then_with(|| a.text.cmp(&b.text))
    });

    let covered: Vec<String> = blog_assets
        .iter()
        .map(|a| format!("{} {}", a.title, a.slug).to_lowercase())
        .collect();

    blog_questions
        .into_iter()
        .take(top_n)
        .map(|q| q.taxonomy.theme())
        .filter(|theme| !covered.iter().any(|c| c.contains(theme)))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Tenant-wide inputs shared by every question.
pub struct TenantSignals<'a> {
    pub tenant: &'a Tenant,
    pub claims: &'a BTreeMap<String, VerifiedClaim>,
    pub missing_themes: &'a BTreeSet<String>,
}

/// Per-question inputs.
pub struct QuestionSignals<'a> {
    pub question: &'a Question,
    pub needs: &'a [&'a Need],
    pub sample: Option<&'a AnswerSample>,
    pub candidate: Option<&'a Product>,
}

fn on_topic(tenant: &Tenant, question: &Question) -> bool {
    if question.taxonomy != Taxonomy::Other {
        return true;
    }
    let text = question.text.to_lowercase();
    tenant
        .keywords
        .iter()
        .any(|k| !k.trim().is_empty() && text.contains(&k.trim().to_lowercase()))
}

/// Classify one question. First matching rule wins.
pub fn classify_question(
    tenant: &TenantSignals<'_>,
    signals: &QuestionSignals<'_>,
    config: &ClassifierConfig,
) -> ProposedRecommendation {
    let question = signals.question;
    let surface = question.recommended_surface;
    let quality = answer_quality(signals.sample, config.weak_hedging);

    let (action, reason) = decide(tenant, signals, quality, config);

    ProposedRecommendation {
        action,
        surface,
        stable_slug: stable_slug(&tenant.tenant.id, surface, &question.id),
        question_id: Some(question.id.clone()),
        product_handle: signals
            .candidate
            .map(|p| p.handle.clone())
            .or_else(|| question.product_handle.clone()),
        reason,
        impact_score: question.impact_score,
    }
}

fn decide(
    tenant: &TenantSignals<'_>,
    signals: &QuestionSignals<'_>,
    quality: AnswerQuality,
    config: &ClassifierConfig,
) -> (Action, String) {
    let question = signals.question;

    if !on_topic(tenant.tenant, question) {
        return (Action::Skip, "off_topic".into());
    }
    if question.impact_score < config.min_impact {
        return (
            Action::Defer,
            format!("impact {} below {}", question.impact_score, config.min_impact),
        );
    }

    let mut product_gap = None;
    if question.recommended_surface == Surface::Product {
        let Some(product) = signals.candidate else {
            return (Action::Defer, "no_product_candidate".into());
        };
        let missing = missing_attributes(product, tenant.claims);
        let quality_ok = !matches!(quality, AnswerQuality::Weak | AnswerQuality::Unverifiable);
        if missing.is_empty() && quality_ok {
            return (Action::NoOp, "product_attributes_complete".into());
        }
        if !missing.is_empty() {
            product_gap = Some(format!(
                "product {} missing {}",
                product.handle,
                missing.join(", ")
            ));
        }
    }

    if question.recommended_surface == Surface::Blog && tenant.missing_themes.is_empty() {
        return (Action::NoOp, "blog_themes_covered".into());
    }

    let covered = signals.needs.iter().filter(|n| n.required).all(|n| {
        n.claim_id.is_some()
            && tenant
                .claims
                .get(&n.claim_key)
                .is_some_and(VerifiedClaim::has_proof)
    });
    if covered && question.state.is_answered() && quality == AnswerQuality::Strong {
        return (Action::NoOp, "answered_with_strong_answer".into());
    }

    let reason = product_gap.unwrap_or_else(|| {
        format!(
            "state {}, answer quality {}",
            question.state,
            quality.as_str()
        )
    });
    (Action::Create, reason)
}

/// Order by action priority, then impact (desc), then slug, and keep at most
/// the configured number per surface.
pub fn rank_and_cap(
    mut proposals: Vec<ProposedRecommendation>,
    config: &ClassifierConfig,
) -> (Vec<ProposedRecommendation>, usize) {
    proposals.sort_by(|a, b| {
        (a.action.priority(), Reverse(a.impact_score), &a.stable_slug).cmp(&(
            b.action.priority(),
            Reverse(b.impact_score),
            &b.stable_slug,
        ))
    });

    let mut per_surface: HashMap<Surface, usize> = HashMap::new();
    let total = proposals.len();
    let kept: Vec<_> = proposals
        .into_iter()
        .filter(|p| {
            let cap = match p.surface {
                Surface::Product => config.cap_product,
                Surface::Blog => config.cap_blog,
                Surface::Faq => config.cap_faq,
            };
            let count = per_surface.entry(p.surface).or_default();
            if *count < cap {
                *count += 1;
                true
            } else {
                false
            }
        })
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

// ---------------------------------------------------------------------------
// Classification run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyOutcome {
    /// Persisted recommendations, in rank order.
    pub recommendations: Vec<Recommendation>,
    pub dropped_by_cap: usize,
    pub by_action: BTreeMap<Action, usize>,
    #[serde(skip)]
    pub receipt: Receipt,
}

/// Classify every question of the tenant and persist the ranked result.
/// Appends one DECIDE receipt.
#[instrument(skip_all, fields(tenant = %tenant.domain))]
pub async fn classify(
    storage: &Storage,
    tenant: &Tenant,
    config: &ClassifierConfig,
) -> Result<ClassifyOutcome> {
    let claims = storage.verified_claims(&tenant.id).await?;
    let questions = storage.list_questions(&tenant.id).await?;
    let needs = storage.list_needs(&tenant.id).await?;
    let products = storage.list_products(&tenant.id).await?;
    let blog_assets: Vec<Asset> = storage
        .list_assets(&tenant.id)
        .await?
        .into_iter()
        .filter(|a| a.asset_type == Surface::Blog)
        .collect();

    let missing_themes = missing_blog_themes(&questions, &blog_assets, config.blog_theme_top_n);
    let tenant_signals = TenantSignals {
        tenant,
        claims: &claims,
        missing_themes: &missing_themes,
    };

    let mut by_question: HashMap<&str, Vec<&Need>> = HashMap::new();
    for need in &needs {
        by_question.entry(need.question_id.as_str()).or_default().push(need);
    }

    let mut proposals = Vec::with_capacity(questions.len());
    for question in &questions {
        let sample = storage
            .latest_answer_sample(&tenant.id, &question.text)
            .await?;
        let question_needs = by_question.get(question.id.as_str()).cloned().unwrap_or_default();
        let candidate = if question.recommended_surface == Surface::Product {
            resolve_candidate(question, &products)
        } else {
            None
        };
        let proposal = classify_question(
            &tenant_signals,
            &QuestionSignals {
                question,
                needs: &question_needs,
                sample: sample.as_ref(),
                candidate,
            },
            config,
        );
        debug!(question = %question.id, action = %proposal.action, reason = %proposal.reason, "classified");
        proposals.push(proposal);
    }

    let (ranked, dropped_by_cap) = rank_and_cap(proposals, config);

    let mut recommendations = Vec::with_capacity(ranked.len());
    let mut by_action: BTreeMap<Action, usize> = BTreeMap::new();
    for proposal in &ranked {
        *by_action.entry(proposal.action).or_default() += 1;
        recommendations.push(storage.upsert_recommendation(&tenant.id, proposal).await?);
    }

    info!(
        kept = recommendations.len(),
        dropped_by_cap,
        "classification complete"
    );

    let receipt = storage
        .append_receipt(
            &tenant.id,
            NewReceipt::new(
                ReceiptKind::Decide,
                Actor::Knowledge,
                format!("classified {} questions", questions.len()),
            )
            .input(serde_json::json!({
                "questions": questions.len(),
                "missing_themes": missing_themes,
            }))
            .output(serde_json::json!({
                "by_action": by_action,
                "dropped_by_cap": dropped_by_cap,
                "slugs": ranked.iter().map(|p| &p.stable_slug).collect::<Vec<_>>(),
            })),
        )
        .await?;

    Ok(ClassifyOutcome {
        recommendations,
        dropped_by_cap,
        by_action,
        receipt,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use trustline_shared::{AssetStatus, NewQuestion, QuestionState, RecommendationStatus};

    use crate::knowledge::analyze_gaps;
    use crate::testing::*;

    use super::*;

    fn tenant(keywords: &[&str]) -> Tenant {
        Tenant {
            id: "t1".into(),
            domain: "shop.example.com".into(),
            name: "Shop".into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn question(taxonomy: Taxonomy, text: &str, impact: u8, surface: Surface) -> Question {
        Question {
            id: format!("q-{impact}"),
            tenant_id: "t1".into(),
            taxonomy,
            text: text.into(),
            impact_score: impact,
            state: QuestionState::Unanswered,
            recommended_surface: surface,
            product_handle: None,
        }
    }

    fn product(handle: &str, title: &str) -> Product {
        Product {
            handle: handle.into(),
            title: title.into(),
            description: String::new(),
            tags: vec![],
            specs: BTreeMap::new(),
        }
    }

    fn sample(hedging: u8, unverifiable: bool) -> AnswerSample {
        AnswerSample {
            id: "s".into(),
            tenant_id: "t1".into(),
            question_text: "q".into(),
            answer: "a".into(),
            hedging_score: hedging,
            unverifiable,
            sampled_at: Utc::now(),
        }
    }

    fn run(
        tenant: &Tenant,
        question: &Question,
        sample: Option<&AnswerSample>,
        candidate: Option<&Product>,
        themes: &BTreeSet<String>,
    ) -> ProposedRecommendation {
        let claims = BTreeMap::new();
        classify_question(
            &TenantSignals {
                tenant,
                claims: &claims,
                missing_themes: themes,
            },
            &QuestionSignals {
                question,
                needs: &[],
                sample,
                candidate,
            },
            &ClassifierConfig::default(),
        )
    }

    #[test]
    fn answer_quality_levels() {
        assert_eq!(answer_quality(None, 70), AnswerQuality::None);
        assert_eq!(answer_quality(Some(&sample(10, true)), 70), AnswerQuality::Unverifiable);
        assert_eq!(answer_quality(Some(&sample(70, false)), 70), AnswerQuality::Weak);
        assert_eq!(answer_quality(Some(&sample(69, false)), 70), AnswerQuality::Strong);
    }

    #[test]
    fn off_topic_other_questions_skip() {
        let t = tenant(&["linen"]);
        let q = question(Taxonomy::Other, "What is the capital of France?", 90, Surface::Faq);
        assert_eq!(run(&t, &q, None, None, &BTreeSet::new()).action, Action::Skip);

        let q = question(Taxonomy::Other, "Does LINEN shrink?", 90, Surface::Faq);
        assert_eq!(run(&t, &q, None, None, &BTreeSet::new()).action, Action::Create);
    }

    #[test]
    fn low_impact_defers() {
        let t = tenant(&[]);
        let q = question(Taxonomy::Shipping, "Do you ship to Norway?", 40, Surface::Faq);
        let rec = run(&t, &q, None, None, &BTreeSet::new());
        assert_eq!(rec.action, Action::Defer);
        assert!(rec.reason.contains("below 55"));
    }

    #[test]
    fn product_rules() {
        let t = tenant(&[]);
        let q = question(Taxonomy::Product, "Is the linen shirt breathable?", 80, Surface::Product);
        assert_eq!(run(&t, &q, None, None, &BTreeSet::new()).action, Action::Defer);

        let mut complete = product("linen-shirt", "Linen Shirt");
        for attr in PRODUCT_ATTRIBUTES {
            complete.specs.insert(attr.to_string(), "yes".into());
        }
        let rec = run(&t, &q, None, Some(&complete), &BTreeSet::new());
        assert_eq!(rec.action, Action::NoOp);
        assert_eq!(rec.stable_slug, stable_slug("t1", Surface::Product, &q.id));

        let weak = sample(90, false);
        let rec = run(&t, &q, Some(&weak), Some(&complete), &BTreeSet::new());
        assert_eq!(rec.action, Action::Create);

        let bare = product("linen-shirt", "Linen Shirt");
        let rec = run(&t, &q, None, Some(&bare), &BTreeSet::new());
        assert_eq!(rec.action, Action::Create);
        assert!(rec.reason.contains("use_case"));
    }

    #[test]
    fn answered_product_question_with_strong_answer_is_noop() {
        let t = tenant(&[]);
        let mut q = question(Taxonomy::Product, "Is the linen shirt breathable?", 80, Surface::Product);
        q.state = QuestionState::Answered;
        let strong = sample(5, false);
        let bare = product("linen-shirt", "Linen Shirt");

        let rec = run(&t, &q, Some(&strong), Some(&bare), &BTreeSet::new());
        assert_eq!(rec.action, Action::NoOp);
        assert_eq!(rec.reason, "answered_with_strong_answer");

        q.state = QuestionState::Weak;
        let rec = run(&t, &q, Some(&strong), Some(&bare), &BTreeSet::new());
        assert_eq!(rec.action, Action::Create);
        assert!(rec.reason.starts_with("product linen-shirt missing"));
    }

    #[test]
    fn attributes_found_in_tags_and_description() {
        let claims = BTreeMap::new();
        let mut described = product("linen-shirt", "Linen Shirt");
        described.description = "Materials: linen. Fit: relaxed. Care: machine wash cold. \
                                 Free returns within 30 days. Shipping worldwide."
            .into();
        described.tags = vec!["use_case:summer".into(), "materials".into()];
        assert!(missing_attributes(&described, &claims).is_empty());

        let mut spaced = product("linen-shirt", "Linen Shirt");
        spaced.tags = vec!["Use Case: beach".into(), "FIT-relaxed".into()];
        let missing = missing_attributes(&spaced, &claims);
        assert!(!missing.contains(&"use_case"));
        assert!(!missing.contains(&"fit"));
        assert_eq!(missing, ["materials", "care", "returns", "shipping"]);

        let t = tenant(&[]);
        let q = question(Taxonomy::Product, "Is the linen shirt breathable?", 80, Surface::Product);
        let rec = run(&t, &q, None, Some(&described), &BTreeSet::new());
        assert_eq!(rec.action, Action::NoOp);
        assert_eq!(rec.reason, "product_attributes_complete");
    }

    #[test]
    fn blog_without_missing_themes_is_noop() {
        let t = tenant(&[]);
        let q = question(Taxonomy::Care, "How do I care for linen?", 80, Surface::Blog);
        assert_eq!(run(&t, &q, None, None, &BTreeSet::new()).action, Action::NoOp);
        let themes = BTreeSet::from(["care".to_string()]);
        assert_eq!(run(&t, &q, None, None, &themes).action, Action::Create);
    }

    #[test]
    fn candidate_resolution_prefers_hint_then_overlap() {
        let products = vec![
            product("linen-shirt", "Linen Shirt"),
            product("linen-pants", "Linen Pants"),
            product("wool-coat", "Wool Coat"),
        ];
        let mut q = question(Taxonomy::Product, "Do linen pants wrinkle?", 80, Surface::Product);
        assert_eq!(resolve_candidate(&q, &products).unwrap().handle, "linen-pants");

        q.product_handle = Some("wool-coat".into());
        assert_eq!(resolve_candidate(&q, &products).unwrap().handle, "wool-coat");

        q.product_handle = Some("missing".into());
        q.text = "Anything on sale?".into();
        assert!(resolve_candidate(&q, &products).is_none());
    }

    #[test]
    fn blog_themes_minus_covered_assets() {
        let questions = vec![
            question(Taxonomy::Care, "Care tips", 90, Surface::Blog),
            question(Taxonomy::Sizing, "Sizing guide", 80, Surface::Blog),
            question(Taxonomy::Shipping, "Shipping", 99, Surface::Faq),
        ];
        let now = Utc::now();
        let assets = vec![Asset {
            id: "a".into(),
            tenant_id: "t1".into(),
            asset_type: Surface::Blog,
            slug: "blog-123".into(),
            title: "Linen care 101".into(),
            status: AssetStatus::Published,
            latest_version: 1,
            created_at: now,
            updated_at: now,
        }];
        let themes = missing_blog_themes(&questions, &assets, 5);
        assert_eq!(themes, BTreeSet::from(["sizing".to_string()]));
        assert!(missing_blog_themes(&questions, &assets, 1).is_empty());
    }

    #[test]
    fn ranking_is_deterministic_and_capped() {
        let mk = |action, impact, slug: &str, surface| ProposedRecommendation {
            action,
            surface,
            stable_slug: slug.into(),
            question_id: None,
            product_handle: None,
            reason: String::new(),
            impact_score: impact,
        };
        let config = ClassifierConfig {
            cap_faq: 2,
            ..ClassifierConfig::default()
        };
        let input = vec![
            mk(Action::Skip, 99, "faq-a", Surface::Faq),
            mk(Action::Create, 60, "faq-b", Surface::Faq),
            mk(Action::Defer, 90, "faq-c", Surface::Faq),
            mk(Action::Create, 60, "faq-a2", Surface::Faq),
            mk(Action::Create, 70, "blog-a", Surface::Blog),
        ];
        let (kept, dropped) = rank_and_cap(input.clone(), &config);
        let slugs: Vec<_> = kept.iter().map(|p| p.stable_slug.as_str()).collect();
        assert_eq!(slugs, ["blog-a", "faq-a2", "faq-b"]);
        assert_eq!(dropped, 2);

        let mut reversed = input;
        reversed.reverse();
        assert_eq!(rank_and_cap(reversed, &config).0, kept);
    }

    #[tokio::test]
    async fn classify_persists_and_keeps_status() {
        let storage = test_storage().await;
        let tenant = seed_tenant(&storage).await;
        let config = ClassifierConfig::default();
        analyze_gaps(&storage, &tenant.id, &config).await.unwrap();

        let outcome = classify(&storage, &tenant, &config).await.unwrap();
        assert_eq!(outcome.recommendations.len(), 4);
        assert_eq!(outcome.recommendations[0].action, Action::Create);

        let gift = find_question(&storage, &tenant.id, GIFT_QUESTION).await;
        let deferred = outcome
            .recommendations
            .iter()
            .find(|r| r.question_id.as_deref() == Some(gift.id.as_str()))
            .unwrap();
        assert_eq!(deferred.action, Action::Defer);
        assert_eq!(deferred.status, RecommendationStatus::Proposed);

        let product_rec = outcome
            .recommendations
            .iter()
            .find(|r| r.surface == Surface::Product)
            .unwrap();
        assert_eq!(product_rec.product_handle.as_deref(), Some("linen-shirt"));
        assert_eq!(product_rec.action, Action::Create);

        storage
            .set_recommendation_status(&tenant.id, &deferred.id, RecommendationStatus::Approved)
            .await
            .unwrap();
        let receipts_before = storage.count_receipts(&tenant.id).await.unwrap();
        let again = classify(&storage, &tenant, &config).await.unwrap();

        let slugs = |o: &ClassifyOutcome| {
            o.recommendations
                .iter()
                .map(|r| (r.stable_slug.clone(), r.action))
                .collect::<Vec<_>>()
        };
        assert_eq!(slugs(&again), slugs(&outcome));
        let same = again.recommendations.iter().find(|r| r.id == deferred.id).unwrap();
        assert_eq!(same.status, RecommendationStatus::Approved);
        assert_eq!(storage.list_recommendations(&tenant.id).await.unwrap().len(), 4);
        assert_eq!(storage.count_receipts(&tenant.id).await.unwrap(), receipts_before + 1);
    }

    #[tokio::test]
    async fn questions_about_one_product_keep_separate_recommendations() {
        let storage = test_storage().await;
        let tenant = seed_tenant(&storage).await;
        let second = storage
            .upsert_question(
                &tenant.id,
                &NewQuestion {
                    taxonomy: Taxonomy::Product,
                    text: "Does the linen shirt shrink?".into(),
                    impact_score: 20,
                    recommended_surface: Surface::Product,
                    product_handle: Some("linen-shirt".into()),
                    needs: vec![],
                },
            )
            .await
            .unwrap();
        let first = find_question(&storage, &tenant.id, PRODUCT_QUESTION).await;
        let config = ClassifierConfig::default();
        analyze_gaps(&storage, &tenant.id, &config).await.unwrap();

        let outcome = classify(&storage, &tenant, &config).await.unwrap();
        let ids: BTreeSet<&str> = outcome.recommendations.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), outcome.recommendations.len());
        assert_eq!(outcome.by_action.values().sum::<usize>(), 5);

        let stored: Vec<Recommendation> = storage
            .list_recommendations(&tenant.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.surface == Surface::Product)
            .collect();
        assert_eq!(stored.len(), 2);

        let by_question = |id: &str| {
            stored
                .iter()
                .find(|r| r.question_id.as_deref() == Some(id))
                .unwrap()
        };
        let create = by_question(&first.id);
        assert_eq!(create.action, Action::Create);
        assert_eq!(create.impact_score, 70);
        let defer = by_question(&second.id);
        assert_eq!(defer.action, Action::Defer);
        assert_eq!(defer.product_handle.as_deref(), Some("linen-shirt"));
        assert_ne!(create.stable_slug, defer.stable_slug);
    }
}
