//! Gap analysis: bind needs to claims and derive each question's coverage state.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use trustline_shared::{
    Actor, ClassifierConfig, Gap, GapKind, NewReceipt, Need, Question, QuestionState, Receipt,
    ReceiptKind, Result, VerifiedClaim,
};
use trustline_storage::Storage;

/// Outcome of one gap-analysis run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GapReport {
    pub questions: usize,
    pub bound_needs: u64,
    pub gaps: Vec<Gap>,
    /// Question count per resulting state.
    pub states: BTreeMap<QuestionState, usize>,
    /// Questions whose state changed in this run.
    pub changed: usize,
    /// Receipts appended by this run.
    #[serde(skip)]
    pub receipts: Vec<Receipt>,
}

impl GapReport {
    pub fn count(&self, kind: GapKind) -> usize {
        self.gaps.iter().filter(|g| g.kind == kind).count()
    }
}

/// Gaps and resulting state for one question.
///
/// Only required needs produce gaps. A question with no gaps keeps an
/// answered state; otherwise it becomes WEAK (facts known, nothing published).
pub fn assess_question(
    question: &Question,
    needs: &[&Need],
    claims: &BTreeMap<String, VerifiedClaim>,
    stale_after_days: i64,
    now: DateTime<Utc>,
) -> (Vec<Gap>, QuestionState) {
    let stale_cutoff = now - Duration::days(stale_after_days);
    let mut gaps = Vec::new();

    for need in needs.iter().filter(|n| n.required) {
        let kind = match claims.get(&need.claim_key) {
            None => Some(GapKind::MissingClaim),
            Some(verified) if !verified.has_proof() => Some(GapKind::MissingProof),
            Some(verified) => match verified.claim.freshness_at {
                Some(at) if at < stale_cutoff => Some(GapKind::Stale),
                _ => None,
            },
        };
        if let Some(kind) = kind {
            gaps.push(Gap {
                question_id: question.id.clone(),
                claim_key: need.claim_key.clone(),
                kind,
            });
        }
    }

    let has = |kind: GapKind| gaps.iter().any(|g| g.kind == kind);
    let state = if has(GapKind::MissingClaim) {
        QuestionState::Unanswered
    } else if has(GapKind::MissingProof) {
        QuestionState::Weak
    } else if has(GapKind::Stale) {
        QuestionState::Stale
    } else if question.state.is_answered() {
        question.state
    } else {
        QuestionState::Weak
    };
    (gaps, state)
}

/// Run gap analysis for every question of a tenant.
///
/// Binds needs, replaces each question's gap rows, updates states, and
/// appends one READ receipt.
#[instrument(skip_all, fields(tenant = tenant_id))]
pub async fn analyze_gaps(
    storage: &Storage,
    tenant_id: &str,
    config: &ClassifierConfig,
) -> Result<GapReport> {
    let now = Utc::now();
    let bound_needs = storage.bind_needs(tenant_id).await?;
    let claims = storage.verified_claims(tenant_id).await?;
    let questions = storage.list_questions(tenant_id).await?;
    let needs = storage.list_needs(tenant_id).await?;

    let mut by_question: HashMap<&str, Vec<&Need>> = HashMap::new();
    for need in &needs {
        by_question.entry(need.question_id.as_str()).or_default().push(need);
    }

    let mut report = GapReport {
        questions: questions.len(),
        bound_needs,
        ..GapReport::default()
    };

    for question in &questions {
        let question_needs = by_question.remove(question.id.as_str()).unwrap_or_default();
        let (gaps, state) =
            assess_question(question, &question_needs, &claims, config.stale_after_days, now);

        storage.replace_gaps(tenant_id, &question.id, &gaps).await?;
        if state != question.state {
            debug!(question = %question.id, from = %question.state, to = %state, "question state changed");
            storage
                .set_question_state(tenant_id, &question.id, state)
                .await?;
            report.changed += 1;
        }
        *report.states.entry(state).or_default() += 1;
        report.gaps.extend(gaps);
    }

    info!(
        questions = report.questions,
        gaps = report.gaps.len(),
        changed = report.changed,
        "gap analysis complete"
    );

    let receipt = storage
        .append_receipt(
            tenant_id,
            NewReceipt::new(
                ReceiptKind::Read,
                Actor::Analyzer,
                format!(
                    "analyzed {} questions, {} gaps",
                    report.questions,
                    report.gaps.len()
                ),
            )
            .input(serde_json::json!({ "claims": claims.len(), "needs": needs.len() }))
            .output(serde_json::json!({
                "missing_claim": report.count(GapKind::MissingClaim),
                "missing_proof": report.count(GapKind::MissingProof),
                "stale": report.count(GapKind::Stale),
                "states": report.states,
                "changed": report.changed,
            })),
        )
        .await?;
    report.receipts.push(receipt);

    Ok(report)
}

/// Claim inventory summary used by non-FIX_GAPS runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClaimInventory {
    pub claims: usize,
    pub with_evidence: usize,
    pub stale: usize,
    pub keys: Vec<String>,
}

pub fn claim_inventory(
    claims: &BTreeMap<String, VerifiedClaim>,
    stale_after_days: i64,
    now: DateTime<Utc>,
) -> ClaimInventory {
    let cutoff = now - Duration::days(stale_after_days);
    ClaimInventory {
        claims: claims.len(),
        with_evidence: claims.values().filter(|c| c.has_proof()).count(),
        stale: claims
            .values()
            .filter(|c| c.claim.freshness_at.is_some_and(|at| at < cutoff))
            .count(),
        keys: claims.keys().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use trustline_shared::{Claim, Evidence, Surface, Taxonomy};

    use crate::testing::*;

    use super::*;

    fn question(state: QuestionState) -> Question {
        Question {
            id: "q1".into(),
            tenant_id: "t".into(),
            taxonomy: Taxonomy::Returns,
            text: "How do returns work?".into(),
            impact_score: 80,
            state,
            recommended_surface: Surface::Faq,
            product_handle: None,
        }
    }

    fn need(key: &str, required: bool) -> Need {
        Need {
            id: format!("n-{key}"),
            question_id: "q1".into(),
            claim_key: key.into(),
            required,
            claim_id: None,
        }
    }

    fn verified(key: &str, evidence: bool, age_days: i64) -> (String, VerifiedClaim) {
        let now = Utc::now();
        let claim = Claim {
            id: format!("c-{key}"),
            tenant_id: "t".into(),
            key: key.into(),
            value: "v".into(),
            confidence: 90,
            freshness_at: Some(now - Duration::days(age_days)),
            scope: "site".into(),
            updated_at: now,
        };
        let evidence = if evidence {
            vec![Evidence {
                id: "e".into(),
                claim_id: claim.id.clone(),
                url: "https://shop.example.com".into(),
                snippet: None,
                captured_at: now,
            }]
        } else {
            vec![]
        };
        (key.to_string(), VerifiedClaim { claim, evidence })
    }

    #[test]
    fn missing_claim_wins_over_other_gaps() {
        let claims = BTreeMap::from([verified("b", false, 1), verified("c", true, 400)]);
        let needs = [need("a", true), need("b", true), need("c", true)];
        let refs: Vec<&Need> = needs.iter().collect();
        let (gaps, state) =
            assess_question(&question(QuestionState::Answered), &refs, &claims, 90, Utc::now());
        assert_eq!(gaps.len(), 3);
        assert_eq!(state, QuestionState::Unanswered);
    }

    #[test]
    fn state_precedence_below_missing_claim() {
        let now = Utc::now();
        let q = question(QuestionState::Unanswered);

        let claims = BTreeMap::from([verified("a", false, 1), verified("b", true, 400)]);
        let needs = [need("a", true), need("b", true)];
        let refs: Vec<&Need> = needs.iter().collect();
        assert_eq!(assess_question(&q, &refs, &claims, 90, now).1, QuestionState::Weak);

        let claims = BTreeMap::from([verified("a", true, 1), verified("b", true, 400)]);
        assert_eq!(assess_question(&q, &refs, &claims, 90, now).1, QuestionState::Stale);

        let claims = BTreeMap::from([verified("a", true, 1), verified("b", true, 1)]);
        let (gaps, state) = assess_question(&q, &refs, &claims, 90, now);
        assert!(gaps.is_empty());
        assert_eq!(state, QuestionState::Weak);

        let trusted = question(QuestionState::Trusted);
        assert_eq!(
            assess_question(&trusted, &refs, &claims, 90, now).1,
            QuestionState::Trusted
        );
    }

    #[test]
    fn optional_needs_never_gap() {
        let needs = [need("nice_to_have", false)];
        let refs: Vec<&Need> = needs.iter().collect();
        let (gaps, _) = assess_question(
            &question(QuestionState::Unanswered),
            &refs,
            &BTreeMap::new(),
            90,
            Utc::now(),
        );
        assert!(gaps.is_empty());
    }

    #[tokio::test]
    async fn analysis_persists_gaps_states_and_one_receipt() {
        let storage = test_storage().await;
        let tenant = seed_tenant(&storage).await;
        let before = storage.count_receipts(&tenant.id).await.unwrap();

        let report = analyze_gaps(&storage, &tenant.id, &ClassifierConfig::default())
            .await
            .unwrap();

        assert_eq!(report.questions, 4);
        assert_eq!(storage.count_receipts(&tenant.id).await.unwrap(), before + 1);
        let receipts = storage.list_receipts(&tenant.id, 1).await.unwrap();
        assert_eq!(receipts[0].kind, ReceiptKind::Read);
        assert_eq!(receipts[0].actor, Actor::Analyzer);
        assert_eq!(report.receipts.len(), 1);
        assert_eq!(report.receipts[0].id, receipts[0].id);

        // the returns question needs `restocking_fee`, which no claim carries
        let returns = find_question(&storage, &tenant.id, RETURNS_QUESTION).await;
        assert_eq!(returns.state, QuestionState::Unanswered);
        let gaps = storage.list_gaps(&tenant.id).await.unwrap();
        assert!(
            gaps.iter()
                .any(|g| g.question_id == returns.id && g.claim_key == "restocking_fee")
        );

        // rerun is stable
        let again = analyze_gaps(&storage, &tenant.id, &ClassifierConfig::default())
            .await
            .unwrap();
        assert_eq!(again.gaps, report.gaps);
        assert_eq!(again.changed, 0);
    }
}
