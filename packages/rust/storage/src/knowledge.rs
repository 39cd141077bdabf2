//! Knowledge store: claims, evidence, demand signals, needs, gaps, answer samples, catalog.

use std::collections::BTreeMap;

use chrono::Utc;
use libsql::params;
use trustline_shared::{
    AnswerSample, Claim, Evidence, ExtractedClaim, Gap, NewAnswerSample, NewClaim, NewEvidence,
    NewQuestion, Need, Product, Question, QuestionState, Result, TrustlineError, VerifiedClaim,
    new_id,
};

use crate::{
    Storage, db_err, from_json, get_bool, get_enum, get_opt_string, get_opt_time, get_string,
    get_time, get_u8, to_json,
};

const CLAIM_COLUMNS: &str =
    "id, tenant_id, key, value, confidence, freshness_at, scope, updated_at";

const QUESTION_COLUMNS: &str =
    "id, tenant_id, taxonomy, text, impact_score, state, recommended_surface, product_handle";

impl Storage {
    // -----------------------------------------------------------------------
    // Claims & evidence
    // -----------------------------------------------------------------------

    /// Upsert a claim by `(tenant, key)`; the latest value wins.
    pub async fn upsert_claim(&self, tenant_id: &str, claim: &NewClaim) -> Result<Claim> {
        self.check_writable()?;
        if claim.confidence > 100 {
            return Err(TrustlineError::validation(format!(
                "claim {}: confidence {} exceeds 100",
                claim.key, claim.confidence
            )));
        }
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        let freshness = claim.freshness_at.map(|t| t.to_rfc3339());
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO claims (id, tenant_id, key, value, confidence, freshness_at, scope, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(tenant_id, key) DO UPDATE SET
                       value = excluded.value,
                       confidence = excluded.confidence,
                       freshness_at = excluded.freshness_at,
                       scope = excluded.scope,
                       updated_at = excluded.updated_at
                     RETURNING {CLAIM_COLUMNS}"
                ),
                params![
                    id.as_str(),
                    tenant_id,
                    claim.key.as_str(),
                    claim.value.as_str(),
                    i64::from(claim.confidence),
                    freshness.as_deref(),
                    claim.scope.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_claim(&row),
            None => Err(TrustlineError::Storage("claim upsert returned no row".into())),
        }
    }

    /// Attach evidence to a claim. A row with the same snippet (or the same
    /// URL when there is no snippet) is not duplicated. Returns true when inserted.
    pub async fn add_evidence(&self, claim_id: &str, evidence: &NewEvidence) -> Result<bool> {
        self.check_writable()?;
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO evidence (id, claim_id, url, snippet, captured_at)
                 SELECT ?1, ?2, ?3, ?4, ?5
                 WHERE NOT EXISTS (
                   SELECT 1 FROM evidence
                   WHERE claim_id = ?2
                     AND ((?4 IS NOT NULL AND snippet = ?4) OR (?4 IS NULL AND snippet IS NULL AND url = ?3))
                 )",
                params![
                    id.as_str(),
                    claim_id,
                    evidence.url.as_str(),
                    evidence.snippet.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(inserted > 0)
    }

    /// Ingest crawler output. Every claim must carry at least one evidence row
    /// with an absolute http(s) URL.
    pub async fn ingest_claims(
        &self,
        tenant_id: &str,
        extracted: &[ExtractedClaim],
    ) -> Result<Vec<Claim>> {
        for item in extracted {
            if item.evidence.is_empty() {
                return Err(TrustlineError::validation(format!(
                    "claim {} has no evidence",
                    item.claim.key
                )));
            }
            for ev in &item.evidence {
                let parsed = url::Url::parse(&ev.url).map_err(|e| {
                    TrustlineError::validation(format!(
                        "claim {}: invalid evidence URL {:?}: {e}",
                        item.claim.key, ev.url
                    ))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(TrustlineError::validation(format!(
                        "claim {}: evidence URL must be http(s): {}",
                        item.claim.key, ev.url
                    )));
                }
            }
        }

        let mut claims = Vec::with_capacity(extracted.len());
        for item in extracted {
            let claim = self.upsert_claim(tenant_id, &item.claim).await?;
            for ev in &item.evidence {
                self.add_evidence(&claim.id, ev).await?;
            }
            claims.push(claim);
        }
        tracing::info!(tenant = tenant_id, claims = claims.len(), "claims ingested");
        Ok(claims)
    }

    pub async fn list_claims(&self, tenant_id: &str) -> Result<Vec<Claim>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE tenant_id = ?1 ORDER BY key"),
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_claim(&row)?);
        }
        Ok(results)
    }

    pub async fn claim_by_key(&self, tenant_id: &str, key: &str) -> Result<Option<Claim>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE tenant_id = ?1 AND key = ?2"),
                params![tenant_id, key],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_claim(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn evidence_for_claim(&self, claim_id: &str) -> Result<Vec<Evidence>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, claim_id, url, snippet, captured_at FROM evidence
                 WHERE claim_id = ?1 ORDER BY rowid",
                params![claim_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Evidence {
                id: get_string(&row, 0)?,
                claim_id: get_string(&row, 1)?,
                url: get_string(&row, 2)?,
                snippet: get_opt_string(&row, 3),
                captured_at: get_time(&row, 4)?,
            });
        }
        Ok(results)
    }

    /// Every claim of a tenant joined with its evidence, keyed by claim key.
    pub async fn verified_claims(&self, tenant_id: &str) -> Result<BTreeMap<String, VerifiedClaim>> {
        let mut out = BTreeMap::new();
        for claim in self.list_claims(tenant_id).await? {
            let evidence = self.evidence_for_claim(&claim.id).await?;
            out.insert(claim.key.clone(), VerifiedClaim { claim, evidence });
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Demand signals & needs
    // -----------------------------------------------------------------------

    /// Upsert a question by `(tenant, text)` and its needs by `(question, key)`.
    /// The derived `state` of an existing question is left untouched.
    pub async fn upsert_question(&self, tenant_id: &str, question: &NewQuestion) -> Result<Question> {
        self.check_writable()?;
        if !(1..=100).contains(&question.impact_score) {
            return Err(TrustlineError::validation(format!(
                "impact score {} outside 1..=100",
                question.impact_score
            )));
        }
        let id = new_id();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO questions (id, tenant_id, taxonomy, text, impact_score, recommended_surface, product_handle)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(tenant_id, text) DO UPDATE SET
                       taxonomy = excluded.taxonomy,
                       impact_score = excluded.impact_score,
                       recommended_surface = excluded.recommended_surface,
                       product_handle = excluded.product_handle
                     RETURNING {QUESTION_COLUMNS}"
                ),
                params![
                    id.as_str(),
                    tenant_id,
                    question.taxonomy.as_str(),
                    question.text.as_str(),
                    i64::from(question.impact_score),
                    question.recommended_surface.as_str(),
                    question.product_handle.as_deref(),
                ],
            )
            .await
            .map_err(db_err)?;

        let stored = match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_question(&row)?,
            None => return Err(TrustlineError::Storage("question upsert returned no row".into())),
        };

        for need in &question.needs {
            let need_id = new_id();
            self.conn
                .execute(
                    "INSERT INTO needs (id, question_id, claim_key, required)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(question_id, claim_key) DO UPDATE SET required = excluded.required",
                    params![
                        need_id.as_str(),
                        stored.id.as_str(),
                        need.claim_key.as_str(),
                        i64::from(need.required),
                    ],
                )
                .await
                .map_err(db_err)?;
        }
        Ok(stored)
    }

    pub async fn list_questions(&self, tenant_id: &str) -> Result<Vec<Question>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {QUESTION_COLUMNS} FROM questions WHERE tenant_id = ?1
                     ORDER BY impact_score DESC, text"
                ),
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_question(&row)?);
        }
        Ok(results)
    }

    pub async fn get_question(&self, tenant_id: &str, question_id: &str) -> Result<Option<Question>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE tenant_id = ?1 AND id = ?2"),
                params![tenant_id, question_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_question(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn set_question_state(
        &self,
        tenant_id: &str,
        question_id: &str,
        state: QuestionState,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE questions SET state = ?1 WHERE tenant_id = ?2 AND id = ?3",
                params![state.as_str(), tenant_id, question_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// All needs of a tenant's questions, ordered by question then key.
    pub async fn list_needs(&self, tenant_id: &str) -> Result<Vec<Need>> {
        let mut rows = self
            .conn
            .query(
                "SELECT n.id, n.question_id, n.claim_key, n.required, n.claim_id
                 FROM needs n JOIN questions q ON q.id = n.question_id
                 WHERE q.tenant_id = ?1
                 ORDER BY n.question_id, n.claim_key",
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Need {
                id: get_string(&row, 0)?,
                question_id: get_string(&row, 1)?,
                claim_key: get_string(&row, 2)?,
                required: get_bool(&row, 3)?,
                claim_id: get_opt_string(&row, 4),
            });
        }
        Ok(results)
    }

    /// Bind every need of the tenant to the claim carrying its key, if one exists.
    /// Returns the number of needs that are bound afterwards.
    pub async fn bind_needs(&self, tenant_id: &str) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE needs SET claim_id = (
                   SELECT c.id FROM claims c
                   WHERE c.tenant_id = ?1 AND c.key = needs.claim_key
                 )
                 WHERE question_id IN (SELECT id FROM questions WHERE tenant_id = ?1)",
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM needs n JOIN questions q ON q.id = n.question_id
                 WHERE q.tenant_id = ?1 AND n.claim_id IS NOT NULL",
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;
        let bound = match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>(0).map_err(db_err)?,
            None => 0,
        };
        Ok(bound.max(0) as u64)
    }

    // -----------------------------------------------------------------------
    // Gaps
    // -----------------------------------------------------------------------

    /// Replace the gap records of one question.
    pub async fn replace_gaps(&self, tenant_id: &str, question_id: &str, gaps: &[Gap]) -> Result<()> {
        self.clear_gaps(tenant_id, question_id).await?;
        let now = Utc::now().to_rfc3339();
        for gap in gaps {
            let id = new_id();
            self.conn
                .execute(
                    "INSERT INTO gaps (id, tenant_id, question_id, claim_key, kind, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(question_id, claim_key) DO UPDATE SET kind = excluded.kind",
                    params![
                        id.as_str(),
                        tenant_id,
                        question_id,
                        gap.claim_key.as_str(),
                        gap.kind.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn clear_gaps(&self, tenant_id: &str, question_id: &str) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM gaps WHERE tenant_id = ?1 AND question_id = ?2",
                params![tenant_id, question_id],
            )
            .await
            .map_err(db_err)
    }

    pub async fn list_gaps(&self, tenant_id: &str) -> Result<Vec<Gap>> {
        let mut rows = self
            .conn
            .query(
                "SELECT question_id, claim_key, kind FROM gaps WHERE tenant_id = ?1
                 ORDER BY question_id, claim_key",
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Gap {
                question_id: get_string(&row, 0)?,
                claim_key: get_string(&row, 1)?,
                kind: get_enum(&row, 2)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // External answer samples
    // -----------------------------------------------------------------------

    pub async fn add_answer_sample(
        &self,
        tenant_id: &str,
        sample: &NewAnswerSample,
    ) -> Result<AnswerSample> {
        self.check_writable()?;
        let stored = AnswerSample {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            question_text: sample.question_text.clone(),
            answer: sample.answer.clone(),
            hedging_score: sample.hedging_score.min(100),
            unverifiable: sample.unverifiable,
            sampled_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO answer_samples (id, tenant_id, question_text, answer, hedging_score, unverifiable, sampled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    stored.id.as_str(),
                    tenant_id,
                    stored.question_text.as_str(),
                    stored.answer.as_str(),
                    i64::from(stored.hedging_score),
                    i64::from(stored.unverifiable),
                    stored.sampled_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(stored)
    }

    /// Most recent sample for the exact question text.
    pub async fn latest_answer_sample(
        &self,
        tenant_id: &str,
        question_text: &str,
    ) -> Result<Option<AnswerSample>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, tenant_id, question_text, answer, hedging_score, unverifiable, sampled_at
                 FROM answer_samples WHERE tenant_id = ?1 AND question_text = ?2
                 ORDER BY rowid DESC LIMIT 1",
                params![tenant_id, question_text],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(AnswerSample {
                id: get_string(&row, 0)?,
                tenant_id: get_string(&row, 1)?,
                question_text: get_string(&row, 2)?,
                answer: get_string(&row, 3)?,
                hedging_score: get_u8(&row, 4)?,
                unverifiable: get_bool(&row, 5)?,
                sampled_at: get_time(&row, 6)?,
            })),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    pub async fn upsert_product(&self, tenant_id: &str, product: &Product) -> Result<()> {
        self.check_writable()?;
        let tags = to_json(&product.tags)?;
        let specs = to_json(&product.specs)?;
        self.conn
            .execute(
                "INSERT INTO products (tenant_id, handle, title, description, tags_json, specs_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(tenant_id, handle) DO UPDATE SET
                   title = excluded.title,
                   description = excluded.description,
                   tags_json = excluded.tags_json,
                   specs_json = excluded.specs_json",
                params![
                    tenant_id,
                    product.handle.as_str(),
                    product.title.as_str(),
                    product.description.as_str(),
                    tags.as_str(),
                    specs.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_product(&self, tenant_id: &str, handle: &str) -> Result<Option<Product>> {
        let mut rows = self
            .conn
            .query(
                "SELECT handle, title, description, tags_json, specs_json FROM products
                 WHERE tenant_id = ?1 AND handle = ?2",
                params![tenant_id, handle],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_product(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_products(&self, tenant_id: &str) -> Result<Vec<Product>> {
        let mut rows = self
            .conn
            .query(
                "SELECT handle, title, description, tags_json, specs_json FROM products
                 WHERE tenant_id = ?1 ORDER BY handle",
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_product(&row)?);
        }
        Ok(results)
    }
}

fn row_to_claim(row: &libsql::Row) -> Result<Claim> {
    Ok(Claim {
        id: get_string(row, 0)?,
        tenant_id: get_string(row, 1)?,
        key: get_string(row, 2)?,
        value: get_string(row, 3)?,
        confidence: get_u8(row, 4)?,
        freshness_at: get_opt_time(row, 5)?,
        scope: get_string(row, 6)?,
        updated_at: get_time(row, 7)?,
    })
}

fn row_to_question(row: &libsql::Row) -> Result<Question> {
    Ok(Question {
        id: get_string(row, 0)?,
        tenant_id: get_string(row, 1)?,
        taxonomy: get_enum(row, 2)?,
        text: get_string(row, 3)?,
        impact_score: get_u8(row, 4)?,
        state: get_enum(row, 5)?,
        recommended_surface: get_enum(row, 6)?,
        product_handle: get_opt_string(row, 7),
    })
}

fn row_to_product(row: &libsql::Row) -> Result<Product> {
    Ok(Product {
        handle: get_string(row, 0)?,
        title: get_string(row, 1)?,
        description: get_string(row, 2)?,
        tags: from_json(&get_string(row, 3)?)?,
        specs: from_json(&get_string(row, 4)?)?,
    })
}
