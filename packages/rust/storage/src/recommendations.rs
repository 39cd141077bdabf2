use chrono::Utc;
use libsql::params;
use trustline_shared::{
    Draft, ProposedRecommendation, Recommendation, RecommendationStatus, Result, TrustlineError,
    new_id,
};

use crate::{
    Storage, db_err, from_json, get_enum, get_opt_string, get_string, get_time, get_u8, to_json,
};

const RECOMMENDATION_COLUMNS: &str = "id, tenant_id, action, surface, status, stable_slug, \
     question_id, product_handle, reason, impact_score, draft_json, created_at, updated_at";

impl Storage {
    /// Upsert a classifier proposal by `(tenant, stable_slug)`.
    ///
    /// New rows start `PROPOSED`. Existing rows get the new action, reason and
    /// impact but keep their status and draft.
    pub async fn upsert_recommendation(
        &self,
        tenant_id: &str,
        proposal: &ProposedRecommendation,
    ) -> Result<Recommendation> {
        self.check_writable()?;
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO recommendations
                       (id, tenant_id, action, surface, status, stable_slug, question_id, product_handle, reason, impact_score, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'PROPOSED', ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                     ON CONFLICT(tenant_id, stable_slug) DO UPDATE SET
                       action = excluded.action,
                       question_id = excluded.question_id,
                       product_handle = excluded.product_handle,
                       reason = excluded.reason,
                       impact_score = excluded.impact_score,
                       updated_at = excluded.updated_at
                     RETURNING {RECOMMENDATION_COLUMNS}"
                ),
                params![
                    id.as_str(),
                    tenant_id,
                    proposal.action.as_str(),
                    proposal.surface.as_str(),
                    proposal.stable_slug.as_str(),
                    proposal.question_id.as_deref(),
                    proposal.product_handle.as_deref(),
                    proposal.reason.as_str(),
                    i64::from(proposal.impact_score),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_recommendation(&row),
            None => Err(TrustlineError::Storage(
                "recommendation upsert returned no row".into(),
            )),
        }
    }

    /// All recommendations of a tenant, highest impact first.
    pub async fn list_recommendations(&self, tenant_id: &str) -> Result<Vec<Recommendation>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations WHERE tenant_id = ?1
                     ORDER BY impact_score DESC, stable_slug"
                ),
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_recommendation(&row)?);
        }
        Ok(results)
    }

    pub async fn get_recommendation(
        &self,
        tenant_id: &str,
        recommendation_id: &str,
    ) -> Result<Option<Recommendation>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations
                     WHERE tenant_id = ?1 AND id = ?2"
                ),
                params![tenant_id, recommendation_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_recommendation(&row)?)),
            None => Ok(None),
        }
    }

    /// Like [`Storage::get_recommendation`] but fails with `NotFound`.
    pub async fn require_recommendation(
        &self,
        tenant_id: &str,
        recommendation_id: &str,
    ) -> Result<Recommendation> {
        self.get_recommendation(tenant_id, recommendation_id)
            .await?
            .ok_or_else(|| TrustlineError::not_found("recommendation", recommendation_id))
    }

    /// Store a draft and move the recommendation to `DRAFTED`.
    pub async fn save_draft(
        &self,
        tenant_id: &str,
        recommendation_id: &str,
        draft: &Draft,
    ) -> Result<()> {
        self.check_writable()?;
        let draft_json = to_json(draft)?;
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn
            .execute(
                "UPDATE recommendations SET draft_json = ?1, status = ?2, updated_at = ?3
                 WHERE tenant_id = ?4 AND id = ?5",
                params![
                    draft_json.as_str(),
                    RecommendationStatus::Drafted.as_str(),
                    now.as_str(),
                    tenant_id,
                    recommendation_id,
                ],
            )
            .await
            .map_err(db_err)?;
        if updated == 0 {
            return Err(TrustlineError::not_found(
                "recommendation",
                recommendation_id,
            ));
        }
        Ok(())
    }

    pub async fn set_recommendation_status(
        &self,
        tenant_id: &str,
        recommendation_id: &str,
        status: RecommendationStatus,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn
            .execute(
                "UPDATE recommendations SET status = ?1, updated_at = ?2
                 WHERE tenant_id = ?3 AND id = ?4",
                params![status.as_str(), now.as_str(), tenant_id, recommendation_id],
            )
            .await
            .map_err(db_err)?;
        if updated == 0 {
            return Err(TrustlineError::not_found(
                "recommendation",
                recommendation_id,
            ));
        }
        Ok(())
    }
}

fn row_to_recommendation(row: &libsql::Row) -> Result<Recommendation> {
    let draft = match get_opt_string(row, 10) {
        Some(json) => Some(from_json::<Draft>(&json)?),
        None => None,
    };
    Ok(Recommendation {
        id: get_string(row, 0)?,
        tenant_id: get_string(row, 1)?,
        action: get_enum(row, 2)?,
        surface: get_enum(row, 3)?,
        status: get_enum(row, 4)?,
        stable_slug: get_string(row, 5)?,
        question_id: get_opt_string(row, 6),
        product_handle: get_opt_string(row, 7),
        reason: get_string(row, 8)?,
        impact_score: get_u8(row, 9)?,
        draft,
        created_at: get_time(row, 11)?,
        updated_at: get_time(row, 12)?,
    })
}
