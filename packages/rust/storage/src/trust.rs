use chrono::Utc;
use libsql::params;
use trustline_shared::{Result, TrustBreakdown, TrustSnapshot, new_id};

use crate::{Storage, db_err, from_json, get_string, get_time, get_u8, to_json};

impl Storage {
    pub async fn record_trust_snapshot(
        &self,
        tenant_id: &str,
        total: u8,
        breakdown: TrustBreakdown,
    ) -> Result<TrustSnapshot> {
        self.check_writable()?;
        let snapshot = TrustSnapshot {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            total: total.min(100),
            breakdown,
            created_at: Utc::now(),
        };
        let breakdown_json = to_json(&snapshot.breakdown)?;
        self.conn
            .execute(
                "INSERT INTO trust_snapshots (id, tenant_id, total, breakdown_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    snapshot.id.as_str(),
                    tenant_id,
                    i64::from(snapshot.total),
                    breakdown_json.as_str(),
                    snapshot.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(snapshot)
    }

    /// Most recent snapshot, or `None` if trust was never computed.
    pub async fn latest_trust_snapshot(&self, tenant_id: &str) -> Result<Option<TrustSnapshot>> {
        Ok(self.trust_history(tenant_id, 1).await?.into_iter().next())
    }

    /// Snapshots, newest first.
    pub async fn trust_history(&self, tenant_id: &str, limit: usize) -> Result<Vec<TrustSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, tenant_id, total, breakdown_json, created_at FROM trust_snapshots
                 WHERE tenant_id = ?1 ORDER BY rowid DESC LIMIT ?2",
                params![tenant_id, limit as i64],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(TrustSnapshot {
                id: get_string(&row, 0)?,
                tenant_id: get_string(&row, 1)?,
                total: get_u8(&row, 2)?,
                breakdown: from_json(&get_string(&row, 3)?)?,
                created_at: get_time(&row, 4)?,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;

    use super::*;

    #[tokio::test]
    async fn latest_snapshot_wins() {
        let storage = test_storage().await;
        let tenant = test_tenant(&storage).await;
        assert!(storage.latest_trust_snapshot(&tenant.id).await.unwrap().is_none());

        storage
            .record_trust_snapshot(&tenant.id, 10, TrustBreakdown::default())
            .await
            .unwrap();
        let breakdown = TrustBreakdown {
            evidence_coverage: 1.0,
            avg_confidence: 90.0,
            fresh_share: 0.5,
            answered_share: 0.25,
        };
        storage
            .record_trust_snapshot(&tenant.id, 73, breakdown)
            .await
            .unwrap();

        let latest = storage.latest_trust_snapshot(&tenant.id).await.unwrap().unwrap();
        assert_eq!(latest.total, 73);
        assert_eq!(latest.breakdown, breakdown);
        assert_eq!(storage.trust_history(&tenant.id, 10).await.unwrap().len(), 2);
    }
}
