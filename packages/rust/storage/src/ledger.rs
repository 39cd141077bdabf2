//! Append-only receipt ledger.

use chrono::Utc;
use libsql::params;
use trustline_shared::{NewReceipt, Receipt, Result, new_id};

use crate::{Storage, db_err, from_json, get_enum, get_i64, get_string, get_time, to_json};

impl Storage {
    /// Append one receipt. Receipts are never updated; only
    /// [`Storage::reset_tenant`] removes them.
    pub async fn append_receipt(&self, tenant_id: &str, receipt: NewReceipt) -> Result<Receipt> {
        self.check_writable()?;
        let stored = Receipt {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            kind: receipt.kind,
            actor: receipt.actor,
            summary: receipt.summary,
            input: receipt.input,
            output: receipt.output,
            created_at: Utc::now(),
        };
        let input = to_json(&stored.input)?;
        let output = to_json(&stored.output)?;

        self.conn
            .execute(
                "INSERT INTO receipts (id, tenant_id, kind, actor, summary, input_json, output_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    stored.id.as_str(),
                    tenant_id,
                    stored.kind.as_str(),
                    stored.actor.as_str(),
                    stored.summary.as_str(),
                    input.as_str(),
                    output.as_str(),
                    stored.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;

        tracing::debug!(
            tenant = tenant_id,
            kind = %stored.kind,
            actor = %stored.actor,
            summary = %stored.summary,
            "receipt appended"
        );
        Ok(stored)
    }

    /// Most recent receipts first.
    pub async fn list_receipts(&self, tenant_id: &str, limit: usize) -> Result<Vec<Receipt>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, tenant_id, kind, actor, summary, input_json, output_json, created_at
                 FROM receipts WHERE tenant_id = ?1
                 ORDER BY seq DESC LIMIT ?2",
                params![tenant_id, limit as i64],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Receipt {
                id: get_string(&row, 0)?,
                tenant_id: get_string(&row, 1)?,
                kind: get_enum(&row, 2)?,
                actor: get_enum(&row, 3)?,
                summary: get_string(&row, 4)?,
                input: from_json(&get_string(&row, 5)?)?,
                output: from_json(&get_string(&row, 6)?)?,
                created_at: get_time(&row, 7)?,
            });
        }
        Ok(results)
    }

    pub async fn count_receipts(&self, tenant_id: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM receipts WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(get_i64(&row, 0)?.max(0) as u64),
            None => Ok(0),
        }
    }
}
