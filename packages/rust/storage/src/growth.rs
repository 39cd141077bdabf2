//! Audience rows, campaigns, segment snapshots and per-recipient send receipts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use libsql::params;
use trustline_shared::{
    AudienceMember, Campaign, CampaignStatus, NewAudienceMember, ReferralRule, Result,
    SegmentSnapshot, SendReceipt, SendStatus, TrustlineError, new_id,
};

use crate::{
    Storage, db_err, from_json, get_bool, get_enum, get_i64, get_opt_string, get_opt_time,
    get_string, get_time, to_json,
};

const CAMPAIGN_COLUMNS: &str =
    "id, tenant_id, name, dry_run, status, rule_json, created_at, approved_at, executed_at";

/// A send receipt about to be written.
#[derive(Debug, Clone)]
pub struct NewSendReceipt {
    pub address: String,
    pub status: SendStatus,
    pub reason: Option<String>,
}

impl Storage {
    // -----------------------------------------------------------------------
    // Audience
    // -----------------------------------------------------------------------

    /// Upsert an audience row by `(tenant, address)`. Blank addresses cannot be
    /// keyed and are always inserted as new rows.
    pub async fn upsert_audience_member(
        &self,
        tenant_id: &str,
        member: &NewAudienceMember,
    ) -> Result<()> {
        self.check_writable()?;
        let id = new_id();
        let address = if member.address.trim().is_empty() {
            String::new()
        } else {
            member.address.trim().to_lowercase()
        };
        let sentiment = member.sentiment.map(|s| s.as_str());
        let attributes = to_json(&member.attributes)?;
        let sql = if address.is_empty() {
            "INSERT INTO audience (id, tenant_id, address, rating, sentiment, referred, attributes_json)
             VALUES (?1, ?2, '#' || ?1, ?4, ?5, ?6, ?7)"
        } else {
            "INSERT INTO audience (id, tenant_id, address, rating, sentiment, referred, attributes_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(tenant_id, address) DO UPDATE SET
               rating = excluded.rating,
               sentiment = excluded.sentiment,
               referred = MAX(audience.referred, excluded.referred),
               attributes_json = excluded.attributes_json"
        };
        self.conn
            .execute(
                sql,
                params![
                    id.as_str(),
                    tenant_id,
                    address.as_str(),
                    member.rating.map(i64::from),
                    sentiment,
                    i64::from(member.referred),
                    attributes.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_audience(&self, tenant_id: &str) -> Result<Vec<AudienceMember>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, tenant_id, address, rating, sentiment, referred, attributes_json
                 FROM audience WHERE tenant_id = ?1 ORDER BY address",
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_member(&row)?);
        }
        Ok(results)
    }

    /// Flag one address as referred. Fails with `customer_not_found` when the
    /// address is unknown.
    pub async fn mark_referred(&self, tenant_id: &str, address: &str) -> Result<()> {
        self.check_writable()?;
        let normalized = address.trim().to_lowercase();
        let updated = self
            .conn
            .execute(
                "UPDATE audience SET referred = 1 WHERE tenant_id = ?1 AND address = ?2",
                params![tenant_id, normalized.as_str()],
            )
            .await
            .map_err(db_err)?;
        if updated == 0 {
            return Err(TrustlineError::not_found("customer", address));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Campaigns
    // -----------------------------------------------------------------------

    pub async fn insert_campaign(
        &self,
        tenant_id: &str,
        name: &str,
        dry_run: bool,
        rule: ReferralRule,
    ) -> Result<Campaign> {
        self.check_writable()?;
        let campaign = Campaign {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            dry_run,
            status: CampaignStatus::Ready,
            rule,
            created_at: Utc::now(),
            approved_at: None,
            executed_at: None,
        };
        let rule_json = to_json(&campaign.rule)?;
        self.conn
            .execute(
                "INSERT INTO campaigns (id, tenant_id, name, dry_run, status, rule_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    campaign.id.as_str(),
                    tenant_id,
                    name,
                    i64::from(dry_run),
                    campaign.status.as_str(),
                    rule_json.as_str(),
                    campaign.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(campaign)
    }

    pub async fn get_campaign(&self, tenant_id: &str, campaign_id: &str) -> Result<Option<Campaign>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE tenant_id = ?1 AND id = ?2"),
                params![tenant_id, campaign_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_campaign(&row)?)),
            None => Ok(None),
        }
    }

    /// Campaigns, newest first.
    pub async fn list_campaigns(&self, tenant_id: &str) -> Result<Vec<Campaign>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE tenant_id = ?1
                     ORDER BY rowid DESC"
                ),
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_campaign(&row)?);
        }
        Ok(results)
    }

    /// Move a campaign to `status`, stamping `approved_at`/`executed_at`.
    pub async fn set_campaign_status(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        let column = match status {
            CampaignStatus::Ready => {
                return Err(TrustlineError::validation(
                    "a campaign cannot move back to READY",
                ));
            }
            CampaignStatus::Approved => "approved_at",
            CampaignStatus::Executed => "executed_at",
        };
        let updated = self
            .conn
            .execute(
                &format!(
                    "UPDATE campaigns SET status = ?1, {column} = ?2
                     WHERE tenant_id = ?3 AND id = ?4"
                ),
                params![status.as_str(), at.to_rfc3339(), tenant_id, campaign_id],
            )
            .await
            .map_err(db_err)?;
        if updated == 0 {
            return Err(TrustlineError::not_found("campaign", campaign_id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Segment snapshots & send receipts
    // -----------------------------------------------------------------------

    pub async fn insert_segment_snapshot(
        &self,
        campaign_id: &str,
        eligible_count: usize,
        suppressed_count: usize,
        reasons: &BTreeMap<String, usize>,
    ) -> Result<SegmentSnapshot> {
        self.check_writable()?;
        let snapshot = SegmentSnapshot {
            id: new_id(),
            campaign_id: campaign_id.to_string(),
            eligible_count,
            suppressed_count,
            reasons: reasons.clone(),
            created_at: Utc::now(),
        };
        let reasons_json = to_json(&snapshot.reasons)?;
        self.conn
            .execute(
                "INSERT INTO segment_snapshots (id, campaign_id, eligible_count, suppressed_count, reasons_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.id.as_str(),
                    campaign_id,
                    eligible_count as i64,
                    suppressed_count as i64,
                    reasons_json.as_str(),
                    snapshot.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(snapshot)
    }

    pub async fn segment_snapshot(&self, campaign_id: &str) -> Result<Option<SegmentSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, campaign_id, eligible_count, suppressed_count, reasons_json, created_at
                 FROM segment_snapshots WHERE campaign_id = ?1 ORDER BY rowid DESC LIMIT 1",
                params![campaign_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(SegmentSnapshot {
                id: get_string(&row, 0)?,
                campaign_id: get_string(&row, 1)?,
                eligible_count: get_i64(&row, 2)?.max(0) as usize,
                suppressed_count: get_i64(&row, 3)?.max(0) as usize,
                reasons: from_json(&get_string(&row, 4)?)?,
                created_at: get_time(&row, 5)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn insert_send_receipts(
        &self,
        campaign_id: &str,
        receipts: &[NewSendReceipt],
    ) -> Result<usize> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        for receipt in receipts {
            let id = new_id();
            self.conn
                .execute(
                    "INSERT INTO send_receipts (id, campaign_id, address, status, reason, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id.as_str(),
                        campaign_id,
                        receipt.address.as_str(),
                        receipt.status.as_str(),
                        receipt.reason.as_deref(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
        }
        Ok(receipts.len())
    }

    pub async fn list_send_receipts(&self, campaign_id: &str) -> Result<Vec<SendReceipt>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, campaign_id, address, status, reason, created_at
                 FROM send_receipts WHERE campaign_id = ?1 ORDER BY rowid",
                params![campaign_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(SendReceipt {
                id: get_string(&row, 0)?,
                campaign_id: get_string(&row, 1)?,
                address: get_string(&row, 2)?,
                status: get_enum(&row, 3)?,
                reason: get_opt_string(&row, 4),
                created_at: get_time(&row, 5)?,
            });
        }
        Ok(results)
    }
}

fn row_to_member(row: &libsql::Row) -> Result<AudienceMember> {
    let address = get_string(row, 2)?;
    let sentiment = match get_opt_string(row, 4) {
        Some(s) => Some(s.parse()?),
        None => None,
    };
    let rating = match row.get::<i64>(3).ok() {
        Some(v) => Some(u8::try_from(v).map_err(|_| {
            TrustlineError::Storage(format!("rating {v} out of range"))
        })?),
        None => None,
    };
    Ok(AudienceMember {
        id: get_string(row, 0)?,
        tenant_id: get_string(row, 1)?,
        // keyless rows are stored under '#<id>'
        address: if address.starts_with('#') { String::new() } else { address },
        rating,
        sentiment,
        referred: get_bool(row, 5)?,
        attributes: from_json(&get_string(row, 6)?)?,
    })
}

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign> {
    Ok(Campaign {
        id: get_string(row, 0)?,
        tenant_id: get_string(row, 1)?,
        name: get_string(row, 2)?,
        dry_run: get_bool(row, 3)?,
        status: get_enum(row, 4)?,
        rule: from_json::<ReferralRule>(&get_string(row, 5)?)?,
        created_at: get_time(row, 6)?,
        approved_at: get_opt_time(row, 7)?,
        executed_at: get_opt_time(row, 8)?,
    })
}
