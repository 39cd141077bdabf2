//! Published assets, their immutable versions, and product patches.

use chrono::Utc;
use libsql::params;
use serde_json::Value;
use trustline_shared::{
    Asset, AssetStatus, AssetVersion, PatchStatus, ProductPatch, Result, Surface, TrustlineError,
    new_id,
};

use crate::{
    Storage, db_err, from_json, get_enum, get_i64, get_opt_time, get_string, get_time, to_json,
};

const ASSET_COLUMNS: &str =
    "id, tenant_id, asset_type, slug, title, status, latest_version, created_at, updated_at";

const PATCH_COLUMNS: &str = "id, tenant_id, product_handle, slug, status, revision, patch_json, \
     published_at, updated_at";

/// Rendered content for one asset version.
#[derive(Debug, Clone)]
pub struct AssetWrite<'a> {
    pub asset_type: Surface,
    pub slug: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub payload: &'a Value,
}

impl Storage {
    /// Upsert the asset head by `(tenant, type, slug)` and append the next
    /// immutable version. The first publish is version 1.
    pub async fn publish_asset(
        &self,
        tenant_id: &str,
        write: &AssetWrite<'_>,
    ) -> Result<(Asset, AssetVersion)> {
        self.check_writable()?;
        if write.asset_type == Surface::Product {
            return Err(TrustlineError::validation(
                "product content is stored as a product patch, not an asset",
            ));
        }
        let id = new_id();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO assets (id, tenant_id, asset_type, slug, title, status, latest_version, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
                     ON CONFLICT(tenant_id, asset_type, slug) DO UPDATE SET
                       title = excluded.title,
                       status = excluded.status,
                       latest_version = assets.latest_version + 1,
                       updated_at = excluded.updated_at
                     RETURNING {ASSET_COLUMNS}"
                ),
                params![
                    id.as_str(),
                    tenant_id,
                    write.asset_type.as_str(),
                    write.slug,
                    write.title,
                    AssetStatus::Published.as_str(),
                    now_str.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        let asset = match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_asset(&row)?,
            None => return Err(TrustlineError::Storage("asset upsert returned no row".into())),
        };
        drop(rows);

        let version = AssetVersion {
            id: new_id(),
            asset_id: asset.id.clone(),
            version: asset.latest_version,
            title: write.title.to_string(),
            body: write.body.to_string(),
            payload: write.payload.clone(),
            created_at: now,
        };
        let payload_json = to_json(&version.payload)?;
        self.conn
            .execute(
                "INSERT INTO asset_versions (id, asset_id, version, title, body, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    version.id.as_str(),
                    version.asset_id.as_str(),
                    i64::from(version.version),
                    version.title.as_str(),
                    version.body.as_str(),
                    payload_json.as_str(),
                    now_str.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        tracing::info!(
            tenant = tenant_id,
            asset_type = %asset.asset_type,
            slug = %asset.slug,
            version = version.version,
            "asset published"
        );
        Ok((asset, version))
    }

    pub async fn get_asset(
        &self,
        tenant_id: &str,
        asset_type: Surface,
        slug: &str,
    ) -> Result<Option<Asset>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ASSET_COLUMNS} FROM assets
                     WHERE tenant_id = ?1 AND asset_type = ?2 AND slug = ?3"
                ),
                params![tenant_id, asset_type.as_str(), slug],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_asset(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_assets(&self, tenant_id: &str) -> Result<Vec<Asset>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ASSET_COLUMNS} FROM assets WHERE tenant_id = ?1
                     ORDER BY asset_type, slug"
                ),
                params![tenant_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_asset(&row)?);
        }
        Ok(results)
    }

    /// Versions of an asset, oldest first.
    pub async fn list_asset_versions(&self, asset_id: &str) -> Result<Vec<AssetVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, asset_id, version, title, body, payload_json, created_at
                 FROM asset_versions WHERE asset_id = ?1 ORDER BY version",
                params![asset_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(AssetVersion {
                id: get_string(&row, 0)?,
                asset_id: get_string(&row, 1)?,
                version: get_u32(&row, 2)?,
                title: get_string(&row, 3)?,
                body: get_string(&row, 4)?,
                payload: from_json(&get_string(&row, 5)?)?,
                created_at: get_time(&row, 6)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Product patches
    // -----------------------------------------------------------------------

    /// Supersede the patch for `(tenant, handle)` in place and mark it published.
    /// Each publish bumps `revision`.
    pub async fn publish_product_patch(
        &self,
        tenant_id: &str,
        product_handle: &str,
        slug: &str,
        patch: &Value,
    ) -> Result<ProductPatch> {
        self.check_writable()?;
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        let patch_json = to_json(patch)?;
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO product_patches (id, tenant_id, product_handle, slug, status, revision, patch_json, published_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)
                     ON CONFLICT(tenant_id, product_handle) DO UPDATE SET
                       slug = excluded.slug,
                       status = excluded.status,
                       revision = product_patches.revision + 1,
                       patch_json = excluded.patch_json,
                       published_at = excluded.published_at,
                       updated_at = excluded.updated_at
                     RETURNING {PATCH_COLUMNS}"
                ),
                params![
                    id.as_str(),
                    tenant_id,
                    product_handle,
                    slug,
                    PatchStatus::Published.as_str(),
                    patch_json.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_patch(&row),
            None => Err(TrustlineError::Storage(
                "product patch upsert returned no row".into(),
            )),
        }
    }

    pub async fn get_product_patch(
        &self,
        tenant_id: &str,
        product_handle: &str,
    ) -> Result<Option<ProductPatch>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PATCH_COLUMNS} FROM product_patches
                     WHERE tenant_id = ?1 AND product_handle = ?2"
                ),
                params![tenant_id, product_handle],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_patch(&row)?)),
            None => Ok(None),
        }
    }
}

fn get_u32(row: &libsql::Row, idx: i32) -> Result<u32> {
    let v = get_i64(row, idx)?;
    u32::try_from(v).map_err(|_| TrustlineError::Storage(format!("value {v} out of range for u32")))
}

fn row_to_asset(row: &libsql::Row) -> Result<Asset> {
    Ok(Asset {
        id: get_string(row, 0)?,
        tenant_id: get_string(row, 1)?,
        asset_type: get_enum(row, 2)?,
        slug: get_string(row, 3)?,
        title: get_string(row, 4)?,
        status: get_enum(row, 5)?,
        latest_version: get_u32(row, 6)?,
        created_at: get_time(row, 7)?,
        updated_at: get_time(row, 8)?,
    })
}

fn row_to_patch(row: &libsql::Row) -> Result<ProductPatch> {
    Ok(ProductPatch {
        id: get_string(row, 0)?,
        tenant_id: get_string(row, 1)?,
        product_handle: get_string(row, 2)?,
        slug: get_string(row, 3)?,
        status: get_enum(row, 4)?,
        revision: get_u32(row, 5)?,
        patch: from_json(&get_string(row, 6)?)?,
        published_at: get_opt_time(row, 7)?,
        updated_at: get_time(row, 8)?,
    })
}
