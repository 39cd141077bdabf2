//! Published content: FAQ/BLOG assets with immutable versions, and product patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Surface;

db_enum! {
    pub enum AssetStatus {
        Draft => "DRAFT",
        Published => "PUBLISHED",
    }
}

/// Mutable head of an FAQ document or blog article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub tenant_id: String,
    pub asset_type: Surface,
    pub slug: String,
    pub title: String,
    pub status: AssetStatus,
    pub latest_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot of an asset at one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetVersion {
    pub id: String,
    pub asset_id: String,
    pub version: u32,
    pub title: String,
    pub body: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

db_enum! {
    pub enum PatchStatus {
        Draft => "DRAFT",
        Published => "PUBLISHED",
    }
}

/// Product enrichment; one row per product, superseded in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPatch {
    pub id: String,
    pub tenant_id: String,
    pub product_handle: String,
    pub slug: String,
    pub status: PatchStatus,
    pub revision: u32,
    pub patch: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
